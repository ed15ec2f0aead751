/// AD16 debug device.
///
/// A tiny diagnostic unit with a single 32-bit scratch register. The
/// boot process probes it with an init command and expects the id
/// 0x04120000 back.

use crate::state::State;
use super::{DeviceType, ExiDevice};

const CMD_INIT:  u8 = 0x00;
const CMD_WRITE: u8 = 0xA0;
const CMD_READ:  u8 = 0xA2;

const AD16_ID: u32 = 0x0412_0000;

pub struct AD16 {
    position:   u32,
    command:    u8,
    register:   u32,
}

impl AD16 {
    pub fn new() -> Self {
        Self {
            position:   0,
            command:    0,
            register:   0,
        }
    }
}

impl ExiDevice for AD16 {
    fn device_type(&self) -> DeviceType {
        DeviceType::AD16
    }

    fn set_cs(&mut self, cs: u32) {
        if cs == 1 {
            self.position = 0;
        }
    }

    fn is_present(&self) -> bool {
        true
    }

    fn transfer_byte(&mut self, byte: &mut u8) {
        if self.position == 0 {
            self.command = *byte;
        } else {
            let shift = ((self.position - 1) & 3) * 8;
            match self.command {
                CMD_INIT => {
                    *byte = (AD16_ID >> (24 - shift)) as u8;
                },
                CMD_READ => {
                    *byte = (self.register >> (24 - shift)) as u8;
                },
                CMD_WRITE => {
                    self.register &= !(0xFF << (24 - shift));
                    self.register |= (*byte as u32) << (24 - shift);
                },
                _ => {}
            }
        }
        self.position += 1;
    }

    fn do_state(&mut self, state: &mut State) {
        state.do_u32(&mut self.position);
        state.do_u8(&mut self.command);
        state.do_u32(&mut self.register);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn init_reports_device_id() {
        let mut ad16 = AD16::new();
        ad16.set_cs(1);
        ad16.imm_write(0x0000_0000, 1);
        assert_eq!(ad16.imm_read(4), AD16_ID);
    }

    #[test]
    fn register_write_reads_back() {
        let mut ad16 = AD16::new();
        ad16.set_cs(1);
        ad16.imm_write((CMD_WRITE as u32) << 24, 1);
        ad16.imm_write(0xCAFE_F00D, 4);

        ad16.set_cs(0);
        ad16.set_cs(1);
        ad16.imm_write((CMD_READ as u32) << 24, 1);
        assert_eq!(ad16.imm_read(4), 0xCAFE_F00D);
    }
}
