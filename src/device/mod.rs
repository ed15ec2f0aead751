/// EXI devices.
///
/// Everything attached to an EXI channel implements `ExiDevice`. Most
/// devices only need `transfer_byte`; the immediate and DMA entry
/// points have default implementations built on top of it, moving the
/// most significant byte first as the bus does.

mod dummy;
mod ad16;
mod memcard;

use crate::state::State;

pub use dummy::Dummy;
pub use ad16::AD16;
pub use memcard::MemoryCard;

/// Device type tag. The numeric value is stored in savestates, so
/// variants must keep their discriminants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum DeviceType {
    None        = 0,
    MemoryCard  = 1,
    AD16        = 2,
}

impl DeviceType {
    pub fn from_tag(tag: u32) -> Self {
        match tag {
            1 => DeviceType::MemoryCard,
            2 => DeviceType::AD16,
            _ => DeviceType::None,
        }
    }

    pub fn tag(self) -> u32 {
        self as u32
    }
}

/// Construct a device of the given type.
///
/// The channel id selects which card a memory card device presents
/// (channel 0 = slot A, channel 1 = slot B).
pub fn create_device(device_type: DeviceType, channel_id: u32) -> Box<dyn ExiDevice> {
    match device_type {
        DeviceType::None        => Box::new(Dummy::new("None")),
        DeviceType::MemoryCard  => Box::new(MemoryCard::new(channel_id)),
        DeviceType::AD16        => Box::new(AD16::new()),
    }
}

pub trait ExiDevice {
    fn device_type(&self) -> DeviceType;

    /// Chip-select line: 1 = selected, 0 = deselected.
    fn set_cs(&mut self, _cs: u32) {}

    fn is_present(&self) -> bool {
        false
    }

    fn is_interrupt_set(&self) -> bool {
        false
    }

    /// Exchange a single byte with the device.
    fn transfer_byte(&mut self, _byte: &mut u8) {}

    /// Immediate read of 1-4 bytes, packed MSB-first.
    fn imm_read(&mut self, size: u32) -> u32 {
        let mut result = 0;
        for position in 0..size {
            let mut byte = 0;
            self.transfer_byte(&mut byte);
            result |= (byte as u32) << (24 - (position * 8));
        }
        result
    }

    /// Immediate write of 1-4 bytes, MSB-first.
    fn imm_write(&mut self, data: u32, size: u32) {
        let mut data = data;
        for _ in 0..size {
            let mut byte = (data >> 24) as u8;
            self.transfer_byte(&mut byte);
            data <<= 8;
        }
    }

    /// Full-duplex immediate transfer: `data` is sent and replaced by
    /// the device's response.
    fn imm_readwrite(&mut self, data: &mut u32, size: u32) {
        self.imm_write(*data, size);
        *data = self.imm_read(size);
    }

    /// DMA from the device into main memory. `data` is the resolved
    /// main-memory region.
    fn dma_read(&mut self, data: &mut [u8]) {
        for out in data.iter_mut() {
            let mut byte = 0;
            self.transfer_byte(&mut byte);
            *out = byte;
        }
    }

    /// DMA from main memory into the device.
    fn dma_write(&mut self, data: &[u8]) {
        for b in data.iter() {
            let mut byte = *b;
            self.transfer_byte(&mut byte);
        }
    }

    fn pause_and_lock(&mut self, _lock: bool, _unpause_on_unlock: bool) {}

    fn do_state(&mut self, _state: &mut State) {}

    /// True if this device answers queries for the given type.
    /// `custom_index` narrows the match for multi-instance devices
    /// (memory card slot index).
    fn matches(&self, device_type: DeviceType, _custom_index: Option<u32>) -> bool {
        device_type == self.device_type()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Echo {
        sent: Vec<u8>
    }

    impl ExiDevice for Echo {
        fn device_type(&self) -> DeviceType {
            DeviceType::None
        }
        fn transfer_byte(&mut self, byte: &mut u8) {
            self.sent.push(*byte);
            *byte = 0xA0 | (self.sent.len() as u8 - 1);
        }
    }

    #[test]
    fn imm_read_packs_msb_first() {
        let mut dev = Echo { sent: Vec::new() };
        assert_eq!(dev.imm_read(4), 0xA0A1_A2A3);
        assert_eq!(dev.imm_read(2) >> 16, 0xA4A5);
    }

    #[test]
    fn imm_write_sends_msb_first() {
        let mut dev = Echo { sent: Vec::new() };
        dev.imm_write(0xDEAD_BEEF, 4);
        assert_eq!(dev.sent, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        dev.imm_write(0x1234_0000, 2);
        assert_eq!(&dev.sent[4..], &[0x12, 0x34]);
    }

    #[test]
    fn default_dma_round_trips_through_transfer_byte() {
        let mut dev = Echo { sent: Vec::new() };
        let mut buffer = [0; 4];
        dev.dma_read(&mut buffer);
        assert_eq!(buffer, [0xA0, 0xA1, 0xA2, 0xA3]);
        dev.dma_write(&[1, 2, 3]);
        assert_eq!(&dev.sent[4..], &[1, 2, 3]);
    }
}
