/// Dummy EXI device.
///
/// Fills any slot with nothing attached. Reports not-present and
/// swallows all transfers, logging them so misdirected guest accesses
/// show up in the debug log.

use log::debug;

use super::{DeviceType, ExiDevice};

pub struct Dummy {
    name: &'static str
}

impl Dummy {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl ExiDevice for Dummy {
    fn device_type(&self) -> DeviceType {
        DeviceType::None
    }

    fn imm_read(&mut self, size: u32) -> u32 {
        debug!("EXI {}: imm read x{}", self.name, size);
        0
    }

    fn imm_write(&mut self, data: u32, size: u32) {
        debug!("EXI {}: imm write {:08X} x{}", self.name, data, size);
    }

    fn dma_read(&mut self, data: &mut [u8]) {
        debug!("EXI {}: dma read x{}", self.name, data.len());
    }

    fn dma_write(&mut self, data: &[u8]) {
        debug!("EXI {}: dma write x{}", self.name, data.len());
    }
}
