/// Emulated main memory.
///
/// DMA transfers copy between a device and this buffer. The handle is
/// shared with the rest of the emulator, so it is locked for the
/// duration of each (synchronous) transfer.

use parking_lot::Mutex;
use std::sync::Arc;

/// Physical address mask. Strips the cached/uncached mirror bits from
/// CPU addresses (0x8000_0000 / 0xC000_0000 bases).
const PHYS_MASK: u32 = 0x1FFF_FFFF;

#[derive(Clone)]
pub struct MainRam {
    data: Arc<Mutex<Box<[u8]>>>
}

impl MainRam {
    pub fn new(size: usize) -> Self {
        Self {
            data: Arc::new(Mutex::new(vec![0; size].into_boxed_slice()))
        }
    }

    /// Run `f` over the physical region starting at `addr`.
    ///
    /// Returns false without calling `f` if the region falls outside
    /// main memory.
    pub fn with_region<T>(&self, addr: u32, len: u32, f: impl FnOnce(&mut [u8]) -> T) -> Option<T> {
        let start = (addr & PHYS_MASK) as usize;
        let end = start.checked_add(len as usize)?;
        let mut data = self.data.lock();
        if end > data.len() {
            return None;
        }
        Some(f(&mut data[start..end]))
    }

    pub fn read_byte(&self, addr: u32) -> u8 {
        let data = self.data.lock();
        data[(addr & PHYS_MASK) as usize]
    }

    pub fn write_byte(&self, addr: u32, byte: u8) {
        let mut data = self.data.lock();
        data[(addr & PHYS_MASK) as usize] = byte;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mirrors_resolve_to_same_bytes() {
        let ram = MainRam::new(0x1000);
        ram.write_byte(0x8000_0010, 0xAB);
        assert_eq!(ram.read_byte(0x0000_0010), 0xAB);
        assert_eq!(ram.read_byte(0xC000_0010), 0xAB);
    }

    #[test]
    fn out_of_range_region_is_rejected() {
        let ram = MainRam::new(0x100);
        assert!(ram.with_region(0x80, 0x100, |_| ()).is_none());
        assert!(ram.with_region(0x80, 0x80, |_| ()).is_some());
    }
}
