/// Memory interface helpers.

/// Use this for register blocks which only decode full words.
///
/// All EXI registers are 32 bits wide and narrower accesses are
/// undefined on the bus, so only word I/O is exposed.
///
/// Addresses are byte offsets from wherever the caller mapped the
/// block. Bases are not page-aligned, so callers must decode with
/// addition rather than bitwise OR.
pub trait MemInterface32 {
    fn read_word(&mut self, addr: u32) -> u32;
    fn write_word(&mut self, addr: u32, data: u32);
}
