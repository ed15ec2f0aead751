/// Memory card EXI device.
///
/// Emulates a standard 59-block (512kB) card as an in-memory flash
/// image. Commands arrive one byte at a time over `transfer_byte`;
/// erase and program commands latch their payload while selected and
/// execute when chip-select drops, as the real card does. Bulk reads
/// and writes go through the DMA overrides, which copy directly
/// between the image and main memory.

use log::debug;

use crate::state::State;
use super::{DeviceType, ExiDevice};

const CARD_SIZE: usize = 512 * 1024;
const SECTOR_SIZE: u32 = 0x2000;
const PAGE_SIZE: usize = 128;

const CARD_ID: u32 = 0xC221;

mod command {
    pub const NINTENDO_ID:          u8 = 0x00;
    pub const READ_ARRAY:           u8 = 0x52;
    pub const ARRAY_TO_BUFFER:      u8 = 0x53;
    pub const SET_INTERRUPT:        u8 = 0x81;
    pub const WRITE_BUFFER:         u8 = 0x82;
    pub const READ_STATUS:          u8 = 0x83;
    pub const READ_ID:              u8 = 0x85;
    pub const READ_ERROR_BUFFER:    u8 = 0x86;
    pub const WAKE_UP:              u8 = 0x87;
    pub const SLEEP:                u8 = 0x88;
    pub const CLEAR_STATUS:         u8 = 0x89;
    pub const SECTOR_ERASE:         u8 = 0xF1;
    pub const PAGE_PROGRAM:         u8 = 0xF2;
    pub const CHIP_ERASE:           u8 = 0xF4;
}

mod status {
    pub const READY:            u8 = 0x01;
    pub const PROGRAM_ERROR:    u8 = 0x08;
    pub const ERASE_ERROR:      u8 = 0x10;
    pub const SLEEP:            u8 = 0x20;
    pub const UNLOCKED:         u8 = 0x40;
    pub const BUSY:             u8 = 0x80;
}

pub struct MemoryCard {
    /// Which physical slot this card presents as (0 = A, 1 = B).
    card_index:         u32,

    interrupt_switch:   bool,
    interrupt_set:      bool,
    command:            u8,
    status:             u8,
    position:           u32,
    address:            u32,
    programming_buffer: [u8; PAGE_SIZE],

    card:               Vec<u8>,
}

impl MemoryCard {
    pub fn new(card_index: u32) -> Self {
        Self {
            card_index,
            interrupt_switch:   false,
            interrupt_set:      false,
            command:            0,
            status:             status::READY | status::UNLOCKED,
            position:           0,
            address:            0,
            programming_buffer: [0; PAGE_SIZE],
            // Blank flash reads all-ones.
            card:               vec![0xFF; CARD_SIZE],
        }
    }

    fn card_byte(&self, addr: u32) -> u8 {
        self.card[(addr as usize) % CARD_SIZE]
    }

    /// A latched command finished executing.
    fn cmd_done(&mut self) {
        self.status |= status::READY;
        self.status &= !status::BUSY;
        self.interrupt_set = true;
    }
}

impl ExiDevice for MemoryCard {
    fn device_type(&self) -> DeviceType {
        DeviceType::MemoryCard
    }

    fn set_cs(&mut self, cs: u32) {
        if cs == 1 {
            self.position = 0;
            return;
        }

        // Deselect: erase and program commands execute now.
        match self.command {
            command::SECTOR_ERASE if self.position > 2 => {
                let base = (self.address & !(SECTOR_SIZE - 1)) as usize % CARD_SIZE;
                debug!("MemoryCard {}: erase sector {:06X}", self.card_index, base);
                for byte in &mut self.card[base..base + SECTOR_SIZE as usize] {
                    *byte = 0xFF;
                }
                self.cmd_done();
            },
            command::CHIP_ERASE if self.position > 2 => {
                debug!("MemoryCard {}: chip erase", self.card_index);
                for byte in self.card.iter_mut() {
                    *byte = 0xFF;
                }
                self.cmd_done();
            },
            command::PAGE_PROGRAM if self.position >= 5 => {
                let count = ((self.position - 5) as usize).min(PAGE_SIZE);
                debug!("MemoryCard {}: program {} bytes @ {:06X}", self.card_index, count, self.address);
                for i in 0..count {
                    let addr = (self.address as usize + i) % CARD_SIZE;
                    // Flash programming can only clear bits.
                    self.card[addr] &= self.programming_buffer[i];
                }
                self.cmd_done();
            },
            _ => {}
        }
    }

    fn is_present(&self) -> bool {
        true
    }

    fn is_interrupt_set(&self) -> bool {
        self.interrupt_switch && self.interrupt_set
    }

    fn transfer_byte(&mut self, byte: &mut u8) {
        if self.position == 0 {
            self.command = *byte;
            *byte = 0xFF;
            self.position += 1;
            return;
        }

        match self.command {
            command::NINTENDO_ID => {
                // Dummy cycle, then the card size MSB-first.
                *byte = if self.position == 1 {
                    0x80
                } else {
                    let shift = 24 - (((self.position - 2) & 3) * 8);
                    ((CARD_SIZE as u32) >> shift) as u8
                };
            },
            command::READ_ARRAY => {
                match self.position {
                    1 => self.address = (*byte as u32) << 17,
                    2 => self.address |= (*byte as u32) << 9,
                    3 => self.address |= ((*byte as u32) & 3) << 7,
                    4 => self.address |= (*byte as u32) & 0x7F,
                    _ => {
                        *byte = self.card_byte(self.address);
                        self.address = self.address.wrapping_add(1);
                    }
                }
            },
            command::READ_STATUS => {
                *byte = self.status;
            },
            command::READ_ID => {
                *byte = if self.position == 1 {
                    0xFF
                } else {
                    let shift = 24 - (((self.position - 2) & 3) * 8);
                    (CARD_ID >> shift) as u8
                };
            },
            command::READ_ERROR_BUFFER => {
                *byte = 0;
            },
            command::SET_INTERRUPT => {
                if self.position == 1 {
                    self.interrupt_switch = *byte != 0;
                    if !self.interrupt_switch {
                        self.interrupt_set = false;
                    }
                }
            },
            command::WAKE_UP => {
                self.status &= !status::SLEEP;
            },
            command::SLEEP => {
                self.status |= status::SLEEP;
            },
            command::CLEAR_STATUS => {
                self.status &= !(status::ERASE_ERROR | status::PROGRAM_ERROR);
            },
            command::SECTOR_ERASE | command::CHIP_ERASE => {
                match self.position {
                    1 => self.address = (*byte as u32) << 17,
                    2 => self.address |= (*byte as u32) << 9,
                    _ => {}
                }
            },
            command::PAGE_PROGRAM => {
                match self.position {
                    1 => self.address = (*byte as u32) << 17,
                    2 => self.address |= (*byte as u32) << 9,
                    3 => self.address |= ((*byte as u32) & 3) << 7,
                    4 => self.address |= (*byte as u32) & 0x7F,
                    _ => {
                        let idx = ((self.position - 5) as usize) & (PAGE_SIZE - 1);
                        self.programming_buffer[idx] = *byte;
                    }
                }
            },
            command::ARRAY_TO_BUFFER | command::WRITE_BUFFER => {
                // Buffer shuffling commands; nothing observes these.
                *byte = 0xFF;
            },
            other => {
                debug!("MemoryCard {}: unknown command {:02X}", self.card_index, other);
                *byte = 0xFF;
            }
        }
        self.position += 1;
    }

    fn dma_read(&mut self, data: &mut [u8]) {
        for out in data.iter_mut() {
            *out = self.card_byte(self.address);
            self.address = self.address.wrapping_add(1);
        }
        self.cmd_done();
    }

    fn dma_write(&mut self, data: &[u8]) {
        for b in data.iter() {
            let addr = (self.address as usize) % CARD_SIZE;
            self.card[addr] = *b;
            self.address = self.address.wrapping_add(1);
        }
        self.cmd_done();
    }

    fn do_state(&mut self, state: &mut State) {
        state.do_bool(&mut self.interrupt_switch);
        state.do_bool(&mut self.interrupt_set);
        state.do_u8(&mut self.command);
        state.do_u8(&mut self.status);
        state.do_u32(&mut self.position);
        state.do_u32(&mut self.address);
        state.do_bytes(&mut self.programming_buffer);
        state.do_bytes(&mut self.card);
    }

    fn matches(&self, device_type: DeviceType, custom_index: Option<u32>) -> bool {
        device_type == DeviceType::MemoryCard
            && custom_index.map_or(true, |index| index == self.card_index)
    }
}
