/// Savestate serialisation.
///
/// A bidirectional byte-stream visitor: the same `do_state` routine on
/// each component both saves and loads depending on the mode, keeping
/// the two directions from drifting apart. All values little-endian.
/// Version bytes are the outer serialiser's concern.

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Save,
    Load,
}

pub struct State {
    mode:   Mode,
    buffer: Vec<u8>,
    pos:    usize,
}

impl State {
    /// Start capturing a savestate.
    pub fn save() -> Self {
        Self {
            mode:   Mode::Save,
            buffer: Vec::new(),
            pos:    0,
        }
    }

    /// Start restoring from previously captured bytes.
    pub fn load(data: Vec<u8>) -> Self {
        Self {
            mode:   Mode::Load,
            buffer: data,
            pos:    0,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn do_u8(&mut self, val: &mut u8) {
        match self.mode {
            Mode::Save => self.buffer.push(*val),
            Mode::Load => {
                *val = self.buffer[self.pos];
                self.pos += 1;
            }
        }
    }

    pub fn do_u16(&mut self, val: &mut u16) {
        match self.mode {
            Mode::Save => self.buffer.extend_from_slice(&val.to_le_bytes()),
            Mode::Load => {
                *val = u16::from_le_bytes([self.buffer[self.pos], self.buffer[self.pos + 1]]);
                self.pos += 2;
            }
        }
    }

    pub fn do_u32(&mut self, val: &mut u32) {
        match self.mode {
            Mode::Save => self.buffer.extend_from_slice(&val.to_le_bytes()),
            Mode::Load => {
                let bytes = &self.buffer[self.pos..self.pos + 4];
                *val = u32::from_le_bytes(bytes.try_into().unwrap());
                self.pos += 4;
            }
        }
    }

    pub fn do_u64(&mut self, val: &mut u64) {
        match self.mode {
            Mode::Save => self.buffer.extend_from_slice(&val.to_le_bytes()),
            Mode::Load => {
                let bytes = &self.buffer[self.pos..self.pos + 8];
                *val = u64::from_le_bytes(bytes.try_into().unwrap());
                self.pos += 8;
            }
        }
    }

    pub fn do_bool(&mut self, val: &mut bool) {
        let mut byte = if *val {1} else {0};
        self.do_u8(&mut byte);
        *val = byte != 0;
    }

    pub fn do_bytes(&mut self, val: &mut [u8]) {
        match self.mode {
            Mode::Save => self.buffer.extend_from_slice(val),
            Mode::Load => {
                val.copy_from_slice(&self.buffer[self.pos..self.pos + val.len()]);
                self.pos += val.len();
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let mut a = 0xDEAD_BEEF_u32;
        let mut b = 0x42_u8;
        let mut c = true;
        let mut d = [1_u8, 2, 3];

        let mut state = State::save();
        state.do_u32(&mut a);
        state.do_u8(&mut b);
        state.do_bool(&mut c);
        state.do_bytes(&mut d);
        let bytes = state.into_bytes();
        assert_eq!(bytes.len(), 4 + 1 + 1 + 3);

        let (mut a2, mut b2, mut c2, mut d2) = (0_u32, 0_u8, false, [0_u8; 3]);
        let mut state = State::load(bytes);
        state.do_u32(&mut a2);
        state.do_u8(&mut b2);
        state.do_bool(&mut c2);
        state.do_bytes(&mut d2);

        assert_eq!((a, b, c, d), (a2, b2, c2, d2));
    }
}
