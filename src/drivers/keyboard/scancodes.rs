//! PS/2 scancode set 1 decoder.
//!
//! Produces the byte codes the console editor consumes: ASCII for
//! printables, `char - 0x40` for control chords, 0x08 for backspace, and
//! the arrow codes 0xE2 (up), 0xE3 (down), 0xE4 (left), 0xE5 (right).

use bitflags::bitflags;

pub const UP_ARROW: u8 = 0xE2;
pub const DOWN_ARROW: u8 = 0xE3;
pub const LEFT_ARROW: u8 = 0xE4;
pub const RIGHT_ARROW: u8 = 0xE5;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Modifiers: u8 {
        const SHIFT    = 1 << 0;
        const CTRL     = 1 << 1;
        const ALT      = 1 << 2;
        const CAPSLOCK = 1 << 3;
        /// An 0xE0 prefix byte arrived; the next scancode is extended.
        const EXTENDED = 1 << 4;
    }
}

pub struct Decoder {
    mods: Modifiers,
}

impl Decoder {
    pub const fn new() -> Self {
        Decoder {
            mods: Modifiers::empty(),
        }
    }

    /// Decode one raw scancode; modifier traffic returns None.
    pub fn decode(&mut self, scancode: u8) -> Option<u8> {
        if scancode == 0xE0 {
            self.mods.insert(Modifiers::EXTENDED);
            return None;
        }
        let extended = self.mods.contains(Modifiers::EXTENDED);
        self.mods.remove(Modifiers::EXTENDED);

        if extended {
            return match scancode {
                0x48 => Some(UP_ARROW),
                0x50 => Some(DOWN_ARROW),
                0x4B => Some(LEFT_ARROW),
                0x4D => Some(RIGHT_ARROW),
                0x1D => {
                    self.mods.insert(Modifiers::CTRL);
                    None
                }
                0x9D => {
                    self.mods.remove(Modifiers::CTRL);
                    None
                }
                0x38 => {
                    self.mods.insert(Modifiers::ALT);
                    None
                }
                0xB8 => {
                    self.mods.remove(Modifiers::ALT);
                    None
                }
                _ => None,
            };
        }

        match scancode {
            // Modifier make/break codes.
            0x2A | 0x36 => {
                self.mods.insert(Modifiers::SHIFT);
                None
            }
            0xAA | 0xB6 => {
                self.mods.remove(Modifiers::SHIFT);
                None
            }
            0x1D => {
                self.mods.insert(Modifiers::CTRL);
                None
            }
            0x9D => {
                self.mods.remove(Modifiers::CTRL);
                None
            }
            0x38 => {
                self.mods.insert(Modifiers::ALT);
                None
            }
            0xB8 => {
                self.mods.remove(Modifiers::ALT);
                None
            }
            0x3A => {
                self.mods.toggle(Modifiers::CAPSLOCK);
                None
            }

            0x1C => Some(b'\n'),
            0x0E => Some(0x08),
            0x39 => Some(b' '),
            0x0F => Some(b'\t'),

            // Number row.
            0x02 => self.shifted(b'1', b'!'),
            0x03 => self.shifted(b'2', b'@'),
            0x04 => self.shifted(b'3', b'#'),
            0x05 => self.shifted(b'4', b'$'),
            0x06 => self.shifted(b'5', b'%'),
            0x07 => self.shifted(b'6', b'^'),
            0x08 => self.shifted(b'7', b'&'),
            0x09 => self.shifted(b'8', b'*'),
            0x0A => self.shifted(b'9', b'('),
            0x0B => self.shifted(b'0', b')'),
            0x0C => self.shifted(b'-', b'_'),
            0x0D => self.shifted(b'=', b'+'),

            // Letter rows.
            0x10 => self.letter(b'q'),
            0x11 => self.letter(b'w'),
            0x12 => self.letter(b'e'),
            0x13 => self.letter(b'r'),
            0x14 => self.letter(b't'),
            0x15 => self.letter(b'y'),
            0x16 => self.letter(b'u'),
            0x17 => self.letter(b'i'),
            0x18 => self.letter(b'o'),
            0x19 => self.letter(b'p'),
            0x1A => self.shifted(b'[', b'{'),
            0x1B => self.shifted(b']', b'}'),
            0x1E => self.letter(b'a'),
            0x1F => self.letter(b's'),
            0x20 => self.letter(b'd'),
            0x21 => self.letter(b'f'),
            0x22 => self.letter(b'g'),
            0x23 => self.letter(b'h'),
            0x24 => self.letter(b'j'),
            0x25 => self.letter(b'k'),
            0x26 => self.letter(b'l'),
            0x27 => self.shifted(b';', b':'),
            0x28 => self.shifted(b'\'', b'"'),
            0x29 => self.shifted(b'`', b'~'),
            0x2B => self.shifted(b'\\', b'|'),
            0x2C => self.letter(b'z'),
            0x2D => self.letter(b'x'),
            0x2E => self.letter(b'c'),
            0x2F => self.letter(b'v'),
            0x30 => self.letter(b'b'),
            0x31 => self.letter(b'n'),
            0x32 => self.letter(b'm'),
            0x33 => self.shifted(b',', b'<'),
            0x34 => self.shifted(b'.', b'>'),
            0x35 => self.shifted(b'/', b'?'),

            _ => None,
        }
    }

    fn shifted(&self, plain: u8, shift: u8) -> Option<u8> {
        if self.mods.contains(Modifiers::SHIFT) {
            Some(shift)
        } else {
            Some(plain)
        }
    }

    /// Letters honor ctrl (byte - 0x40 off the uppercase form), then
    /// shift/caps.
    fn letter(&self, lower: u8) -> Option<u8> {
        let upper = lower - b'a' + b'A';
        if self.mods.contains(Modifiers::CTRL) {
            return Some(upper - 0x40);
        }
        let shifted =
            self.mods.contains(Modifiers::SHIFT) != self.mods.contains(Modifiers::CAPSLOCK);
        Some(if shifted { upper } else { lower })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codes: &[u8]) -> Vec<u8> {
        let mut d = Decoder::new();
        codes.iter().filter_map(|&sc| d.decode(sc)).collect()
    }

    #[test]
    fn plain_letters_and_digits() {
        // h, i, 4
        assert_eq!(decode_all(&[0x23, 0x17, 0x05]), b"hi4");
    }

    #[test]
    fn shift_produces_uppercase_and_symbols() {
        // shift-down, a, 2, shift-up, a
        assert_eq!(decode_all(&[0x2A, 0x1E, 0x03, 0xAA, 0x1E]), b"A@a");
    }

    #[test]
    fn capslock_flips_letters_but_not_digits() {
        // caps, a, 1, shift-down, a (shift undoes caps for letters)
        assert_eq!(decode_all(&[0x3A, 0x1E, 0x02, 0x2A, 0x1E]), b"A1a");
    }

    #[test]
    fn ctrl_chords_map_to_control_bytes() {
        // ctrl-down, s, f, d, ctrl-up, s
        let out = decode_all(&[0x1D, 0x1F, 0x21, 0x20, 0x9D, 0x1F]);
        assert_eq!(out, vec![0x13, 0x06, 0x04, b's']);
    }

    #[test]
    fn extended_arrows_use_the_console_codes() {
        let out = decode_all(&[0xE0, 0x48, 0xE0, 0x50, 0xE0, 0x4B, 0xE0, 0x4D]);
        assert_eq!(out, vec![UP_ARROW, DOWN_ARROW, LEFT_ARROW, RIGHT_ARROW]);
    }

    #[test]
    fn enter_and_backspace() {
        assert_eq!(decode_all(&[0x1C, 0x0E]), vec![b'\n', 0x08]);
    }

    #[test]
    fn break_codes_and_unknowns_are_silent() {
        // 'a' break (0x9E) and a stray extended byte produce nothing.
        assert_eq!(decode_all(&[0x9E, 0xE0, 0x99]), Vec::<u8>::new());
    }
}
