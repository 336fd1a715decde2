//! CGA text-mode screen.
//!
//! 25x80 16-bit cells at 0xB8000, light grey on black. The writer tracks a
//! linear cursor position; the hardware cursor is mirrored through the CRT
//! controller ports. Output scrolls when the cursor runs into row 24.

use lazy_static::lazy_static;
use spin::Mutex;
use volatile::Volatile;
use x86_64::instructions::port::Port;

pub const BUFFER_WIDTH: usize = 80;
pub const BUFFER_HEIGHT: usize = 25;
const CELLS: usize = BUFFER_WIDTH * BUFFER_HEIGHT;
/// Light grey on black, shifted into the attribute byte.
const ATTR: u16 = 0x0700;

const CRT_PORT: u16 = 0x3D4;
const CURSOR_HIGH: u8 = 14;
const CURSOR_LOW: u8 = 15;

#[repr(transparent)]
pub struct Buffer {
    cells: [Volatile<u16>; CELLS],
}

pub struct Writer {
    pos: usize,
    buffer: &'static mut Buffer,
}

impl Writer {
    pub fn new(buffer: &'static mut Buffer) -> Self {
        Writer { pos: 0, buffer }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Character byte stored at `pos`, 0 for an empty cell.
    pub fn char_at(&self, pos: usize) -> u8 {
        (self.buffer.cells[pos].read() & 0xFF) as u8
    }

    /// Advance the cursor over `c`, writing the glyph for printables. The
    /// cell under the new cursor is blanked, which is what makes the
    /// hardware cursor visible on cleared ground.
    pub fn putc(&mut self, c: u8) {
        if c == b'\n' {
            self.pos += BUFFER_WIDTH - self.pos % BUFFER_WIDTH;
        } else {
            self.buffer.cells[self.pos].write(c as u16 | ATTR);
            self.pos += 1;
        }

        if self.pos > CELLS {
            panic!("pos under/overflow");
        }
        if self.pos / BUFFER_WIDTH >= BUFFER_HEIGHT - 1 {
            self.scroll();
        }
        self.buffer.cells[self.pos].write(b' ' as u16 | ATTR);
    }

    /// One cell back, blanked.
    pub fn erase_back(&mut self) {
        if self.pos > 0 {
            self.pos -= 1;
            self.buffer.cells[self.pos].write(b' ' as u16 | ATTR);
        }
    }

    fn scroll(&mut self) {
        for i in 0..(BUFFER_HEIGHT - 2) * BUFFER_WIDTH {
            let v = self.buffer.cells[i + BUFFER_WIDTH].read();
            self.buffer.cells[i].write(v);
        }
        self.pos -= BUFFER_WIDTH;
        for i in self.pos..(BUFFER_HEIGHT - 1) * BUFFER_WIDTH {
            self.buffer.cells[i].write(0);
        }
    }

    pub fn clear(&mut self) {
        for i in 0..CELLS {
            self.buffer.cells[i].write(0);
        }
        self.pos = 0;
    }
}

lazy_static! {
    pub static ref WRITER: Mutex<Writer> = Mutex::new(Writer::new(unsafe {
        &mut *(0xB8000 as *mut Buffer)
    }));
}

fn update_hw_cursor(pos: usize) {
    let mut index: Port<u8> = Port::new(CRT_PORT);
    let mut data: Port<u8> = Port::new(CRT_PORT + 1);
    unsafe {
        index.write(CURSOR_HIGH);
        data.write((pos >> 8) as u8);
        index.write(CURSOR_LOW);
        data.write(pos as u8);
    }
}

/// Write one byte at the cursor and mirror the hardware cursor.
pub fn putc(c: u8) {
    let mut w = WRITER.lock();
    w.putc(c);
    update_hw_cursor(w.pos());
}

/// Erase one cell leftward.
pub fn erase_back() {
    let mut w = WRITER.lock();
    w.erase_back();
    update_hw_cursor(w.pos());
}

pub fn cursor() -> usize {
    WRITER.lock().pos()
}

pub fn set_cursor(pos: usize) {
    let mut w = WRITER.lock();
    w.set_pos(pos);
    update_hw_cursor(pos);
}

pub fn init() {
    let mut w = WRITER.lock();
    w.clear();
    update_hw_cursor(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_writer() -> Writer {
        let buffer = Box::leak(Box::new(Buffer {
            cells: core::array::from_fn(|_| Volatile::new(0)),
        }));
        Writer::new(buffer)
    }

    #[test]
    fn printables_advance_the_cursor() {
        let mut w = test_writer();
        for &b in b"hi" {
            w.putc(b);
        }
        assert_eq!(w.char_at(0), b'h');
        assert_eq!(w.char_at(1), b'i');
        assert_eq!(w.pos(), 2);
        // The cell under the cursor is blanked.
        assert_eq!(w.char_at(2), b' ');
    }

    #[test]
    fn newline_moves_to_the_next_row_start() {
        let mut w = test_writer();
        w.putc(b'a');
        w.putc(b'\n');
        assert_eq!(w.pos(), BUFFER_WIDTH);
        w.putc(b'\n');
        assert_eq!(w.pos(), 2 * BUFFER_WIDTH);
    }

    #[test]
    fn erase_back_blanks_the_previous_cell() {
        let mut w = test_writer();
        w.putc(b'x');
        w.erase_back();
        assert_eq!(w.pos(), 0);
        assert_eq!(w.char_at(0), b' ');
        // At the origin it stays put.
        w.erase_back();
        assert_eq!(w.pos(), 0);
    }

    #[test]
    fn reaching_row_24_scrolls_one_row_up() {
        let mut w = test_writer();
        w.putc(b'q');
        // Walk the cursor to the start of row 24.
        for _ in 0..BUFFER_HEIGHT - 1 {
            w.putc(b'\n');
        }
        assert_eq!(w.pos(), (BUFFER_HEIGHT - 2) * BUFFER_WIDTH);
        // The 'q' scrolled off; row 0 now holds what row 1 held.
        assert_ne!(w.char_at(0), b'q');
    }
}
