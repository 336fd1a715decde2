//! In-place console line editor.
//!
//! Keeps the circular input buffer with its read/write/edit indices, the
//! history ring browsed with the up/down arrows, cursor-relative editing for
//! the left/right arrows, the Ctrl-S..Ctrl-F modal sub-editor, and the
//! inline expression rewriter. Everything draws through the `Screen` trait
//! so the device glue (CGA + UART) stays out of the editing logic.

use crate::param::{INPUT_BUF, N_HISTORY};

use super::expr;

pub const UP_ARROW: u8 = 0xE2;
pub const DOWN_ARROW: u8 = 0xE3;
pub const LEFT_ARROW: u8 = 0xE4;
pub const RIGHT_ARROW: u8 = 0xE5;

/// Control-X byte code.
pub const fn ctrl(c: u8) -> u8 {
    c - 0x40
}

const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7F;

/// Echo sink and cursor model the editor draws through. Positions are
/// linear screen cells.
pub trait Screen {
    fn putc(&mut self, c: u8);
    /// Erase one cell leftward.
    fn backspace(&mut self);
    fn cursor(&self) -> usize;
    fn set_cursor(&mut self, pos: usize);
}

/// What a keystroke did, as far as the outside world cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    None,
    /// A line (or a full buffer) was committed to readers.
    Committed,
}

/// One editable line. History entries are whole-struct snapshots.
#[derive(Clone, Copy)]
pub struct LineBuffer {
    pub buf: [u8; INPUT_BUF],
    /// Read index: first byte not yet consumed by readers.
    pub r: usize,
    /// Write index: end of the committed region.
    pub w: usize,
    /// Edit index: first unused byte of the line being edited.
    pub e: usize,
}

impl LineBuffer {
    pub const fn new() -> Self {
        LineBuffer {
            buf: [0; INPUT_BUF],
            r: 0,
            w: 0,
            e: 0,
        }
    }
}

fn hist(i: i32) -> usize {
    i.rem_euclid(N_HISTORY as i32) as usize
}

pub struct LineEditor {
    pub input: LineBuffer,
    history: [LineBuffer; N_HISTORY],
    /// Browse head into the history ring.
    current_history: i32,
    /// Write head: where the next committed line is saved.
    last_history: i32,
    /// Cursor offset within the edit region; 0 is at the edit index,
    /// negative is to its left.
    arrow: i32,
}

impl LineEditor {
    pub const fn new() -> Self {
        LineEditor {
            input: LineBuffer::new(),
            history: [LineBuffer::new(); N_HISTORY],
            current_history: 0,
            last_history: 0,
            arrow: 0,
        }
    }

    pub fn arrow(&self) -> i32 {
        self.arrow
    }

    /// Feed one keystroke from the interrupt path. `getc` supplies further
    /// bytes while the modal sub-editor runs.
    pub fn keystroke(
        &mut self,
        c: u8,
        scr: &mut dyn Screen,
        getc: &mut dyn FnMut() -> Option<u8>,
    ) -> Event {
        let mut event = Event::None;
        match c {
            c if c == ctrl(b'U') => self.kill_line(scr),
            BACKSPACE | DELETE => {
                if self.input.e != self.input.w {
                    if self.arrow == 0 {
                        self.input.e -= 1;
                        self.input.buf[self.input.e % INPUT_BUF] = 0;
                        scr.backspace();
                    } else {
                        self.edit_mid(BACKSPACE, scr);
                    }
                }
            }
            UP_ARROW | DOWN_ARROW | LEFT_ARROW | RIGHT_ARROW => self.arrow_key(c, scr),
            c if c == ctrl(b'S') => {
                self.expr_mode(scr, getc);
                let pos = scr.cursor();
                scr.set_cursor((pos as i32 + self.arrow) as usize);
            }
            _ => {
                if c != 0 && self.input.e - self.input.r < INPUT_BUF {
                    let c = if c == b'\r' { b'\n' } else { c };
                    if c == b'\n' {
                        self.arrow = 0;
                    }
                    if self.arrow == 0 {
                        self.input.buf[self.input.e % INPUT_BUF] = c;
                        self.input.e += 1;
                        scr.putc(c);
                    } else {
                        self.edit_mid(c, scr);
                    }
                    if c == b'\n' || c == ctrl(b'D') || self.input.e == self.input.r + INPUT_BUF {
                        self.input.w = self.input.e;
                        event = Event::Committed;
                        if self.line_is(b"history\n") {
                            self.print_history(scr);
                            self.input.r = 0;
                            self.input.w = 0;
                            self.input.e = 0;
                        }
                    }
                }
            }
        }
        self.rewrite_expression(scr);
        event
    }

    /// ^U: erase back to the previous newline or the committed region.
    fn kill_line(&mut self, scr: &mut dyn Screen) {
        while self.input.e != self.input.w
            && self.input.buf[(self.input.e - 1) % INPUT_BUF] != b'\n'
        {
            self.input.e -= 1;
            scr.backspace();
        }
    }

    fn arrow_key(&mut self, c: u8, scr: &mut dyn Screen) {
        let pos = scr.cursor();
        match c {
            LEFT_ARROW => {
                if ((-self.arrow) as usize) < self.input.e {
                    self.arrow -= 1;
                    scr.set_cursor(pos - 1);
                }
            }
            RIGHT_ARROW => {
                if self.arrow != 0 {
                    self.arrow += 1;
                    scr.set_cursor(pos + 1);
                }
            }
            _ => self.browse_history(c, scr),
        }
    }

    /// Up/down: save the in-progress line when leaving the head, then load
    /// the neighbouring entry. Moves that would land on an empty slot or
    /// run past the write head are ignored.
    fn browse_history(&mut self, c: u8, scr: &mut dyn Screen) {
        if c == UP_ARROW {
            let prev = hist(self.current_history - 1);
            if self.history[prev].buf[0] == 0 || prev == hist(self.last_history) {
                return;
            }
        } else if hist(self.current_history + 1) == hist(self.last_history + 1) {
            return;
        }

        let e = self.input.e;
        self.clear_line(e, scr);
        self.arrow = 0;
        if hist(self.current_history) == hist(self.last_history) {
            // Leaving the head: snapshot the in-progress line, newline
            // terminated like a committed entry.
            let mut snap = self.input;
            snap.buf[e % INPUT_BUF] = b'\n';
            snap.e = e + 1;
            snap.w = snap.e;
            self.history[hist(self.current_history)] = snap;
        }
        if c == UP_ARROW {
            self.current_history -= 1;
        } else {
            self.current_history += 1;
        }
        self.input = self.history[hist(self.current_history)];
        self.input.e -= 1;
        self.input.buf[self.input.e % INPUT_BUF] = 0;
        self.redraw(scr);
    }

    /// Erase the displayed line: park the cursor at the line end, then eat
    /// `end - w` cells.
    fn clear_line(&mut self, end: usize, scr: &mut dyn Screen) {
        let pos = scr.cursor();
        scr.set_cursor((pos as i32 - self.arrow) as usize);
        for _ in 0..end.saturating_sub(self.input.w) {
            scr.backspace();
        }
    }

    /// Repaint the line from the buffer start and reset the reader indices
    /// the repaint invalidated.
    fn redraw(&mut self, scr: &mut dyn Screen) {
        for i in 0..INPUT_BUF {
            let b = self.input.buf[i];
            if b == b'\n' || b == 0 {
                break;
            }
            scr.putc(b);
        }
        self.input.w = 0;
        self.input.r = 0;
    }

    /// Shift the tail right and drop `c` at `at` (insertion under the
    /// cursor).
    fn shift_in(&mut self, c: u8, at: usize) {
        let mut i = self.input.e;
        while i > at {
            self.input.buf[i % INPUT_BUF] = self.input.buf[(i - 1) % INPUT_BUF];
            i -= 1;
        }
        self.input.e += 1;
        self.input.buf[at % INPUT_BUF] = c;
    }

    /// Shift the tail left over the byte at `at - 1` (deletion under the
    /// cursor).
    fn shift_out(&mut self, at: usize) {
        for i in (at - 1)..self.input.e {
            self.input.buf[i % INPUT_BUF] = self.input.buf[(i + 1) % INPUT_BUF];
        }
        self.input.e -= 1;
    }

    fn apply_mid(&mut self, c: u8, at: usize) {
        if c == 0 {
            return;
        }
        if c == BACKSPACE || c == DELETE {
            self.shift_out(at);
        } else {
            self.shift_in(c, at);
        }
    }

    /// Cursor-relative edit: mutate at `e + arrow`, then repaint the line
    /// and nudge the hardware cursor.
    fn edit_mid(&mut self, c: u8, scr: &mut dyn Screen) {
        let pos = scr.cursor();
        let at = (self.input.e as i32 + self.arrow) as usize;
        if c == BACKSPACE || c == DELETE {
            if self.arrow <= -(self.input.e as i32) {
                return;
            }
            self.apply_mid(c, at);
            self.clear_line(self.input.e + 1, scr);
            self.redraw(scr);
            scr.set_cursor(pos - 1);
        } else {
            self.apply_mid(c, at);
            self.clear_line(self.input.e - 1, scr);
            self.redraw(scr);
            scr.set_cursor(pos + 1);
        }
    }

    fn line_is(&self, target: &[u8]) -> bool {
        let line = &self.input.buf[..target.len().min(INPUT_BUF)];
        line == target && self.input.buf.get(target.len()).copied().unwrap_or(0) == 0
    }

    /// The `history` command: list saved lines, newest first.
    fn print_history(&mut self, scr: &mut dyn Screen) {
        puts(scr, b"Command history:\n");
        puts(scr, b"----------------\n");
        for i in 0..(N_HISTORY as i32 - 1) {
            let entry = &self.history[hist(self.current_history - i - 1)];
            if entry.buf[0] == 0 {
                break;
            }
            scr.putc(b'*');
            put_decimal(scr, (i + 1) as u32);
            puts(scr, b": ");
            for &b in entry.buf.iter() {
                if b == 0 {
                    break;
                }
                scr.putc(b);
            }
        }
        puts(scr, b"\n$ ");
    }

    /// Run the recognizer over the line; on a hit, splice the rendered
    /// result over the matched span and repaint. Returns the splice as
    /// (start, old_len, new_len) so expression mode can fix its bookkeeping.
    fn rewrite_expression(&mut self, scr: &mut dyn Screen) -> Option<(usize, usize, usize)> {
        // Splicing is only well defined while the line sits unwrapped at the
        // buffer start.
        if self.input.e > INPUT_BUF {
            return None;
        }
        let m = expr::find(&self.input.buf)?;
        if m.start + m.len > self.input.e {
            return None;
        }
        let text = m.text();
        let prev_e = self.input.e;
        let init_pos = scr.cursor() as i32;
        let line_start = init_pos - self.arrow - prev_e as i32;

        for i in m.start..m.start + m.len {
            self.input.buf[i] = 0;
        }
        for (k, &b) in text.iter().enumerate() {
            self.input.buf[m.start + k] = b;
        }
        let new_len = text.len();
        let shrink = m.len - new_len;
        let splice_end = m.start + m.len;
        for i in 0..shrink {
            self.shift_out(splice_end - i);
        }
        self.arrow = (m.start + new_len) as i32 - self.input.e as i32;

        scr.set_cursor((line_start + splice_end as i32) as usize);
        self.clear_line(prev_e, scr);
        self.redraw(scr);
        scr.set_cursor((line_start + (m.start + new_len) as i32) as usize);
        Some((m.start, m.len, new_len))
    }

    /// Ctrl-S modal sub-editor. Scratch edits apply to the live line for
    /// display, with every inserted position tracked; Ctrl-F restores the
    /// outer line and replays only the tracked bytes, so an evaluated
    /// expression contributes its result and nothing else.
    fn expr_mode(&mut self, scr: &mut dyn Screen, getc: &mut dyn FnMut() -> Option<u8>) {
        let saved_input = self.input;
        let saved_arrow = self.arrow;
        let mut inserted = [false; INPUT_BUF];

        loop {
            let c = match getc() {
                Some(c) => c,
                None => continue,
            };
            if c == ctrl(b'F') {
                break;
            }
            if c == UP_ARROW || c == DOWN_ARROW || c == ctrl(b'S') {
                continue;
            }

            if c == BACKSPACE && self.arrow == 0 {
                if self.input.e != self.input.w {
                    self.input.e -= 1;
                    self.input.buf[self.input.e % INPUT_BUF] = 0;
                    scr.backspace();
                    inserted[self.input.e % INPUT_BUF] = false;
                }
            } else if c == LEFT_ARROW || c == RIGHT_ARROW {
                self.arrow_key(c, scr);
            } else if self.input.e - self.input.r < INPUT_BUF {
                let c = if c == b'\r' { b'\n' } else { c };
                if self.arrow == 0 {
                    inserted[self.input.e % INPUT_BUF] = true;
                    self.input.buf[self.input.e % INPUT_BUF] = c;
                    self.input.e += 1;
                    scr.putc(c);
                } else {
                    self.edit_mid(c, scr);
                    let at = (self.input.e as i32 + self.arrow) as usize;
                    if c == BACKSPACE || c == DELETE {
                        for i in at.saturating_sub(1)..INPUT_BUF - 1 {
                            inserted[i] = inserted[i + 1];
                        }
                    } else {
                        let mut i = INPUT_BUF - 1;
                        while i > at.saturating_sub(1) {
                            inserted[i] = inserted[i - 1];
                            i -= 1;
                        }
                        inserted[at - 1] = true;
                    }
                }
            }

            if let Some((start, old_len, new_len)) = self.rewrite_expression(scr) {
                // The splice replaced tracked bytes with the result digits:
                // mark those, and slide the tail marks over the shrink.
                let shrink = old_len - new_len;
                for flag in inserted[start..start + new_len].iter_mut() {
                    *flag = true;
                }
                for i in start + new_len..INPUT_BUF - shrink {
                    inserted[i] = inserted[i + shrink];
                }
                for flag in inserted[INPUT_BUF - shrink..].iter_mut() {
                    *flag = false;
                }
            }
        }

        // Leave the mode: wipe the scratch display, restore the outer line,
        // replay the tracked bytes at the outer cursor.
        let scratch = self.input;
        let scratch_e = self.input.e;
        self.clear_line(scratch_e, scr);
        self.input = saved_input;
        self.arrow = saved_arrow;
        let mut at = (self.input.e as i32 + self.arrow) as usize;
        for i in 0..INPUT_BUF {
            if inserted[i] && scratch.buf[i] != 0 {
                self.apply_mid(scratch.buf[i], at);
                at += 1;
            }
        }
        self.redraw(scr);
    }

    // Reader-side operations, called with the console lock held.

    /// Whether the committed region is empty.
    pub fn nothing_committed(&self) -> bool {
        self.input.r == self.input.w
    }

    /// Consume one committed byte.
    pub fn take_byte(&mut self) -> u8 {
        let c = self.input.buf[self.input.r % INPUT_BUF];
        self.input.r += 1;
        c
    }

    /// Put the last taken byte back (EOF deferral).
    pub fn untake_byte(&mut self) {
        self.input.r -= 1;
    }

    /// A newline was consumed: archive the line in the history ring and
    /// reset the edit state. Lines that held nothing but the newline do not
    /// advance the ring.
    pub fn commit_history(&mut self) {
        if self.input.buf[0] != 0 && self.input.buf[0] != b'\n' {
            self.history[hist(self.last_history)] = self.input;
            self.last_history += 1;
        }
        self.current_history = self.last_history;
        self.input = LineBuffer::new();
    }

    #[cfg(test)]
    pub fn history_entry(&self, back: i32) -> &LineBuffer {
        &self.history[hist(self.last_history - back)]
    }
}

fn puts(scr: &mut dyn Screen, bytes: &[u8]) {
    for &b in bytes {
        scr.putc(b);
    }
}

fn put_decimal(scr: &mut dyn Screen, v: u32) {
    if v >= 10 {
        put_decimal(scr, v / 10);
    }
    scr.putc(b'0' + (v % 10) as u8);
}
