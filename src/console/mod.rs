//! Console device glue.
//!
//! Owns the shared line editor behind the console lock, binds blocking
//! read / non-blocking write into the device switch, and forwards every
//! output byte to both the CGA screen and the UART. The keyboard interrupt
//! funnels bytes in through `intr`.

pub mod editor;
pub mod expr;

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::cpu;
use crate::error::{KError, KResult};
use crate::file::{self, Dev, CONSOLE as CONSOLE_MAJOR};
use crate::sched::{self, Chan};
use crate::sync::SpinLock;
use crate::{serial, vga};

use editor::{ctrl, Event, LineEditor, Screen};

pub static CONSOLE: SpinLock<LineEditor> = SpinLock::new("console", LineEditor::new());

/// Once set, console output on every CPU freezes (panic in progress).
static PANICKED: AtomicBool = AtomicBool::new(false);

/// Freeze console output on all other CPUs. Called by the panic handler
/// after it has printed its message.
pub fn freeze() {
    PANICKED.store(true, Ordering::SeqCst);
}

/// Write one byte to both sinks: UART first (with the erase sequence for
/// backspace), then the CGA cell update.
pub fn putc(c: u8) {
    if PANICKED.load(Ordering::SeqCst) {
        cpu::intr_off();
        loop {}
    }
    serial::put(c);
    vga::putc(c);
}

fn erase_one() {
    if PANICKED.load(Ordering::SeqCst) {
        cpu::intr_off();
        loop {}
    }
    serial::put(0x08);
    serial::put(b' ');
    serial::put(0x08);
    vga::erase_back();
}

/// The editor's view of the hardware: CGA cursor model plus UART echo.
struct HwScreen;

impl Screen for HwScreen {
    fn putc(&mut self, c: u8) {
        putc(c);
    }

    fn backspace(&mut self) {
        erase_one();
    }

    fn cursor(&self) -> usize {
        vga::cursor()
    }

    fn set_cursor(&mut self, pos: usize) {
        vga::set_cursor(pos);
    }
}

/// Keyboard interrupt body: drain the scancode producer into the editor.
/// ^P is deferred until the console lock is dropped, since the process dump
/// prints through the console itself.
pub fn intr(mut getc: impl FnMut() -> Option<u8>) {
    let mut dump_requested = false;
    let ed = CONSOLE.acquire();
    let mut scr = HwScreen;
    while let Some(c) = getc() {
        if c == ctrl(b'P') {
            dump_requested = true;
            continue;
        }
        if ed.keystroke(c, &mut scr, &mut getc) == Event::Committed {
            sched::wakeup(Chan::ConsoleRead);
        }
    }
    CONSOLE.release();
    if dump_requested {
        sched::procdump();
    }
}

/// Blocking console read. Returns at a newline, at EOF (^D), or when `dst`
/// fills; a killed process gets an error instead of data.
fn console_read(dst: &mut [u8]) -> KResult<usize> {
    let target = dst.len();
    let mut n = dst.len();
    let ed = CONSOLE.acquire();
    while n > 0 {
        while ed.nothing_committed() {
            if sched::current_killed() {
                CONSOLE.release();
                return Err(KError::Killed);
            }
            sched::sleep(Chan::ConsoleRead, &CONSOLE);
        }
        let c = ed.take_byte();
        if c == ctrl(b'D') {
            if n < target {
                // Keep the EOF so the next read returns 0 bytes.
                ed.untake_byte();
            }
            break;
        }
        dst[target - n] = c;
        n -= 1;
        if c == b'\n' {
            ed.commit_history();
            break;
        }
    }
    CONSOLE.release();
    Ok(target - n)
}

/// Non-blocking console write.
fn console_write(src: &[u8]) -> KResult<usize> {
    CONSOLE.acquire();
    for &b in src {
        putc(b);
    }
    CONSOLE.release();
    Ok(src.len())
}

/// Bind the console into the device switch.
pub fn init() {
    file::register_dev(
        CONSOLE_MAJOR,
        Dev {
            read: console_read,
            write: console_write,
        },
    );
}

struct Sink;

impl fmt::Write for Sink {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            putc(b);
        }
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    let _ = Sink.write_fmt(args);
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::console::_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
