//! PS/2 keyboard driver. The interrupt path polls the 8042 controller
//! directly: the console's modal sub-editor keeps calling `getc` from
//! inside the handler, so bytes must come straight off the port rather
//! than through a queue no further interrupt could refill.

pub mod scancodes;

use lazy_static::lazy_static;
use spin::Mutex;
use x86_64::instructions::port::Port;

use scancodes::Decoder;

const STATUS_PORT: u16 = 0x64;
const DATA_PORT: u16 = 0x60;
/// Output-buffer-full bit in the 8042 status register.
const OUT_FULL: u8 = 0x01;

lazy_static! {
    static ref DECODER: Mutex<Decoder> = Mutex::new(Decoder::new());
}

/// One decoded byte, or None when the controller has nothing (or the
/// scancode was modifier traffic).
pub fn getc() -> Option<u8> {
    let mut status: Port<u8> = Port::new(STATUS_PORT);
    let mut data: Port<u8> = Port::new(DATA_PORT);
    let scancode = unsafe {
        if status.read() & OUT_FULL == 0 {
            return None;
        }
        data.read()
    };
    DECODER.lock().decode(scancode)
}

pub fn init() {
    // Drain any scancode left over from the controller's power-on state.
    let mut status: Port<u8> = Port::new(STATUS_PORT);
    let mut data: Port<u8> = Port::new(DATA_PORT);
    unsafe {
        if status.read() & OUT_FULL != 0 {
            let _ = data.read();
        }
    }
    crate::log_info!("PS/2 keyboard driver initialized.");
}
