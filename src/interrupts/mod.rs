//! 8259 PIC glue and the interrupt entry points.
//!
//! Trap dispatch (IDT, vector stubs, privilege plumbing) is an external
//! collaborator; it calls `timer_interrupt` / `keyboard_interrupt` with the
//! faulting context already saved.

use pic8259::ChainedPics;
use spin::Mutex;

use crate::{clock, console, sched};
use crate::drivers::keyboard;

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

pub const IRQ_TIMER: u8 = PIC_1_OFFSET;
pub const IRQ_KEYBOARD: u8 = PIC_1_OFFSET + 1;

pub static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

pub fn init() {
    unsafe { PICS.lock().initialize() };
    crate::log_info!("PIC remapped to {}..{}.", PIC_1_OFFSET, PIC_2_OFFSET + 8);
}

/// Timer tick: advance the clock, age starving processes, then let the
/// running process's quantum decision fire with no locks held.
pub fn timer_interrupt() {
    clock::tick();
    sched::age();
    unsafe { PICS.lock().notify_end_of_interrupt(IRQ_TIMER) };
    sched::yield_now();
}

/// Keyboard: feed the console editor straight from the controller.
pub fn keyboard_interrupt() {
    console::intr(keyboard::getc);
    unsafe { PICS.lock().notify_end_of_interrupt(IRQ_KEYBOARD) };
}
