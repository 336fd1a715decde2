//! 16550 UART at the primary COM port. Console output mirrors every byte
//! here; the tagged log macros write here only.

use lazy_static::lazy_static;
use spin::Mutex;
use x86_64::instructions::port::Port;

const COM1: u16 = 0x3F8;

pub struct SerialPort {
    data: Port<u8>,
    int_en: Port<u8>,
    fifo_ctrl: Port<u8>,
    line_ctrl: Port<u8>,
    modem_ctrl: Port<u8>,
    line_status: Port<u8>,
}

impl SerialPort {
    const unsafe fn new(base: u16) -> SerialPort {
        SerialPort {
            data: Port::new(base),
            int_en: Port::new(base + 1),
            fifo_ctrl: Port::new(base + 2),
            line_ctrl: Port::new(base + 3),
            modem_ctrl: Port::new(base + 4),
            line_status: Port::new(base + 5),
        }
    }

    /// 38400 baud, 8N1, FIFOs on, receive interrupts enabled.
    fn init(&mut self) {
        unsafe {
            self.int_en.write(0x00);
            self.line_ctrl.write(0x80);
            self.data.write(0x03);
            self.int_en.write(0x00);
            self.line_ctrl.write(0x03);
            self.fifo_ctrl.write(0xC7);
            self.modem_ctrl.write(0x0B);
            self.int_en.write(0x01);
        }
    }

    pub fn send(&mut self, byte: u8) {
        unsafe {
            while self.line_status.read() & 0x20 == 0 {}
            self.data.write(byte);
        }
    }
}

impl core::fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for byte in s.bytes() {
            self.send(byte);
        }
        Ok(())
    }
}

lazy_static! {
    pub static ref SERIAL1: Mutex<SerialPort> = {
        let mut port = unsafe { SerialPort::new(COM1) };
        port.init();
        Mutex::new(port)
    };
}

/// Raw byte out, for the console's dual-sink path.
pub fn put(byte: u8) {
    SERIAL1.lock().send(byte);
}

#[doc(hidden)]
pub fn _log(args: ::core::fmt::Arguments) {
    use core::fmt::Write;
    let _ = SERIAL1.lock().write_fmt(args);
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::serial::_log(format_args!("[INFO] "));
        $crate::serial::_log(format_args!($($arg)*));
        $crate::serial::_log(format_args!("\n"));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::serial::_log(format_args!("[WARN] "));
        $crate::serial::_log(format_args!($($arg)*));
        $crate::serial::_log(format_args!("\n"));
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::serial::_log(format_args!("[ERROR] "));
        $crate::serial::_log(format_args!($($arg)*));
        $crate::serial::_log(format_args!("\n"));
    };
}

pub fn init() {
    let _ = SERIAL1.lock();
}
