use crate::{print, serial_print};
use core::fmt;

/// Kernel boot logger.
///
/// Every line goes to the serial port first (it exists before anything else)
/// and to the framebuffer console second (which silently drops writes until
/// it is initialized). The bracket tags use the ANSI SGR subset that the
/// framebuffer console understands.
pub struct LOGGER;

impl LOGGER {
    pub fn ok(fmt: fmt::Arguments) {
        // [  OK  ]
        serial_print!("[\x1b[32m  OK  \x1b[0m] {}\n", fmt);
        print!("[\x1b[32m  OK  \x1b[0m] {}\n", fmt);
    }

    pub fn warn(fmt: fmt::Arguments) {
        // [ WARN ]
        serial_print!("[\x1b[33m WARN \x1b[0m] {}\n", fmt);
        print!("[\x1b[33m WARN \x1b[0m] {}\n", fmt);
    }

    pub fn failed(fmt: fmt::Arguments) {
        // [FAILED]
        serial_print!("[\x1b[31mFAILED\x1b[0m] {}\n", fmt);
        print!("[\x1b[31mFAILED\x1b[0m] {}\n", fmt);
    }

    pub fn debug(fmt: fmt::Arguments) {
        // [ DBG  ]
        serial_print!("[\x1b[35m DBG  \x1b[0m] {}\n", fmt);
        print!("[\x1b[35m DBG  \x1b[0m] {}\n", fmt);
    }
}

#[macro_export]
macro_rules! log {
    ( $method:ident, $($arg:tt)* ) => {{
        use $crate::logger::LOGGER;
        LOGGER::$method(format_args!($($arg)*));
    }};
}
