
#[macro_export]
macro_rules! println {
    ( $fmt:expr, $($arg:tt)* ) => {{ use $crate::print; print!(concat!($fmt, "\n"), $($arg)*) }};
    ( $fmt:expr ) => {{ use $crate::print; print!(concat!($fmt, "\n")) }};
    () => {{ use $crate::print; print!("\n") }};
}

/// Prints to the framebuffer console. Before the console is brought up this
/// is a no-op, so callers do not need to care about bring-up order.
#[macro_export]
macro_rules! print {
    ( $($arg:tt)* ) => {{
        $crate::graphics::console::_console_print(format_args!($($arg)*));
    }};
}
