
#[macro_export]
macro_rules! serial_println {
    ( $fmt:expr, $($arg:tt)* ) => {{
        use $crate::serial_print;
        serial_print!(concat!($fmt, "\n"), $($arg)*);
    }};

    ( $fmt:expr ) => {{
        use $crate::serial_print;
        serial_print!(concat!($fmt, "\n"));
    }};

    () => {{
        use $crate::serial_print;
        serial_print!("\n");
    }};
}

#[macro_export]
macro_rules! serial_print {
    ( $($arg:tt)* ) => {{
        $crate::serial::_serial_print(format_args!($($arg)*));
    }};
}
