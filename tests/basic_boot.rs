#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(borealos::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use borealos::{log, println, serial_println};
use core::panic::PanicInfo;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    borealos::test_panic_handler(info);
}

/// # Safety
///
/// Called once by the boot assembly with the Multiboot2 register values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn main(mb_magic: u64, mb_boot_info_addr: *const u8) -> ! {
    unsafe { borealos::init(mb_magic, mb_boot_info_addr) };
    test_main();
    borealos::hlt();
}

#[test_case]
fn serial_output_works() {
    serial_println!("serial output from a test image");
}

#[test_case]
fn console_output_does_not_block() {
    // goes to the framebuffer console when one exists, no-op otherwise
    println!("console output from a test image");
}

#[test_case]
fn logger_levels_work() {
    log!(ok, "log line from a test image");
    log!(warn, "warning line from a test image");
    log!(debug, "debug line from a test image");
}

#[test_case]
fn raw_console_interface_does_not_block() {
    use borealos::graphics::console::{console_clear, console_set_color, console_write};
    use borealos::graphics::console::{DEFAULT_BG, DEFAULT_FG};

    console_write(b"raw bytes with \x1b[36mcolor\x1b[0m\n");
    console_set_color(DEFAULT_FG, DEFAULT_BG);
    console_clear();
}
