#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(borealos::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use borealos::graphics::console::CONSOLE;
use borealos::serial::SERIAL_PORT;
use borealos::{interrupts, log, println};
use core::panic::PanicInfo;

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    interrupts::disable_interrupts();

    // the panic may have happened with either output lock held; both sinks
    // are single-cpu and never resume, so stealing the locks is safe here
    unsafe {
        SERIAL_PORT.force_unlock();
        CONSOLE.force_unlock();
    }

    log!(failed, "Kernel panic!");
    println!("{}", info);
    borealos::serial_println!("{}", info);

    borealos::hlt();
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    borealos::test_panic_handler(info);
}

/// # Safety
///
/// The caller (the boot assembly) must pass the Multiboot2 magic and info
/// pointer the loader left in the entry registers, and may only call this
/// once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn main(mb_magic: u64, mb_boot_info_addr: *const u8) -> ! {
    unsafe { borealos::init(mb_magic, mb_boot_info_addr) };

    #[cfg(test)]
    test_main();

    log!(ok, "Entering the idle loop.");
    borealos::halt_loop();
}
