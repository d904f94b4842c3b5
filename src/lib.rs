#![no_std]
#![cfg_attr(test, no_main)]
#![feature(custom_test_frameworks)]
#![test_runner(crate::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

pub mod acpi;
pub mod data_structures;
pub mod graphics;
pub mod interrupts;
pub mod io_port;
pub mod kernel;
pub mod logger;
pub mod macros;
pub mod memory;
pub mod multiboot2;
pub mod ps2_controller;
pub mod serial;
pub mod time;

use core::arch::asm;
use io_port::IoPort;
use kernel::KERNEL;
use memory::frames::FRAME_ALLOCATOR;
use memory::pages::paging::{PagingContext, ACTIVE_PAGING_CTX};
use multiboot2::boot_loader_name::BootLoaderName;
use multiboot2::cmd_line::CmdLine;
use multiboot2::modules::Modules;
use multiboot2::MbBootInfo;
use ps2_controller::Ps2Controller;

/// Brings the whole core up in dependency order and enables interrupts.
///
/// The tower is strict: the frame allocator needs the boot memory map, the
/// paging switch and the heap need the frame allocator, fault handling needs
/// the GDT/TSS in place before the IDT, and the timers need ACPI and the
/// IDT. Anything above this function (drivers, a future scheduler) can
/// assume all of it is done.
///
/// # Safety
///
/// The caller (the boot assembly) must pass the register values a Multiboot2
/// loader left behind: the magic in `mb_magic` and the physical address of
/// the boot information in `mb_boot_info_addr`. Must only be called once,
/// with interrupts disabled, in long mode, with the loader's page tables
/// (identity plus higher half direct map) still live.
pub unsafe fn init(mb_magic: u64, mb_boot_info_addr: *const u8) {
    log!(ok, "Kernel code started.");

    let mb_info = unsafe { MbBootInfo::new(mb_magic, mb_boot_info_addr) }
        .expect("invalid multiboot2 boot information");

    if let Some(name) = mb_info.get_tag::<BootLoaderName>().and_then(|tag| tag.string().ok()) {
        log!(ok, "Booted by '{}'.", name);
    }
    if let Some(cmd_line) = mb_info.get_tag::<CmdLine>().and_then(|tag| tag.string().ok()) {
        log!(ok, "Command line: '{}'.", cmd_line);
    }

    unsafe { KERNEL.init(mb_info) };
    KERNEL.check_placements().expect("the kernel image and boot info must sit in available RAM");
    log!(ok, "Kernel image spans {:#x}..{:#x}, boot info {:#x}..{:#x}.",
        KERNEL.k_start(), KERNEL.k_end(), KERNEL.mb_start(), KERNEL.mb_end());

    for module in KERNEL.mb_info().get_tags::<Modules>() {
        log!(ok, "Boot module '{}' at {:#x}..{:#x}.",
            module.string().unwrap_or("<bad name>"), module.start(), module.end());
    }

    unsafe { FRAME_ALLOCATOR.init(&KERNEL) }.expect("could not initialize the frame allocator");
    log!(ok, "Frame allocator initialized.");

    unsafe { interrupts::gdt::init() };
    log!(ok, "GDT and TSS loaded, fault stack armed.");

    unsafe { interrupts::init() };
    log!(ok, "IDT loaded, PICs remapped and masked.");

    // from here on the kernel owns its address space; the loader's tables
    // are only the template the kernel context was cloned from
    let kernel_context = PagingContext::new_kernel(&FRAME_ALLOCATOR)
        .expect("could not build the kernel paging context");
    ACTIVE_PAGING_CTX.switch_to(&kernel_context);
    log!(ok, "Switched to the kernel address space.");

    // the heap builds its bins lazily, there is nothing to construct here
    log!(ok, "Kernel heap ready.");

    match acpi::ACPI.init(&*KERNEL.mb_info()) {
        Ok(()) => {}
        Err(err) => log!(warn, "ACPI discovery failed ({:?}), continuing without it.", err),
    }

    time::init();

    if let Err(err) = Ps2Controller::init() {
        log!(warn, "PS/2 controller bring-up failed ({:?}).", err);
    }

    match graphics::console::init(&*KERNEL.mb_info()) {
        Ok(()) => log!(ok, "Framebuffer console up."),
        Err(err) => log!(warn, "No framebuffer console ({:?}).", err),
    }

    interrupts::enable_interrupts();
    log!(ok, "Interrupts enabled, bring-up complete.");
}

/// Halts the cpu forever with interrupts as they are. The panic path ends
/// here after `cli`, so nothing wakes the cpu again.
pub fn hlt() -> ! {
    loop {
        unsafe {
            asm!("hlt", options(nostack, preserves_flags));
        }
    }
}

/// The kernel's steady state: sleep until the next interrupt, dispatch it,
/// sleep again.
pub fn halt_loop() -> ! {
    interrupts::enable_interrupts();
    hlt();
}

/*
 * QEMU test harness. Test images run under the custom test framework, print
 * their results over serial and leave through the isa-debug-exit device.
 */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

pub fn exit_qemu(exit_code: QemuExitCode) -> ! {
    IoPort::write_u32(0xF4, exit_code as u32);

    // isa-debug-exit should have terminated the vm already
    hlt();
}

pub trait Testable {
    fn run(&self);
}

impl<T: Fn()> Testable for T {
    fn run(&self) {
        serial_print!("{}...\t", core::any::type_name::<T>());
        self();
        serial_println!("[ok]");
    }
}

pub fn test_runner(tests: &[&dyn Testable]) {
    serial_println!("Running {} tests", tests.len());
    for test in tests {
        test.run();
    }

    exit_qemu(QemuExitCode::Success);
}

pub fn test_panic_handler(info: &core::panic::PanicInfo) -> ! {
    serial_println!("[failed]");
    serial_println!("Error: {}", info);
    exit_qemu(QemuExitCode::Failed);
}

#[cfg(test)]
mod lib_test_harness {
    use core::panic::PanicInfo;

    /// # Safety
    ///
    /// See [`crate::init`]; called once by the boot assembly.
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn main(mb_magic: u64, mb_boot_info_addr: *const u8) -> ! {
        unsafe { crate::init(mb_magic, mb_boot_info_addr) };
        crate::test_main();
        crate::hlt();
    }

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        crate::test_panic_handler(info);
    }
}
