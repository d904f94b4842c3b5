#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(borealos::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use borealos::interrupts::{self, InterruptContext};
use borealos::memory::frames::{FrameAllocator, FRAME_ALLOCATOR};
use borealos::memory::pages::page_table::page_table_entry::EntryFlags;
use borealos::memory::pages::paging::ACTIVE_PAGING_CTX;
use borealos::memory::{AddrOps, VirtualAddress, FRAME_PAGE_SIZE};
use core::arch::asm;
use core::panic::PanicInfo;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

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

static DIVIDE_HITS: AtomicUsize = AtomicUsize::new(0);
static BREAKPOINT_HITS: AtomicUsize = AtomicUsize::new(0);
static OPCODE_HITS: AtomicUsize = AtomicUsize::new(0);
static LAST_VECTOR: AtomicU64 = AtomicU64::new(u64::MAX);

fn divide_handler(context: &mut InterruptContext) {
    DIVIDE_HITS.fetch_add(1, Ordering::SeqCst);
    LAST_VECTOR.store(context.vector, Ordering::SeqCst);
}

fn breakpoint_handler(context: &mut InterruptContext) {
    BREAKPOINT_HITS.fetch_add(1, Ordering::SeqCst);
    LAST_VECTOR.store(context.vector, Ordering::SeqCst);
}

fn opcode_handler(context: &mut InterruptContext) {
    OPCODE_HITS.fetch_add(1, Ordering::SeqCst);
    LAST_VECTOR.store(context.vector, Ordering::SeqCst);
}

#[test_case]
fn registered_handlers_see_their_vector_once() {
    interrupts::register_exception(0, divide_handler);
    interrupts::register_exception(3, breakpoint_handler);
    interrupts::register_exception(6, opcode_handler);

    unsafe { asm!("int 0") };
    assert_eq!(DIVIDE_HITS.load(Ordering::SeqCst), 1);
    assert_eq!(LAST_VECTOR.load(Ordering::SeqCst), 0);

    unsafe { asm!("int 3") };
    assert_eq!(BREAKPOINT_HITS.load(Ordering::SeqCst), 1);
    assert_eq!(LAST_VECTOR.load(Ordering::SeqCst), 3);

    unsafe { asm!("int 6") };
    assert_eq!(OPCODE_HITS.load(Ordering::SeqCst), 1);
    assert_eq!(LAST_VECTOR.load(Ordering::SeqCst), 6);

    // nothing fired twice
    assert_eq!(DIVIDE_HITS.load(Ordering::SeqCst), 1);
    assert_eq!(BREAKPOINT_HITS.load(Ordering::SeqCst), 1);

    interrupts::clear_exception(0);
    interrupts::clear_exception(3);
    interrupts::clear_exception(6);
}

#[test_case]
fn self_test_mode_swallows_unhandled_exceptions() {
    // no handler registered: outside self test mode this would be fatal
    interrupts::with_self_test_mode(|| {
        unsafe { asm!("int 0") };
        unsafe { asm!("int 3") };
    });

    let hits = interrupts::self_test_hits();
    assert!(hits & (1 << 0) != 0);
    assert!(hits & (1 << 3) != 0);
    assert!(hits & (1 << 6) == 0);

    assert!(!interrupts::self_test_active());
}

static PAGE_FAULT_HITS: AtomicUsize = AtomicUsize::new(0);
static FAULT_TARGET: AtomicU64 = AtomicU64::new(0);

/// Fixes the fault up by mapping the missing page, so the faulting read
/// restarts and succeeds.
fn demand_map_handler(context: &mut InterruptContext) {
    PAGE_FAULT_HITS.fetch_add(1, Ordering::SeqCst);
    assert_eq!(context.vector, 14);

    let cr2: u64;
    unsafe { asm!("mov {}, cr2", out(reg) cr2, options(nostack, preserves_flags)) };
    assert_eq!(cr2, FAULT_TARGET.load(Ordering::SeqCst));

    let page = (cr2 as VirtualAddress).align_down(FRAME_PAGE_SIZE);
    let phys = FRAME_ALLOCATOR.allocate(1).expect("out of memory");
    ACTIVE_PAGING_CTX
        .map(page, phys, &FRAME_ALLOCATOR, EntryFlags::WRITABLE | EntryFlags::NO_EXECUTE)
        .expect("map failed");
}

#[test_case]
fn page_fault_enters_the_registered_handler() {
    const FAULT_WINDOW: VirtualAddress = 0x5000_0000_0000;

    interrupts::register_exception(14, demand_map_handler);
    FAULT_TARGET.store(FAULT_WINDOW as u64, Ordering::SeqCst);

    // this read faults, the handler maps the page, the read completes
    // (the backing frame is not zeroed, the value itself is arbitrary)
    let _value = unsafe { (FAULT_WINDOW as *const u64).read_volatile() };
    assert_eq!(PAGE_FAULT_HITS.load(Ordering::SeqCst), 1);

    // the fixed up mapping is a normal page now
    unsafe {
        (FAULT_WINDOW as *mut u64).write_volatile(0x1234_5678_9ABC_DEF0);
        assert_eq!((FAULT_WINDOW as *const u64).read_volatile(), 0x1234_5678_9ABC_DEF0);
    }

    interrupts::clear_exception(14);

    let phys = ACTIVE_PAGING_CTX.translate(FAULT_WINDOW).expect("the handler mapped this");
    ACTIVE_PAGING_CTX.unmap(FAULT_WINDOW, &FRAME_ALLOCATOR);
    FRAME_ALLOCATOR.free(phys.align_down(FRAME_PAGE_SIZE), 1);
}

static TICK_PROBE: AtomicUsize = AtomicUsize::new(0);

fn probe_irq_handler(_context: &mut InterruptContext) {
    TICK_PROBE.fetch_add(1, Ordering::SeqCst);
}

#[test_case]
fn free_irq_lines_accept_a_handler() {
    // line 5 is unused by the core; registering must unmask it, clearing
    // must mask it again (no interrupt is expected to arrive on it)
    interrupts::register_irq(5, probe_irq_handler);
    interrupts::clear_irq(5);
    assert_eq!(TICK_PROBE.load(Ordering::SeqCst), 0);
}
