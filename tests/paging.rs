#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(borealos::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use borealos::memory::frames::{FrameAllocator, FRAME_ALLOCATOR};
use borealos::memory::pages::page_table::page_table_entry::EntryFlags;
use borealos::memory::pages::paging::ACTIVE_PAGING_CTX;
use borealos::memory::{VirtualAddress, FRAME_PAGE_SIZE};
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

/// A corner of the lower half nothing in the kernel maps.
const TEST_WINDOW: VirtualAddress = 0x4000_0000_0000;

#[test_case]
fn translate_round_trips_through_map() {
    let phys = FRAME_ALLOCATOR.allocate(1).expect("out of memory");
    ACTIVE_PAGING_CTX
        .map(TEST_WINDOW, phys, &FRAME_ALLOCATOR, EntryFlags::WRITABLE)
        .expect("map failed");

    // the offset inside the page must survive the translation
    assert_eq!(ACTIVE_PAGING_CTX.translate(TEST_WINDOW + 0x123), Some(phys + 0x123));
    assert_eq!(ACTIVE_PAGING_CTX.translate(TEST_WINDOW), Some(phys));

    ACTIVE_PAGING_CTX.unmap(TEST_WINDOW, &FRAME_ALLOCATOR);
    assert_eq!(ACTIVE_PAGING_CTX.translate(TEST_WINDOW), None);

    FRAME_ALLOCATOR.free(phys, 1);
}

#[test_case]
fn mapped_memory_is_actually_usable() {
    let phys = FRAME_ALLOCATOR.allocate(1).expect("out of memory");
    ACTIVE_PAGING_CTX
        .map(TEST_WINDOW, phys, &FRAME_ALLOCATOR, EntryFlags::WRITABLE | EntryFlags::NO_EXECUTE)
        .expect("map failed");

    let ptr = TEST_WINDOW as *mut u64;
    unsafe {
        ptr.write_volatile(0xB02EA105_DEADBEEF);
        assert_eq!(ptr.read_volatile(), 0xB02EA105_DEADBEEF);
    }

    ACTIVE_PAGING_CTX.unmap(TEST_WINDOW, &FRAME_ALLOCATOR);
    FRAME_ALLOCATOR.free(phys, 1);
}

#[test_case]
fn unmap_cascade_returns_table_frames() {
    let phys = FRAME_ALLOCATOR.allocate(1).expect("out of memory");

    // the lowest free frame right now; the walk below will consume it for
    // its first intermediate table
    let probe = FRAME_ALLOCATOR.allocate(1).expect("out of memory");
    FRAME_ALLOCATOR.free(probe, 1);

    ACTIVE_PAGING_CTX
        .map(TEST_WINDOW, phys, &FRAME_ALLOCATOR, EntryFlags::WRITABLE)
        .expect("map failed");

    ACTIVE_PAGING_CTX.unmap(TEST_WINDOW, &FRAME_ALLOCATOR);

    // with every intermediate table cascaded back to the allocator, the
    // lowest free frame is again the one the walk grabbed first
    let after = FRAME_ALLOCATOR.allocate(1).expect("out of memory");
    assert_eq!(after, probe);

    FRAME_ALLOCATOR.free(after, 1);
    FRAME_ALLOCATOR.free(phys, 1);
}

#[test_case]
fn neighbouring_pages_do_not_interfere() {
    let phys_a = FRAME_ALLOCATOR.allocate(1).expect("out of memory");
    let phys_b = FRAME_ALLOCATOR.allocate(1).expect("out of memory");

    ACTIVE_PAGING_CTX
        .map(TEST_WINDOW, phys_a, &FRAME_ALLOCATOR, EntryFlags::WRITABLE)
        .expect("map failed");
    ACTIVE_PAGING_CTX
        .map(TEST_WINDOW + FRAME_PAGE_SIZE, phys_b, &FRAME_ALLOCATOR, EntryFlags::WRITABLE)
        .expect("map failed");

    // unmapping one page must leave its neighbour translated
    ACTIVE_PAGING_CTX.unmap(TEST_WINDOW, &FRAME_ALLOCATOR);
    assert_eq!(ACTIVE_PAGING_CTX.translate(TEST_WINDOW), None);
    assert_eq!(ACTIVE_PAGING_CTX.translate(TEST_WINDOW + FRAME_PAGE_SIZE), Some(phys_b));

    ACTIVE_PAGING_CTX.unmap(TEST_WINDOW + FRAME_PAGE_SIZE, &FRAME_ALLOCATOR);

    FRAME_ALLOCATOR.free(phys_a, 1);
    FRAME_ALLOCATOR.free(phys_b, 1);
}
