#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(borealos::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use borealos::memory::heap::{AllocateMode, HEAP_ALLOCATOR};
use borealos::memory::pages::page_table::page_table_entry::EntryFlags;
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

const DATA_FLAGS: EntryFlags = EntryFlags::WRITABLE.union(EntryFlags::NO_EXECUTE);

#[test_case]
fn drained_heap_reuses_identical_addresses() {
    // one allocation per interesting class plus a huge one, fully drained
    // and repeated: the second round must land on the same addresses
    let a = HEAP_ALLOCATOR.allocate(64, 0, DATA_FLAGS, AllocateMode::Normal);
    let b = HEAP_ALLOCATOR.allocate(128, 0, DATA_FLAGS, AllocateMode::Normal);
    let c = HEAP_ALLOCATOR.allocate(4096, 0, DATA_FLAGS, AllocateMode::Normal);
    let d = HEAP_ALLOCATOR.allocate(8192, 0, DATA_FLAGS, AllocateMode::Zeroed);
    assert!(a != 0 && b != 0 && c != 0 && d != 0);

    for offset in 0..8192 {
        assert_eq!(unsafe { *((d + offset) as *const u8) }, 0);
    }

    HEAP_ALLOCATOR.free(a, 64);
    HEAP_ALLOCATOR.free(b, 128);
    HEAP_ALLOCATOR.free(c, 4096);
    HEAP_ALLOCATOR.free(d, 8192);

    let a2 = HEAP_ALLOCATOR.allocate(64, 0, DATA_FLAGS, AllocateMode::Normal);
    let b2 = HEAP_ALLOCATOR.allocate(128, 0, DATA_FLAGS, AllocateMode::Normal);
    let c2 = HEAP_ALLOCATOR.allocate(4096, 0, DATA_FLAGS, AllocateMode::Normal);
    let d2 = HEAP_ALLOCATOR.allocate(8192, 0, DATA_FLAGS, AllocateMode::Normal);

    assert_eq!(a2, a);
    assert_eq!(b2, b);
    assert_eq!(c2, c);
    assert_eq!(d2, d);

    HEAP_ALLOCATOR.free(a2, 64);
    HEAP_ALLOCATOR.free(b2, 128);
    HEAP_ALLOCATOR.free(c2, 4096);
    HEAP_ALLOCATOR.free(d2, 8192);
}

#[test_case]
fn freed_block_is_the_next_handed_out() {
    let first = HEAP_ALLOCATOR.allocate(64, 0, DATA_FLAGS, AllocateMode::Normal);
    let second = HEAP_ALLOCATOR.allocate(64, 0, DATA_FLAGS, AllocateMode::Normal);
    assert!(first != 0 && second != 0);

    // the free list is LIFO, the freed block comes right back
    HEAP_ALLOCATOR.free(first, 64);
    let third = HEAP_ALLOCATOR.allocate(64, 0, DATA_FLAGS, AllocateMode::Normal);
    assert_eq!(third, first);

    HEAP_ALLOCATOR.free(second, 64);
    HEAP_ALLOCATOR.free(third, 64);
}

#[test_case]
fn zeroed_small_allocations_are_zero() {
    // dirty a block, free it, and demand it back clean
    let dirty = HEAP_ALLOCATOR.allocate(256, 0, DATA_FLAGS, AllocateMode::Normal);
    unsafe { core::ptr::write_bytes(dirty as *mut u8, 0xAE, 256) };
    HEAP_ALLOCATOR.free(dirty, 256);

    let clean = HEAP_ALLOCATOR.allocate(256, 0, DATA_FLAGS, AllocateMode::Zeroed);
    assert_eq!(clean, dirty);
    for offset in 0..256 {
        assert_eq!(unsafe { *((clean + offset) as *const u8) }, 0);
    }

    HEAP_ALLOCATOR.free(clean, 256);
}

#[test_case]
fn odd_sizes_share_their_class() {
    let a = HEAP_ALLOCATOR.allocate(48, 0, DATA_FLAGS, AllocateMode::Normal);
    assert!(a != 0);
    HEAP_ALLOCATOR.free(a, 48);

    let b = HEAP_ALLOCATOR.allocate(48, 0, DATA_FLAGS, AllocateMode::Normal);
    assert_eq!(b, a);
    HEAP_ALLOCATOR.free(b, 48);
}

#[test_case]
fn zero_sized_allocation_returns_null() {
    assert_eq!(HEAP_ALLOCATOR.allocate(0, 0, DATA_FLAGS, AllocateMode::Normal), 0);
}

#[test_case]
fn simple_allocation() {
    let a = Box::new(42);
    let b = String::from("Hello, World!");
    assert_eq!(*a, 42);
    assert_eq!(b, "Hello, World!");
}

#[test_case]
fn large_vector() {
    let n = 1000;
    let mut vec = Vec::new();
    for i in 0..n {
        vec.push(i);
    }

    assert_eq!(vec.len(), n);
    for (i, &item) in vec.iter().enumerate() {
        assert_eq!(item, i);
    }

    // check the sum of the 'n' numbers
    assert_eq!(vec.iter().sum::<usize>(), (n - 1) * n / 2);
}

#[derive(Debug)]
#[repr(align(16))]
struct Aligned16(u64);

#[test_case]
fn bigger_alignment() {
    let a = Box::new(Aligned16(13));
    assert_eq!((*a).0, 13);
    assert_eq!(&*a as *const Aligned16 as usize % 16, 0);
}

#[test_case]
fn deallocation() {
    let addr: *const i32;
    {
        let a = Box::new(42);
        addr = &*a;
    }

    // allocate another Box with the same size class
    let b: Box<u64> = Box::new(13);
    assert_eq!(addr, &*b as *const u64 as *const i32);
}
