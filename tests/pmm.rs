#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(borealos::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use borealos::memory::frames::{Frame, FrameAllocator, FRAME_ALLOCATOR};
use borealos::memory::FRAME_PAGE_SIZE;
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

fn frame_of(addr: usize) -> Frame {
    Frame::from_phy_addr(addr)
}

#[test_case]
fn allocations_are_frame_aligned_and_marked() {
    let addr = FRAME_ALLOCATOR.allocate(1).expect("out of memory");
    assert_eq!(addr % FRAME_PAGE_SIZE, 0);
    assert!(FRAME_ALLOCATOR.is_allocated(frame_of(addr)));
    assert!(!FRAME_ALLOCATOR.is_reserved(frame_of(addr)));

    FRAME_ALLOCATOR.free(addr, 1);
    assert!(!FRAME_ALLOCATOR.is_allocated(frame_of(addr)));
}

#[test_case]
fn live_allocations_are_disjoint() {
    let a = FRAME_ALLOCATOR.allocate(4).expect("out of memory");
    let b = FRAME_ALLOCATOR.allocate(4).expect("out of memory");

    let a_range = a..a + 4 * FRAME_PAGE_SIZE;
    let b_range = b..b + 4 * FRAME_PAGE_SIZE;
    assert!(a_range.end <= b_range.start || b_range.end <= a_range.start);

    for i in 0..4 {
        assert!(FRAME_ALLOCATOR.is_allocated(frame_of(a + i * FRAME_PAGE_SIZE)));
        assert!(FRAME_ALLOCATOR.is_allocated(frame_of(b + i * FRAME_PAGE_SIZE)));
    }

    FRAME_ALLOCATOR.free(a, 4);
    FRAME_ALLOCATOR.free(b, 4);
}

#[test_case]
fn multi_frame_runs_are_contiguous() {
    // a 10 MiB run, all of it must be writable and marked allocated
    let n_frames = 2560;
    let base = FRAME_ALLOCATOR.allocate(n_frames).expect("out of memory");

    let first = base / FRAME_PAGE_SIZE;
    assert!(FRAME_ALLOCATOR.is_allocated(Frame::from_phy_addr(base)));
    assert!(FRAME_ALLOCATOR.is_allocated(frame_of((first + n_frames - 1) * FRAME_PAGE_SIZE)));
    assert!(!FRAME_ALLOCATOR.is_allocated(frame_of((first + n_frames) * FRAME_PAGE_SIZE)));

    FRAME_ALLOCATOR.free(base, n_frames);
}

#[test_case]
fn freed_runs_are_reused_exactly() {
    let base = FRAME_ALLOCATOR.allocate(2560).expect("out of memory");
    FRAME_ALLOCATOR.free(base, 2560);

    let again = FRAME_ALLOCATOR.allocate(2560).expect("out of memory");
    assert_eq!(again, base);
    FRAME_ALLOCATOR.free(again, 2560);
}

#[test_case]
fn lowest_suitable_run_wins() {
    // free the lower of two equal allocations; the next one must land there
    let a = FRAME_ALLOCATOR.allocate(2).expect("out of memory");
    let b = FRAME_ALLOCATOR.allocate(2).expect("out of memory");
    assert!(a < b);

    FRAME_ALLOCATOR.free(a, 2);
    let c = FRAME_ALLOCATOR.allocate(2).expect("out of memory");
    assert_eq!(c, a);

    FRAME_ALLOCATOR.free(b, 2);
    FRAME_ALLOCATOR.free(c, 2);
}

#[test_case]
fn obstacles_reset_the_run_scan() {
    // a 2 frame hole cannot satisfy a 4 frame request crossing allocated
    // frames, the run has to restart past the obstacle
    let a = FRAME_ALLOCATOR.allocate(2).expect("out of memory");
    let b = FRAME_ALLOCATOR.allocate(2).expect("out of memory");
    FRAME_ALLOCATOR.free(a, 2);

    let c = FRAME_ALLOCATOR.allocate(4).expect("out of memory");
    assert!(c > b);

    FRAME_ALLOCATOR.free(b, 2);
    FRAME_ALLOCATOR.free(c, 4);
}

#[test_case]
fn mass_is_conserved_over_matched_frees() {
    // snapshot a window of frames, run a few allocate/free cycles, then
    // check that every frame in the window reads exactly as before
    let probe = FRAME_ALLOCATOR.allocate(1).expect("out of memory");
    FRAME_ALLOCATOR.free(probe, 1);
    let window = probe / FRAME_PAGE_SIZE;

    let mut before = [false; 64];
    for (i, slot) in before.iter_mut().enumerate() {
        *slot = FRAME_ALLOCATOR.is_allocated(Frame::from_phy_addr((window + i) * FRAME_PAGE_SIZE));
    }

    let a = FRAME_ALLOCATOR.allocate(8).expect("out of memory");
    let b = FRAME_ALLOCATOR.allocate(3).expect("out of memory");
    let c = FRAME_ALLOCATOR.allocate(16).expect("out of memory");
    FRAME_ALLOCATOR.free(b, 3);
    FRAME_ALLOCATOR.free(c, 16);
    FRAME_ALLOCATOR.free(a, 8);

    for (i, expected) in before.iter().enumerate() {
        let now = FRAME_ALLOCATOR.is_allocated(Frame::from_phy_addr((window + i) * FRAME_PAGE_SIZE));
        assert_eq!(now, *expected);
    }
}

#[test_case]
fn reserved_frames_are_never_handed_out() {
    // find the lowest free frame, reserve it, and make sure the allocator
    // steps over it from then on
    let probe = FRAME_ALLOCATOR.allocate(1).expect("out of memory");
    FRAME_ALLOCATOR.free(probe, 1);

    FRAME_ALLOCATOR.reserve(probe, 1);
    assert!(FRAME_ALLOCATOR.is_reserved(Frame::from_phy_addr(probe)));

    let next = FRAME_ALLOCATOR.allocate(1).expect("out of memory");
    assert_ne!(next, probe);
    FRAME_ALLOCATOR.free(next, 1);
}
