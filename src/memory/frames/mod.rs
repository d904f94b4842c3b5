pub mod bitmap_frame_allocator;

use super::{PhysicalAddress, FRAME_PAGE_SIZE};
use bitmap_frame_allocator::BitmapFrameAllocator;

/// The global frame allocator. Initialized once during bring-up, before
/// paging and the heap (both allocate their tables and backing pages here).
pub static FRAME_ALLOCATOR: BitmapFrameAllocator<'static> = BitmapFrameAllocator::new();

#[repr(transparent)]
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug)]
pub struct Frame(pub(crate) usize); // this usize is the frame index in the physical memory

impl Frame {
    pub fn from_phy_addr(addr: PhysicalAddress) -> Frame {
        Frame(addr / FRAME_PAGE_SIZE)
    }

    pub fn addr(&self) -> PhysicalAddress {
        self.0 * FRAME_PAGE_SIZE
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

/// Page granular physical memory management.
///
/// Allocation failure is an `Option::None` and the caller decides how bad
/// that is. Contract violations (freeing what was never handed out, touching
/// reserved frames, misaligned addresses, zero-length requests) panic.
///
/// # Safety
///
/// Whoever implements this must ensure its correctness since the compiler has
/// no way of ensuring that physical memory will be correctly managed.
pub unsafe trait FrameAllocator: Send + Sync {
    /// Marks `n_frames` starting at `start` as permanently unavailable.
    fn reserve(&self, start: PhysicalAddress, n_frames: usize);

    /// Returns the base of the lowest run of `n_frames` contiguous
    /// free-and-unreserved frames, or **None** if no such run exists.
    fn allocate(&self, n_frames: usize) -> Option<PhysicalAddress>;

    /// Releases `n_frames` starting at `start`.
    fn free(&self, start: PhysicalAddress, n_frames: usize);

    fn is_allocated(&self, frame: Frame) -> bool;
    fn is_reserved(&self, frame: Frame) -> bool;

    /// Single frame convenience used all over the paging code.
    fn allocate_frame(&self) -> Option<Frame> {
        self.allocate(1).map(Frame::from_phy_addr)
    }

    /// Single frame convenience used all over the paging code.
    fn free_frame(&self, frame: Frame) {
        self.free(frame.addr(), 1);
    }
}
