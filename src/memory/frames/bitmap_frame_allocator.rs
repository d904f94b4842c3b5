use crate::data_structures::bitmap_ref_mut::BitmapRefMut;
use crate::kernel::Kernel;
use crate::memory::{phys_to_virt, AddrOps, MemoryError, PhysicalAddress, FRAME_PAGE_SIZE};
use crate::multiboot2::memory_map::{MemoryMap, MemoryMapEntryType};
use crate::multiboot2::modules::Modules;
use crate::{assert_called_once, serial_println};
use super::{Frame, FrameAllocator};
use spin::Mutex;

/// Everything below 1MiB stays reserved no matter what the memory map says.
/// The BIOS data area, the EBDA and a few legacy MMIO holes live there.
const LOW_MEMORY_END: PhysicalAddress = 1024 * 1024;

struct BitmapFrameAllocatorInner<'a> {
    // bit set -> frame may never be handed out
    reserved: Option<BitmapRefMut<'a>>,

    // bit set -> frame is currently handed out
    allocated: Option<BitmapRefMut<'a>>,

    // frames in [0, managed_frames) are covered by both bitmaps
    managed_frames: usize,
}

pub struct BitmapFrameAllocator<'a>(Mutex<BitmapFrameAllocatorInner<'a>>);

impl<'a> BitmapFrameAllocator<'a> {
    pub const fn new() -> Self {
        BitmapFrameAllocator(Mutex::new(BitmapFrameAllocatorInner {
            reserved: None,
            allocated: None,
            managed_frames: 0,
        }))
    }

    /// Builds the two bitmaps from the boot memory map and marks everything
    /// the kernel must never allocate over: low memory, the kernel image,
    /// the boot info, the boot modules and the bitmaps themselves.
    ///
    /// # Safety
    ///
    /// Resets the frame allocator state, so it must be called exactly once
    /// and before any allocation.
    ///
    /// # Panics
    ///
    /// If called more than once.
    pub unsafe fn init(&self, kernel: &Kernel) -> Result<(), MemoryError> {
        assert_called_once!("Cannot call BitmapFrameAllocator::init() more than once");

        let inner = &mut *self.0.lock();
        let mb_info = kernel.mb_info();
        let mem_map = mb_info.get_tag::<MemoryMap>().ok_or(MemoryError::MemoryMapMbTagDoesNotExist)?;
        let mem_map_entries = mem_map.entries().map_err(MemoryError::MemoryMapErr)?;

        // the bitmaps are indexed by absolute frame index, so they must reach
        // up to the end of the highest usable area
        let managed_frames = mem_map_entries.into_iter()
            .filter(|entry| entry.entry_type() == MemoryMapEntryType::AvailableRAM)
            .map(|entry| (entry.base_addr + entry.length) as usize / FRAME_PAGE_SIZE)
            .max()
            .ok_or(MemoryError::NotEnoughPhyMemory)?;

        let bitmap_bytes = (managed_frames.div_ceil(8)).align_up(FRAME_PAGE_SIZE);
        let storage_bytes = bitmap_bytes * 2; // one bitmap for reserved and one for allocated
        serial_println!("frame allocator: {} managed frames, 2x{} bitmap bytes", managed_frames, bitmap_bytes);

        let storage = Self::find_bitmap_storage(kernel, &*mb_info, storage_bytes)
            .ok_or(MemoryError::NoBitmapPlacement)?;
        assert!(storage.is_aligned(FRAME_PAGE_SIZE));
        serial_println!("frame allocator: bitmaps placed at {:#x}", storage);

        // the bitmaps live in physical memory that paging never unmaps, so
        // they are addressed through the higher half direct map
        let mut reserved = unsafe {
            BitmapRefMut::from_raw_parts_mut(phys_to_virt(storage) as *mut u8, bitmap_bytes, Some(managed_frames))
        };
        let allocated = unsafe {
            BitmapRefMut::from_raw_parts_mut(phys_to_virt(storage + bitmap_bytes) as *mut u8, bitmap_bytes, Some(managed_frames))
        };

        // start from everything-reserved and punch out the usable areas
        reserved.fill(true);
        for entry in mem_map_entries.into_iter()
            .filter(|entry| entry.entry_type() == MemoryMapEntryType::AvailableRAM)
        {
            let first = entry.aligned_base_addr(FRAME_PAGE_SIZE) as usize / FRAME_PAGE_SIZE;
            let count = entry.aligned_length(FRAME_PAGE_SIZE) as usize / FRAME_PAGE_SIZE;
            reserved.set_range(first, count, false);
        }

        // low memory is never handed out
        reserved.set_range(0, LOW_MEMORY_END / FRAME_PAGE_SIZE, true);

        // the kernel image, the mb2 info and the null guard frame
        for range in kernel.prohibited_memory_ranges() {
            let first = range.start_addr().align_down(FRAME_PAGE_SIZE) / FRAME_PAGE_SIZE;
            let last  = range.end_addr() / FRAME_PAGE_SIZE;
            reserved.set_range(first, last - first + 1, true);
        }

        // boot modules are loaded into usable RAM and must survive
        for module in mb_info.get_tags::<Modules>() {
            let first = module.start().align_down(FRAME_PAGE_SIZE) / FRAME_PAGE_SIZE;
            let last  = (module.end() - 1) / FRAME_PAGE_SIZE;
            reserved.set_range(first, last - first + 1, true);
        }

        // and the bitmaps themselves
        reserved.set_range(storage / FRAME_PAGE_SIZE, storage_bytes / FRAME_PAGE_SIZE, true);

        inner.reserved = Some(reserved);
        inner.allocated = Some(allocated);
        inner.managed_frames = managed_frames;
        Ok(())
    }

    /// Finds a physical region able to host both bitmaps: inside usable RAM,
    /// above low memory, clear of the kernel image, the boot info and every
    /// boot module.
    fn find_bitmap_storage(
        kernel: &Kernel,
        mb_info: &crate::multiboot2::MbBootInfo,
        storage_bytes: usize,
    ) -> Option<PhysicalAddress> {
        let mem_map = mb_info.get_tag::<MemoryMap>()?;
        let mem_map_entries = mem_map.entries().ok()?;

        let overlaps_forbidden = |start: PhysicalAddress, end: PhysicalAddress| {
            let ranges = kernel.prohibited_memory_ranges();
            let hits_range = ranges.iter()
                .any(|r| start <= r.end_addr() && r.start_addr() <= end);
            let hits_module = mb_info.get_tags::<Modules>()
                .any(|m| start < m.end() && m.start() <= end);
            hits_range || hits_module
        };

        for entry in mem_map_entries.into_iter()
            .filter(|entry| entry.entry_type() == MemoryMapEntryType::AvailableRAM)
        {
            let region_start = (entry.aligned_base_addr(FRAME_PAGE_SIZE) as usize).max(LOW_MEMORY_END);
            let region_end = (entry.base_addr + entry.length) as usize & !(FRAME_PAGE_SIZE - 1);

            // candidate bases: the region start and the first page past each
            // forbidden range (the kernel usually sits at the bottom of the
            // first big usable area)
            let mut candidates = [region_start; 8];
            let mut n_candidates = 1;
            for r in kernel.prohibited_memory_ranges() {
                if n_candidates < candidates.len() {
                    candidates[n_candidates] = (r.end_addr() + 1).align_up(FRAME_PAGE_SIZE);
                    n_candidates += 1;
                }
            }
            for m in mb_info.get_tags::<Modules>() {
                if n_candidates < candidates.len() {
                    candidates[n_candidates] = m.end().align_up(FRAME_PAGE_SIZE);
                    n_candidates += 1;
                }
            }

            for &cand in &candidates[..n_candidates] {
                if cand < region_start || cand + storage_bytes > region_end {
                    continue;
                }
                if !overlaps_forbidden(cand, cand + storage_bytes - 1) {
                    return Some(cand);
                }
            }
        }

        None
    }
}

unsafe impl<'a> FrameAllocator for BitmapFrameAllocator<'a> {
    fn reserve(&self, start: PhysicalAddress, n_frames: usize) {
        assert!(start.is_aligned(FRAME_PAGE_SIZE), "reserve() requires a frame aligned address");

        let inner = &mut *self.0.lock();
        let managed = inner.managed_frames;
        let reserved = inner.reserved.as_mut().expect("frame allocator is not initialized");

        let first = start / FRAME_PAGE_SIZE;
        // frames past the managed range are implicitly reserved already
        let last = (first + n_frames).min(managed);
        for frame in first..last {
            reserved.set(frame, true);
        }
    }

    fn allocate(&self, n_frames: usize) -> Option<PhysicalAddress> {
        assert!(n_frames > 0, "allocate() of zero frames is a bug");

        let inner = &mut *self.0.lock();
        assert!(inner.reserved.is_some(), "frame allocator is not initialized");

        // lowest first-fit: scan for a run of frames that are neither
        // reserved nor allocated, resetting the run on any obstacle
        let mut run_start = 0;
        let mut run_len = 0;

        for frame in 0..inner.managed_frames {
            let reserved  = inner.reserved.as_ref().unwrap().get(frame).unwrap();
            let allocated = inner.allocated.as_ref().unwrap().get(frame).unwrap();

            if !reserved && !allocated {
                if run_len == 0 {
                    run_start = frame;
                }
                run_len += 1;

                if run_len == n_frames {
                    break;
                }
            } else {
                run_len = 0;
            }
        }

        if run_len < n_frames {
            return None;
        }

        inner.allocated.as_mut().unwrap().set_range(run_start, n_frames, true);
        Some(run_start * FRAME_PAGE_SIZE)
    }

    fn free(&self, start: PhysicalAddress, n_frames: usize) {
        assert!(n_frames > 0, "free() of zero frames is a bug");
        assert!(start.is_aligned(FRAME_PAGE_SIZE), "free() requires a frame aligned address");

        let inner = &mut *self.0.lock();
        assert!(inner.reserved.is_some(), "frame allocator is not initialized");

        let first = start / FRAME_PAGE_SIZE;
        assert!(first + n_frames <= inner.managed_frames, "free() past the managed memory range");

        for frame in first..first + n_frames {
            let reserved  = inner.reserved.as_ref().unwrap().get(frame).unwrap();
            let allocated = inner.allocated.as_ref().unwrap().get(frame).unwrap();

            assert!(!reserved, "free() of a reserved frame");
            assert!(allocated, "free() of a frame that is not allocated");

            inner.allocated.as_mut().unwrap().set(frame, false);
        }
    }

    fn is_allocated(&self, frame: Frame) -> bool {
        let inner = &*self.0.lock();
        inner.allocated.as_ref().expect("frame allocator is not initialized")
            .get(frame.index()).unwrap_or(false)
    }

    fn is_reserved(&self, frame: Frame) -> bool {
        let inner = &*self.0.lock();
        // everything outside the managed range counts as reserved
        inner.reserved.as_ref().expect("frame allocator is not initialized")
            .get(frame.index()).unwrap_or(true)
    }
}

// Safety: the inner bitmaps point at physical memory that nothing else aliases
// and every access goes through the Mutex.
unsafe impl<'a> Send for BitmapFrameAllocatorInner<'a> {}
