use crate::memory::frames::{FrameAllocator, FRAME_ALLOCATOR};
use crate::memory::pages::page_table::page_table_entry::EntryFlags;
use crate::memory::pages::paging::ACTIVE_PAGING_CTX;
use crate::memory::{AddrOps, VirtualAddress, FRAME_PAGE_SIZE};
use core::alloc::{GlobalAlloc, Layout};
use core::ptr;
use spin::Mutex;

/// Base of the virtual window the heap maps its pages into. A heap page
/// backed by physical address `p` lives at `HEAP_VIRTUAL_BASE + p`, which
/// keeps the mapping trivially collision free.
pub const HEAP_VIRTUAL_BASE: VirtualAddress = 0xFFFF_C000_0000_0000;

/// Block sizes an allocation is quantized to. Anything above the last class
/// takes the huge path.
const SIZE_CLASSES: [usize; 9] = [16, 32, 64, 128, 256, 512, 1024, 2048, FRAME_PAGE_SIZE];

/// Bin and huge-allocation records are carved out of dedicated metadata
/// pages in blocks of this size.
const METADATA_BLOCK_SIZE: usize = 64;

const _: () = assert!(size_of::<Bin>() <= METADATA_BLOCK_SIZE);
const _: () = assert!(size_of::<HugeAllocation>() <= METADATA_BLOCK_SIZE);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AllocateMode {
    Normal,
    /// Every byte of the returned block reads zero.
    Zeroed,
}

/// One backing page carved into `block_size` blocks for one size class.
/// The free list is threaded through the first word of the free blocks
/// themselves, so an empty bin costs one page and one metadata block.
struct Bin {
    free_list_head: VirtualAddress, // 0 = no free block
    start_addr: VirtualAddress,
    block_size: usize,
    used_blocks: usize,
    free_blocks: usize,
    flags: EntryFlags,
    next: *mut Bin,
}

struct HugeAllocation {
    addr: VirtualAddress,
    size: usize,
    n_frames: usize,
    next: *mut HugeAllocation,
}

struct HeapAllocatorInner {
    // one singly linked bin list per size class
    size_classes: [*mut Bin; SIZE_CLASSES.len()],
    huge_head: *mut HugeAllocation,
    // bins hosting Bin/HugeAllocation records; the head page hosts its own header
    metadata_head: *mut Bin,
}

pub struct HeapAllocator(Mutex<HeapAllocatorInner>);

// Safety: the raw pointers reference heap-window memory reached only through
// the Mutex.
unsafe impl Send for HeapAllocatorInner {}

pub static HEAP_ALLOCATOR: HeapAllocator = HeapAllocator::new();

impl HeapAllocator {
    pub const fn new() -> Self {
        HeapAllocator(Mutex::new(HeapAllocatorInner {
            size_classes: [ptr::null_mut(); SIZE_CLASSES.len()],
            huge_head: ptr::null_mut(),
            metadata_head: ptr::null_mut(),
        }))
    }

    /// Allocates `size` bytes aligned to `align` (0 means the default of 16).
    ///
    /// Returns 0 for a zero sized request or when the physical allocator is
    /// out of contiguous memory. Requires the PMM and paging to be up.
    ///
    /// # Panics
    ///
    /// If `align` is not a power of two or larger than a page, or if the
    /// heap window arithmetic would wrap.
    pub fn allocate(&self, size: usize, align: usize, flags: EntryFlags, mode: AllocateMode) -> VirtualAddress {
        if size == 0 {
            return 0;
        }

        let align = if align == 0 { 16 } else { align };
        assert!(align.is_power_of_two(), "heap alignment must be a power of two");
        assert!(align <= FRAME_PAGE_SIZE, "heap alignment above a page is not supported");

        // blocks are naturally aligned to their class size, so folding the
        // alignment into the size is all that is needed
        let size = size.max(align).max(16);

        let addr = if size > FRAME_PAGE_SIZE {
            self.allocate_huge(size, flags)
        } else {
            self.allocate_from_class(size, flags)
        };

        if addr != 0 && mode == AllocateMode::Zeroed {
            unsafe { ptr::write_bytes(addr as *mut u8, 0, size) };
        }

        addr
    }

    /// Releases an allocation. `size` must be the value the matching
    /// `allocate()` call was made with (alignment folded in the same way).
    ///
    /// # Panics
    ///
    /// If `addr` was never handed out by this allocator, or if `size` maps
    /// to a different size class than the one owning `addr`.
    pub fn free(&self, addr: VirtualAddress, size: usize) {
        assert!(size > 0, "free() of a zero sized allocation is a bug");

        if size > FRAME_PAGE_SIZE {
            self.free_huge(addr);
            return;
        }

        let size = size.max(16);
        let class = class_index(size);
        let inner = &mut *self.0.lock();

        // find the bin owning this address by range check
        let mut bin = inner.size_classes[class];
        while !bin.is_null() {
            let b = unsafe { &mut *bin };
            let capacity = b.block_size * (b.used_blocks + b.free_blocks);

            if addr >= b.start_addr && addr < b.start_addr + capacity {
                // push the block back onto the free list
                unsafe { *(addr as *mut VirtualAddress) = b.free_list_head };
                b.free_list_head = addr;
                b.used_blocks -= 1;
                b.free_blocks += 1;

                if b.used_blocks == 0 {
                    inner.release_bin(class, bin);
                }
                return;
            }

            bin = b.next;
        }

        panic!("free() of {:#x} which no heap bin of class {} owns", addr, SIZE_CLASSES[class]);
    }

    fn allocate_from_class(&self, size: usize, flags: EntryFlags) -> VirtualAddress {
        let class = class_index(size);
        let inner = &mut *self.0.lock();

        // any bin of the class with a free block and the same mapping flags will do
        let mut bin = inner.size_classes[class];
        while !bin.is_null() {
            let b = unsafe { &mut *bin };
            if b.flags == flags && b.free_blocks > 0 {
                return inner.pop_block(bin);
            }
            bin = b.next;
        }

        let Some(bin) = inner.create_bin(class, flags) else {
            return 0;
        };
        inner.pop_block(bin)
    }

    fn allocate_huge(&self, size: usize, flags: EntryFlags) -> VirtualAddress {
        let n_frames = size.align_up(FRAME_PAGE_SIZE) / FRAME_PAGE_SIZE;
        let inner = &mut *self.0.lock();

        let Some(record) = inner.allocate_metadata() else {
            return 0;
        };

        let Some(phys) = FRAME_ALLOCATOR.allocate(n_frames) else {
            inner.free_metadata(record as VirtualAddress);
            return 0;
        };

        let addr = heap_window_addr(phys);
        for i in 0..n_frames {
            ACTIVE_PAGING_CTX
                .map(addr + i * FRAME_PAGE_SIZE, phys + i * FRAME_PAGE_SIZE, &FRAME_ALLOCATOR, flags | EntryFlags::PRESENT)
                .expect("out of physical memory while mapping a huge heap allocation");
        }

        let record = record as *mut HugeAllocation;
        unsafe {
            record.write(HugeAllocation {
                addr,
                size,
                n_frames,
                next: inner.huge_head,
            });
        }
        inner.huge_head = record;

        addr
    }

    fn free_huge(&self, addr: VirtualAddress) {
        let inner = &mut *self.0.lock();

        let mut prev: *mut HugeAllocation = ptr::null_mut();
        let mut current = inner.huge_head;
        while !current.is_null() {
            let c = unsafe { &mut *current };
            if c.addr == addr {
                // unlink, unmap, give the frames back
                if prev.is_null() {
                    inner.huge_head = c.next;
                } else {
                    unsafe { (*prev).next = c.next };
                }

                let phys = addr - HEAP_VIRTUAL_BASE;
                for i in 0..c.n_frames {
                    ACTIVE_PAGING_CTX.unmap(addr + i * FRAME_PAGE_SIZE, &FRAME_ALLOCATOR);
                }
                FRAME_ALLOCATOR.free(phys, c.n_frames);

                inner.free_metadata(current as VirtualAddress);
                return;
            }

            prev = current;
            current = c.next;
        }

        panic!("free() of {:#x} which is not a live huge allocation", addr);
    }
}

impl HeapAllocatorInner {
    /// Pops the free list head of `bin`. The bin must have a free block.
    fn pop_block(&mut self, bin: *mut Bin) -> VirtualAddress {
        let b = unsafe { &mut *bin };
        let block = b.free_list_head;
        assert!(block != 0);

        b.free_list_head = unsafe { *(block as *const VirtualAddress) };
        b.used_blocks += 1;
        b.free_blocks -= 1;
        block
    }

    /// Creates a bin for `class`: one metadata record, one backing page
    /// mapped into the heap window, all blocks threaded into the free list.
    fn create_bin(&mut self, class: usize, flags: EntryFlags) -> Option<*mut Bin> {
        let block_size = SIZE_CLASSES[class];

        let record = self.allocate_metadata()? as *mut Bin;

        let Some(phys) = FRAME_ALLOCATOR.allocate(1) else {
            self.free_metadata(record as VirtualAddress);
            return None;
        };

        let start_addr = heap_window_addr(phys);
        ACTIVE_PAGING_CTX
            .map(start_addr, phys, &FRAME_ALLOCATOR, flags | EntryFlags::PRESENT)
            .expect("out of physical memory while mapping a heap bin page");

        let mut free_list_head = 0;
        let block_count = FRAME_PAGE_SIZE / block_size;
        for i in 0..block_count {
            let block = start_addr + i * block_size;
            unsafe { *(block as *mut VirtualAddress) = free_list_head };
            free_list_head = block;
        }

        unsafe {
            record.write(Bin {
                free_list_head,
                start_addr,
                block_size,
                used_blocks: 0,
                free_blocks: block_count,
                flags,
                next: self.size_classes[class],
            });
        }
        self.size_classes[class] = record;

        Some(record)
    }

    /// Gives a fully free bin's page back to the PMM and drops its record.
    fn release_bin(&mut self, class: usize, bin: *mut Bin) {
        let b = unsafe { &mut *bin };
        assert!(b.used_blocks == 0);

        let phys = b.start_addr - HEAP_VIRTUAL_BASE;
        ACTIVE_PAGING_CTX.unmap(b.start_addr, &FRAME_ALLOCATOR);
        FRAME_ALLOCATOR.free(phys, 1);

        // unlink from the class list
        if self.size_classes[class] == bin {
            self.size_classes[class] = b.next;
        } else {
            let mut prev = self.size_classes[class];
            loop {
                assert!(!prev.is_null(), "heap bin missing from its class list");
                let p = unsafe { &mut *prev };
                if p.next == bin {
                    p.next = b.next;
                    break;
                }
                prev = p.next;
            }
        }

        self.free_metadata(bin as VirtualAddress);
    }

    /// Hands out one 64 byte metadata block, growing the self-hosted
    /// metadata bin list on demand. The first block of a fresh metadata page
    /// is the page's own `Bin` header.
    fn allocate_metadata(&mut self) -> Option<*mut u8> {
        let mut bin = self.metadata_head;
        while !bin.is_null() {
            let b = unsafe { &mut *bin };
            if b.free_blocks > 0 {
                return Some(self.pop_block(bin) as *mut u8);
            }
            bin = b.next;
        }

        let phys = FRAME_ALLOCATOR.allocate(1)?;
        let page = heap_window_addr(phys);
        ACTIVE_PAGING_CTX
            .map(page, phys, &FRAME_ALLOCATOR, EntryFlags::PRESENT | EntryFlags::WRITABLE | EntryFlags::NO_EXECUTE)
            .expect("out of physical memory while mapping a heap metadata page");

        // the header consumes the first block, the rest become the free list
        let start_addr = page + METADATA_BLOCK_SIZE;
        let block_count = FRAME_PAGE_SIZE / METADATA_BLOCK_SIZE - 1;

        let mut free_list_head = 0;
        for i in 0..block_count {
            let block = start_addr + i * METADATA_BLOCK_SIZE;
            unsafe { *(block as *mut VirtualAddress) = free_list_head };
            free_list_head = block;
        }

        let header = page as *mut Bin;
        unsafe {
            header.write(Bin {
                free_list_head,
                start_addr,
                block_size: METADATA_BLOCK_SIZE,
                used_blocks: 0,
                free_blocks: block_count,
                flags: EntryFlags::PRESENT | EntryFlags::WRITABLE | EntryFlags::NO_EXECUTE,
                next: self.metadata_head,
            });
        }
        self.metadata_head = header;

        Some(self.pop_block(header) as *mut u8)
    }

    /// Returns a metadata block to the bin owning it. A fully free metadata
    /// page (header aside) is handed back to the PMM.
    fn free_metadata(&mut self, addr: VirtualAddress) {
        let mut prev: *mut Bin = ptr::null_mut();
        let mut bin = self.metadata_head;
        while !bin.is_null() {
            let b = unsafe { &mut *bin };
            let capacity = b.block_size * (b.used_blocks + b.free_blocks);

            if addr >= b.start_addr && addr < b.start_addr + capacity {
                unsafe { *(addr as *mut VirtualAddress) = b.free_list_head };
                b.free_list_head = addr;
                b.used_blocks -= 1;
                b.free_blocks += 1;

                if b.used_blocks == 0 {
                    // unlink and release the whole page (the header lives in it)
                    if prev.is_null() {
                        self.metadata_head = b.next;
                    } else {
                        unsafe { (*prev).next = b.next };
                    }

                    let page = b.start_addr - METADATA_BLOCK_SIZE;
                    let phys = page - HEAP_VIRTUAL_BASE;
                    ACTIVE_PAGING_CTX.unmap(page, &FRAME_ALLOCATOR);
                    FRAME_ALLOCATOR.free(phys, 1);
                }
                return;
            }

            prev = bin;
            bin = b.next;
        }

        panic!("free of heap metadata at {:#x} which no metadata bin owns", addr);
    }
}

/// Heap window address of the page backed by `phys`.
///
/// # Panics
///
/// If the sum wraps around the top of the address space.
fn heap_window_addr(phys: usize) -> VirtualAddress {
    HEAP_VIRTUAL_BASE.checked_add(phys)
        .expect("heap window wrapped around the top of the virtual address space")
}

fn class_index(size: usize) -> usize {
    debug_assert!(size <= FRAME_PAGE_SIZE);
    SIZE_CLASSES.iter().position(|&class| size <= class).unwrap()
}

/// Adapter that lets `alloc` collection types live on the kernel heap.
pub struct KernelHeap;

#[global_allocator]
static KERNEL_HEAP: KernelHeap = KernelHeap;

unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        HEAP_ALLOCATOR.allocate(
            layout.size(),
            layout.align(),
            EntryFlags::WRITABLE | EntryFlags::NO_EXECUTE,
            AllocateMode::Normal,
        ) as *mut u8
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        HEAP_ALLOCATOR.allocate(
            layout.size(),
            layout.align(),
            EntryFlags::WRITABLE | EntryFlags::NO_EXECUTE,
            AllocateMode::Zeroed,
        ) as *mut u8
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // fold the alignment into the size exactly like alloc() did so the
        // lookup lands in the same size class
        HEAP_ALLOCATOR.free(ptr as VirtualAddress, layout.size().max(layout.align()));
    }
}
