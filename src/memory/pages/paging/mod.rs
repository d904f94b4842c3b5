use crate::memory::cr3::CR3;
use crate::memory::frames::{Frame, FrameAllocator};
use crate::memory::{AddrOps, MemoryError, PhysicalAddress, VirtualAddress, FRAME_PAGE_SIZE};
use super::page_table::{page_table_entry::{Entry, EntryFlags}, Level1, Level2, Level3, Level4, Table, ENTRY_COUNT};
use super::Page;
use crate::memory::phys_to_virt;
use spin::Mutex;

/// The paging context the cpu is currently using. Its top level is whatever
/// CR3 points at, so this struct only carries the lock that serializes every
/// edit of the active tree.
pub struct ActivePagingContext(Mutex<()>);

pub static ACTIVE_PAGING_CTX: ActivePagingContext = ActivePagingContext(Mutex::new(()));

/// A paging context that is not loaded. Holds the frame of its top level
/// table. The kernel builds exactly one of these during bring-up and switches
/// to it; building per-process contexts on top is a later extension.
pub struct PagingContext {
    p4_frame: Frame,
}

impl PagingContext {
    /// Creates the kernel's own paging context by deep copying the tree the
    /// loader handed over.
    ///
    /// A kernel mapping, once present, must stay stable across every address
    /// space switch. The loader's tables are borrowed memory that later
    /// stages are free to recycle, so instead of sharing them the kernel
    /// clones the whole tree: the identity/higher-half/kernel-image mappings
    /// survive by construction and the lower half stays free for future user
    /// mappings. Huge page entries are leaves and are copied as-is.
    pub fn new_kernel<A: FrameAllocator>(frame_allocator: &A) -> Result<Self, MemoryError> {
        let src_p4_addr = CR3::get();
        let p4_frame = frame_allocator.allocate_frame().ok_or(MemoryError::NotEnoughPhyMemory)?;

        let src_p4 = unsafe { raw_table(src_p4_addr) };
        let dst_p4 = unsafe { raw_table(p4_frame.addr()) };
        for entry in dst_p4.iter_mut() {
            entry.set_unused();
        }

        for idx in 0..ENTRY_COUNT {
            let src_entry = src_p4[idx];
            if !src_entry.flags().contains(EntryFlags::PRESENT) {
                continue;
            }

            let src_next = src_entry.raw() as usize & 0x000fffff_fffff000;
            let dst_next = frame_allocator.allocate(1).ok_or(MemoryError::NotEnoughPhyMemory)?;
            deep_copy_tables(3, src_next, dst_next, frame_allocator)?;

            // keep the source flags, swap in the address of the copy
            let flags = src_entry.raw() & !0x000fffff_fffff000u64;
            dst_p4[idx].set_raw(dst_next as u64 | flags);
        }

        Ok(PagingContext { p4_frame })
    }

    pub fn p4_frame(&self) -> Frame {
        self.p4_frame
    }
}

/// Copies the table at `src` (physical) into the zeroed table at `dst`,
/// recursing down to the PTs. `level` is 3 for a PDPT, 2 for a PD, 1 for a PT.
fn deep_copy_tables<A: FrameAllocator>(level: u32, src: PhysicalAddress, dst: PhysicalAddress, frame_allocator: &A) -> Result<(), MemoryError> {
    let src_table = unsafe { raw_table(src) };
    let dst_table = unsafe { raw_table(dst) };

    for idx in 0..ENTRY_COUNT {
        let src_entry = src_table[idx];
        if !src_entry.flags().contains(EntryFlags::PRESENT) {
            dst_table[idx].set_unused();
            continue;
        }

        // huge pages (1GiB in a PDPT, 2MiB in a PD) are leaves, copy them as-is
        if (level == 3 || level == 2) && src_entry.flags().contains(EntryFlags::HUGE_PAGE) {
            dst_table[idx] = src_entry;
            continue;
        }

        // a PT only holds leaves
        if level == 1 {
            dst_table[idx] = src_entry;
            continue;
        }

        let src_next = src_entry.raw() as usize & 0x000fffff_fffff000;
        let dst_next = frame_allocator.allocate(1).ok_or(MemoryError::NotEnoughPhyMemory)?;
        unsafe {
            for entry in raw_table(dst_next).iter_mut() {
                entry.set_unused();
            }
        }

        let flags = src_entry.raw() & !0x000fffff_fffff000u64;
        dst_table[idx].set_raw(dst_next as u64 | flags);
        deep_copy_tables(level - 1, src_next, dst_next, frame_allocator)?;
    }

    Ok(())
}

/// Untyped view of a page table, used by the deep copy where the level is a
/// runtime value.
///
/// # Safety
///
/// `paddr` must hold a page table and the caller must not alias it mutably.
unsafe fn raw_table<'a>(paddr: PhysicalAddress) -> &'a mut [Entry; ENTRY_COUNT] {
    unsafe { &mut *(phys_to_virt(paddr) as *mut [Entry; ENTRY_COUNT]) }
}

impl ActivePagingContext {
    fn p4_frame(&self) -> Frame {
        Frame::from_phy_addr(CR3::get())
    }

    /// Maps `virtual_addr` to `physical_addr` with `flags` (plus PRESENT),
    /// creating intermediate tables on demand.
    ///
    /// # Panics
    ///
    /// On unaligned operands, a non canonical `virtual_addr` or a mapping
    /// that is already present. Those are kernel bugs, not runtime
    /// conditions.
    pub fn map<A: FrameAllocator>(&self, virtual_addr: VirtualAddress, physical_addr: PhysicalAddress, frame_allocator: &A, flags: EntryFlags) -> Result<(), MemoryError> {
        assert!(virtual_addr.is_aligned(FRAME_PAGE_SIZE), "map() requires a page aligned virtual address");
        assert!(physical_addr.is_aligned(FRAME_PAGE_SIZE), "map() requires a frame aligned physical address");

        let page = Page::from_virt_addr(virtual_addr)
            .unwrap_or_else(|_| panic!("map() of a non canonical address: {:#x}", virtual_addr));
        let frame = Frame::from_phy_addr(physical_addr);

        let _guard = self.0.lock();
        let p4 = unsafe { Table::<Level4>::from_frame(self.p4_frame()) };
        let p3 = p4.create_next_table(page.p4_index(), frame_allocator)?;
        let p2 = p3.create_next_table(page.p3_index(), frame_allocator)?;
        let p1 = p2.create_next_table(page.p2_index(), frame_allocator)?;

        let entry = &mut p1.entries[page.p1_index()];
        assert!(
            !entry.flags().contains(EntryFlags::PRESENT),
            "map() over an already present mapping at {:#x}", virtual_addr
        );

        entry.set(frame, flags | EntryFlags::PRESENT);
        CR3::invalidate_entry(virtual_addr);
        Ok(())
    }

    /// Unmaps the page holding `virtual_addr` and reclaims every page table
    /// that becomes empty on the way up. The mapped frame itself is not
    /// freed, it still belongs to whoever mapped it.
    ///
    /// # Panics
    ///
    /// If any level of the walk is not present.
    pub fn unmap<A: FrameAllocator>(&self, virtual_addr: VirtualAddress, frame_allocator: &A) {
        let page = Page::from_virt_addr(virtual_addr)
            .unwrap_or_else(|_| panic!("unmap() of a non canonical address: {:#x}", virtual_addr));

        let _guard = self.0.lock();

        /*
         * Each table is re-derived from its frame instead of borrowing
         * through the parent so the cascade below can edit the parents after
         * freeing a child.
         */
        let p4_frame = self.p4_frame();
        let p4 = unsafe { Table::<Level4>::from_frame(p4_frame) };
        let p3_frame = table_down::<Level4>(p4, page.p4_index(), virtual_addr);
        let p3 = unsafe { Table::<Level3>::from_frame(p3_frame) };
        let p2_frame = table_down::<Level3>(p3, page.p3_index(), virtual_addr);
        let p2 = unsafe { Table::<Level2>::from_frame(p2_frame) };
        let p1_frame = table_down::<Level2>(p2, page.p2_index(), virtual_addr);
        let p1 = unsafe { Table::<Level1>::from_frame(p1_frame) };

        let entry = &mut p1.entries[page.p1_index()];
        assert!(
            entry.flags().contains(EntryFlags::PRESENT),
            "unmap() of an address that is not mapped: {:#x}", virtual_addr
        );

        entry.set_unused();
        CR3::invalidate_entry(virtual_addr);

        // cascade: free each table that just became empty and clear the
        // entry pointing at it
        if p1.is_empty() {
            frame_allocator.free_frame(p1_frame);
            p2.entries[page.p2_index()].set_unused();

            if p2.is_empty() {
                frame_allocator.free_frame(p2_frame);
                p3.entries[page.p3_index()].set_unused();

                if p3.is_empty() {
                    frame_allocator.free_frame(p3_frame);
                    p4.entries[page.p4_index()].set_unused();
                }
            }
        }
    }

    /// Takes a virtual address and returns the respective physical address if it is mapped.
    /// Huge page mappings inherited from the loader translate as well.
    pub fn translate(&self, virtual_addr: VirtualAddress) -> Option<PhysicalAddress> {
        let page = Page::from_virt_addr(virtual_addr).ok()?;

        let _guard = self.0.lock();
        let p4 = unsafe { Table::<Level4>::from_frame(self.p4_frame()) };

        let p3 = p4.next_table(page.p4_index())?;
        let p3_entry = &p3.entries[page.p3_index()];
        if p3_entry.flags().contains(EntryFlags::HUGE_PAGE) {
            return Some(p3_entry.phy_addr()? + (virtual_addr & 0x3fff_ffff));
        }

        let p2 = p3.next_table(page.p3_index())?;
        let p2_entry = &p2.entries[page.p2_index()];
        if p2_entry.flags().contains(EntryFlags::HUGE_PAGE) {
            return Some(p2_entry.phy_addr()? + (virtual_addr & 0x1f_ffff));
        }

        let p1 = p2.next_table(page.p2_index())?;
        let offset = virtual_addr % FRAME_PAGE_SIZE;
        Some(p1.entries[page.p1_index()].phy_addr()? + offset)
    }

    /// Loads `context` into CR3 and flushes the whole TLB on this cpu.
    pub fn switch_to(&self, context: &PagingContext) {
        let _guard = self.0.lock();
        CR3::set(context.p4_frame.addr());
        CR3::invalidate_all();
    }
}

/// One step of a mandatory walk: the entry must be present and not huge.
fn table_down<L: super::page_table::HierarchicalLevel>(table: &Table<L>, index: usize, virtual_addr: VirtualAddress) -> Frame {
    let entry = &table.entries[index];
    assert!(
        entry.flags().contains(EntryFlags::PRESENT),
        "unmap() of an address that is not mapped: {:#x}", virtual_addr
    );
    assert!(
        !entry.flags().contains(EntryFlags::HUGE_PAGE),
        "unmap() through a huge page mapping: {:#x}", virtual_addr
    );

    entry.pointed_frame().unwrap()
}
