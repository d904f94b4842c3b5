use crate::data_structures::mapped_rwlockreadguard::MappedRwLockReadGuard;
use crate::memory::{AddrOps, MemoryError, PhysicalAddress, ProhibitedMemoryRange, FRAME_PAGE_SIZE};
use crate::multiboot2::elf_symbols::{ElfSectionFlags, ElfSymbols};
use crate::multiboot2::memory_map::{MemoryMap, MemoryMapEntryType};
use crate::multiboot2::MbBootInfo;
use crate::{assert_called_once, serial_println};
use spin::RwLock;

/// Kernel images linked for the higher half sit at this virtual offset; the
/// ELF section addresses must be folded back to physical for the PMM.
const KERNEL_IMAGE_OFFSET: usize = 0xFFFF_FFFF_8000_0000;

pub const KERNEL_PROHIBITED_MEM_RANGES_LEN: usize = 3;

pub static KERNEL: Kernel = Kernel(RwLock::new(KernelInner {
    k_start : 0,
    k_end   : 0,
    mb_info : None,
    mb_start: 0,
    mb_end  : 0,
    initialized: false,
}));

struct KernelInner {
    // kernel image (physical addrs)
    k_start: PhysicalAddress,
    k_end: PhysicalAddress,

    // multiboot2 info (physical addrs)
    mb_info: Option<MbBootInfo>,
    mb_start: PhysicalAddress,
    mb_end: PhysicalAddress,

    initialized: bool,
}

pub struct Kernel(RwLock<KernelInner>);

impl KernelInner {
    fn new(mb_info: MbBootInfo) -> Self {
        // the span of the loaded image comes from the ELF sections the
        // loader kept in memory
        let elf_symbols: &ElfSymbols = mb_info.get_tag::<ElfSymbols>().expect("Elf symbols tag is not present");
        let sections = elf_symbols.sections().expect("Elf sections are invalid");

        let section_phys = |addr: PhysicalAddress| {
            if addr >= KERNEL_IMAGE_OFFSET { addr - KERNEL_IMAGE_OFFSET } else { addr }
        };

        let k_start = sections
            .filter(|s| s.flags().contains(ElfSectionFlags::ELF_SECTION_ALLOCATED))
            .map(|s| section_phys(s.addr()))
            .min().expect("Elf sections is empty")
            .align_down(FRAME_PAGE_SIZE);

        let k_end = sections
            .filter(|s| s.flags().contains(ElfSectionFlags::ELF_SECTION_ALLOCATED))
            .map(|s| section_phys(s.addr()) + s.size() as usize)
            .max().expect("Elf sections is empty")
            .align_up(FRAME_PAGE_SIZE) - 1;

        // the mb2 info struct itself must survive until everything that
        // reads tags out of it is done
        let mb_start = mb_info.addr().align_down(FRAME_PAGE_SIZE);
        let mb_end = (mb_info.addr() + mb_info.size() as usize - 1).align_up(FRAME_PAGE_SIZE) - 1;

        serial_println!("kernel image: {:#x}..{:#x}", k_start, k_end);
        serial_println!("mb2 info:     {:#x}..{:#x}", mb_start, mb_end);

        KernelInner {
            k_start,
            k_end,

            mb_info: Some(mb_info),
            mb_start,
            mb_end,

            initialized: true,
        }
    }

    /// All the memory ranges that **must be left untouched** meaning that these regions
    /// cannot be used for allocations in the physical (frame allocator) memory space.
    ///
    /// These ranges live in available RAM.
    ///
    /// There are no order guarantees for the memory ranges.
    fn prohibited_memory_ranges(&self) -> [ProhibitedMemoryRange; KERNEL_PROHIBITED_MEM_RANGES_LEN] {
        [
            ProhibitedMemoryRange::new(0, FRAME_PAGE_SIZE - 1), // to avoid problems with NULL ptrs and detect NULL derefs
            ProhibitedMemoryRange::new(self.k_start,  self.k_end),
            ProhibitedMemoryRange::new(self.mb_start, self.mb_end),
        ]
    }
}

impl Kernel {
    /// Initialize the Kernel main structure.
    ///
    /// # Safety
    ///
    /// This operation is **NOT** thread safe.
    ///
    /// # Panics
    ///
    /// If called more than once.
    pub unsafe fn init(&self, mb_info: MbBootInfo) {
        assert_called_once!("Cannot call Kernel::init() more than once");
        *self.0.write() = KernelInner::new(mb_info);
    }

    /// This checks if the kernel `prohibited_memory_ranges()` are in an invalid memory
    /// place such as in an area that is not of type **AvailableRAM**.
    ///
    /// The null guard page is exempt, it intentionally covers memory below
    /// the first usable region.
    pub fn check_placements(&self) -> Result<(), MemoryError> {
        let inner = &*self.0.read();
        assert!(inner.initialized);

        let mem_map_entries = inner.mb_info.as_ref().unwrap().get_tag::<MemoryMap>()
            .ok_or(MemoryError::MemoryMapMbTagDoesNotExist)?
            .entries().map_err(MemoryError::MemoryMapErr)?;

        let overlaps_unavailable = |range: &ProhibitedMemoryRange| {
            mem_map_entries.into_iter()
                .filter(|&area| area.entry_type() != MemoryMapEntryType::AvailableRAM)
                .any(|area| {
                    let area_start = area.aligned_base_addr(FRAME_PAGE_SIZE) as usize;
                    let area_end = area_start + area.aligned_length(FRAME_PAGE_SIZE) as usize;
                    if area_end == area_start {
                        return false;
                    }

                    area_start <= range.end_addr() && range.start_addr() <= area_end - 1
                })
        };

        let ranges = inner.prohibited_memory_ranges();
        if ranges[1..].iter().any(overlaps_unavailable) {
            return Err(MemoryError::BadMemoryPlacement);
        }

        Ok(())
    }

    /// Kernel image start address in physical memory.
    pub fn k_start(&self) -> PhysicalAddress {
        let inner = &*self.0.read();
        assert!(inner.initialized);
        inner.k_start
    }

    /// Kernel image end address in physical memory.
    pub fn k_end(&self) -> PhysicalAddress {
        let inner = &*self.0.read();
        assert!(inner.initialized);
        inner.k_end
    }

    /// Multiboot2 info start address in physical memory.
    pub fn mb_start(&self) -> PhysicalAddress {
        let inner = &*self.0.read();
        assert!(inner.initialized);
        inner.mb_start
    }

    /// Multiboot2 info end address in physical memory.
    pub fn mb_end(&self) -> PhysicalAddress {
        let inner = &*self.0.read();
        assert!(inner.initialized);
        inner.mb_end
    }

    // the impl Deref "hides" the KernelInner type
    pub fn mb_info(&self) -> impl core::ops::Deref<Target = MbBootInfo> + '_ {
        let inner = self.0.read();
        assert!(inner.initialized);
        MappedRwLockReadGuard::new(inner, |data| data.mb_info.as_ref().unwrap())
    }

    /// All the memory ranges that **must be left untouched** meaning that these regions
    /// cannot be used for allocations in the physical (frame allocator) memory space.
    pub fn prohibited_memory_ranges(&self) -> [ProhibitedMemoryRange; KERNEL_PROHIBITED_MEM_RANGES_LEN] {
        let inner = &*self.0.read();
        assert!(inner.initialized);
        inner.prohibited_memory_ranges()
    }
}
