// https://wiki.osdev.org/Global_Descriptor_Table
// https://wiki.osdev.org/GDT_Tutorial
use super::tss::{Tss, FAULT_IST_INDEX, FAULT_STACK, KERNEL_STACK};
use bitflags::bitflags;
use core::arch::asm;
use lazy_static::lazy_static;

pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
pub const USER_CODE_SELECTOR: u16   = 0x18;
pub const USER_DATA_SELECTOR: u16   = 0x20;
pub const TSS_SELECTOR: u16         = 0x28; // takes two slots (0x28 and 0x30)

// null + 4 normal descriptors + the 16 byte TSS descriptor
const GDT_ENTRY_COUNT: usize = 7;

bitflags! {
    #[derive(Clone, Copy)]
    struct NormalSegmentAccessByte: u8 {
        const ACCESSED        = 1 << 0;
        const RW              = 1 << 1;
        const DC              = 1 << 2; // Direction bit/Conforming bit
        const EXECUTABLE      = 1 << 3;
        const DESCRIPTOR_TYPE = 1 << 4; // Descriptor type (code/data or system descriptor)
        const DPL_LO          = 1 << 5;
        const DPL_HI          = 1 << 6;
        const PRESENT         = 1 << 7;

        const DPL_USER        = Self::DPL_LO.bits() | Self::DPL_HI.bits();
    }
}

bitflags! {
    #[derive(Clone, Copy)]
    struct SegmentFlags: u8 {
        const LONG_MODE_CODE = 1 << 1;
        const PROTECTED_MODE = 1 << 2;
        const GRANULARITY_4K = 1 << 3;
    }
}

#[repr(C, align(16))]
struct Gdt {
    entries: [u64; GDT_ENTRY_COUNT],
}

#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u64,
}

impl Gdt {
    fn new(tss: &'static Tss) -> Self {
        let mut gdt = Gdt { entries: [0; GDT_ENTRY_COUNT] };

        gdt.set_normal_descriptor(
            KERNEL_CODE_SELECTOR,
            NormalSegmentAccessByte::PRESENT | NormalSegmentAccessByte::DESCRIPTOR_TYPE
                | NormalSegmentAccessByte::EXECUTABLE | NormalSegmentAccessByte::RW,
            SegmentFlags::LONG_MODE_CODE | SegmentFlags::GRANULARITY_4K,
        );
        gdt.set_normal_descriptor(
            KERNEL_DATA_SELECTOR,
            NormalSegmentAccessByte::PRESENT | NormalSegmentAccessByte::DESCRIPTOR_TYPE
                | NormalSegmentAccessByte::RW,
            SegmentFlags::GRANULARITY_4K,
        );
        gdt.set_normal_descriptor(
            USER_CODE_SELECTOR,
            NormalSegmentAccessByte::PRESENT | NormalSegmentAccessByte::DESCRIPTOR_TYPE
                | NormalSegmentAccessByte::EXECUTABLE | NormalSegmentAccessByte::RW
                | NormalSegmentAccessByte::DPL_USER,
            SegmentFlags::LONG_MODE_CODE | SegmentFlags::GRANULARITY_4K,
        );
        gdt.set_normal_descriptor(
            USER_DATA_SELECTOR,
            NormalSegmentAccessByte::PRESENT | NormalSegmentAccessByte::DESCRIPTOR_TYPE
                | NormalSegmentAccessByte::RW | NormalSegmentAccessByte::DPL_USER,
            SegmentFlags::GRANULARITY_4K,
        );
        gdt.set_tss_descriptor(TSS_SELECTOR, tss);

        gdt
    }

    /// Encodes a flat 4GiB code/data descriptor (base 0, limit 0xFFFFF pages).
    fn set_normal_descriptor(&mut self, selector: u16, access: NormalSegmentAccessByte, flags: SegmentFlags) {
        let limit: u64 = 0xFFFFF;

        let mut entry = limit & 0xFFFF;                 // limit bits 0..15
        entry |= (access.bits() as u64) << 40;
        entry |= ((limit >> 16) & 0xF) << 48;           // limit bits 16..19
        entry |= ((flags.bits() as u64) & 0xF) << 52;

        self.entries[selector as usize / 8] = entry;
    }

    /// Encodes the 16 byte system descriptor pointing at the TSS.
    fn set_tss_descriptor(&mut self, selector: u16, tss: &'static Tss) {
        let base = tss as *const Tss as u64;
        let limit = (size_of::<Tss>() - 1) as u64;

        let mut low = 0u64;
        low |= limit & 0xFFFF;
        low |= (base & 0xFF_FFFF) << 16;
        low |= 0x89 << 40; // present, available 64 bit TSS
        low |= ((limit >> 16) & 0xF) << 48;
        low |= ((base >> 24) & 0xFF) << 56;

        let high = base >> 32;

        let index = selector as usize / 8;
        self.entries[index] = low;
        self.entries[index + 1] = high;
    }
}

lazy_static! {
    static ref TSS: Tss = {
        let mut tss = Tss::new();
        tss.set_kernel_stack(KERNEL_STACK.top());
        tss.set_interrupt_stack(FAULT_IST_INDEX, FAULT_STACK.top());
        tss
    };

    static ref GDT: Gdt = Gdt::new(&TSS);
}

/// Loads the kernel descriptor table and the TSS.
///
/// After this the cpu can take a double fault, a general protection fault or
/// a page fault on the dedicated IST1 stack instead of whatever stack just
/// broke.
///
/// # Safety
///
/// Rewrites the segment registers. The stubs and the IDT rely on the
/// selector layout above, so this must run before the IDT is loaded.
pub unsafe fn init() {
    let pointer = GdtPointer {
        limit: (size_of::<[u64; GDT_ENTRY_COUNT]>() - 1) as u16,
        base: GDT.entries.as_ptr() as u64,
    };

    unsafe {
        asm!(
            "lgdt [{pointer}]",

            // reload CS with a far return
            "lea {tmp}, [rip + 55f]",
            "push {code_sel}",
            "push {tmp}",
            "retfq",
            "55:",

            // reload the data segment registers
            "mov ds, {data_sel:x}",
            "mov es, {data_sel:x}",
            "mov ss, {data_sel:x}",
            "mov fs, {data_sel:x}",
            "mov gs, {data_sel:x}",

            // load the task register
            "ltr {tss_sel:x}",

            pointer = in(reg) &pointer as *const GdtPointer,
            code_sel = in(reg) KERNEL_CODE_SELECTOR as u64,
            data_sel = in(reg) KERNEL_DATA_SELECTOR as u32,
            tss_sel = in(reg) TSS_SELECTOR,
            tmp = out(reg) _,
        );
    }
}
