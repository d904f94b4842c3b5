// https://wiki.osdev.org/Task_State_Segment#Long_Mode
use crate::memory::VirtualAddress;
use core::cell::UnsafeCell;

/// Stack slot in the interrupt stack table reserved for the faults that must
/// not run on a possibly broken stack (double fault, GPF, page fault).
pub const FAULT_IST_INDEX: u8 = 1;

const KERNEL_STACK_SIZE: usize = 64 * 1024;
const FAULT_STACK_SIZE: usize = 20 * 1024;

#[repr(C, packed)]
pub struct Tss {
    reserved_0: u32,
    rsp0: u64,
    rsp1: u64,
    rsp2: u64,
    reserved_1: u32,
    reserved_2: u32,
    ist: [u64; 7],
    reserved_3: u32,
    reserved_4: u32,
    reserved_5: u16,
    iopb: u16,
}

impl Tss {
    /// Creates a new, completely zeroed out, TSS struct.
    pub const fn new() -> Self {
        Tss {
            reserved_0: 0,
            rsp0: 0,
            rsp1: 0,
            rsp2: 0,
            reserved_1: 0,
            reserved_2: 0,
            ist: [0; 7],
            reserved_3: 0,
            reserved_4: 0,
            reserved_5: 0,
            // no I/O permission bitmap, so the base points past the segment
            iopb: size_of::<Tss>() as u16,
        }
    }

    /// Stack the cpu switches to when entering ring 0 from user mode.
    pub fn set_kernel_stack(&mut self, top: VirtualAddress) {
        self.rsp0 = top as u64;
    }

    /// Installs a dedicated stack in IST slot `index` (1 to 7).
    pub fn set_interrupt_stack(&mut self, index: u8, top: VirtualAddress) {
        assert!((1..=7).contains(&index));
        self.ist[index as usize - 1] = top as u64;
    }
}

/*
 * The cpu pushes interrupt frames into these, so they need interior
 * mutability; a plain static would be placed in read-only memory.
 */
#[repr(C, align(16))]
pub struct Stack<const SIZE: usize>(UnsafeCell<[u8; SIZE]>);

unsafe impl<const SIZE: usize> Sync for Stack<SIZE> {}

impl<const SIZE: usize> Stack<SIZE> {
    pub const fn new() -> Self {
        Stack(UnsafeCell::new([0; SIZE]))
    }

    /// Address just past the stack, where RSP starts (the stack grows down).
    pub fn top(&self) -> VirtualAddress {
        self.0.get() as VirtualAddress + SIZE
    }
}

/// Stack referenced by RSP0, entered on any ring 3 to ring 0 transition.
pub static KERNEL_STACK: Stack<KERNEL_STACK_SIZE> = Stack::new();

/// Stack referenced by IST1 so a fault taken on a corrupted stack still has
/// somewhere safe to run.
pub static FAULT_STACK: Stack<FAULT_STACK_SIZE> = Stack::new();
