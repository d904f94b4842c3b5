use super::{PhysicalAddress, VirtualAddress};
use core::arch::asm;

pub struct CR3;

/*
 * Safety: These unsafe blocks are safe as we know that the asm is valid
 * and the code will always run in kernel mode so it will always have access to the cr3 register.
 */
impl CR3 {
    /// Invalidates the TLB entry for the page containing `virt_addr`.
    pub fn invalidate_entry(virt_addr: VirtualAddress) {
        unsafe {
            asm!("invlpg [{}]", in(reg) virt_addr as u64, options(nostack, preserves_flags));
        }
    }

    /// Full TLB shootdown on the local cpu (global pages excluded).
    pub fn invalidate_all() {
        let cr3: u64;
        unsafe {
            asm!("mov {}, cr3", out(reg) cr3, options(nostack, preserves_flags));
            asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }

    pub fn get() -> PhysicalAddress {
        let cr3: u64;
        unsafe {
            asm!("mov {}, cr3", out(reg) cr3, options(nostack, preserves_flags));
        }

        // the low 12 bits hold PCD/PWT control bits, not address bits
        (cr3 & 0x000f_ffff_ffff_f000) as PhysicalAddress
    }

    pub fn set(addr: PhysicalAddress) {
        unsafe {
            asm!("mov cr3, {}", in(reg) addr as u64, options(nostack, preserves_flags));
        }
    }
}
