// https://wiki.osdev.org/HPET
use crate::acpi::{GenericAddress, SdtHeader, ACPI};
use crate::interrupts::{self, InterruptContext};
use crate::memory::frames::FRAME_ALLOCATOR;
use crate::memory::pages::page_table::page_table_entry::EntryFlags;
use crate::memory::pages::paging::ACTIVE_PAGING_CTX;
use crate::memory::{phys_to_virt, AddrOps, PhysicalAddress, VirtualAddress, FRAME_PAGE_SIZE};
use crate::serial_println;
use super::TimerError;
use spin::Mutex;

/// Femtoseconds per second; the capability register reports the tick period
/// in femtoseconds.
const FEMTOSECONDS_PER_SECOND: u64 = 1_000_000_000_000_000;

/// Target rate for the rollover-accounting interrupt from comparator 0.
const TICK_HZ: u64 = 30;

// register offsets inside the MMIO block
const REG_CAPABILITIES: usize  = 0x000;
const REG_CONFIGURATION: usize = 0x010;
const REG_MAIN_COUNTER: usize  = 0x0F0;
const REG_TIMER0_CONFIG: usize = 0x100;
const REG_TIMER0_COMPARATOR: usize = 0x108;

// general configuration bits
const CONFIG_ENABLE: u64 = 1 << 0;
const CONFIG_LEGACY_REPLACEMENT: u64 = 1 << 1;

// timer configuration bits
const TIMER_INT_ENABLE: u64 = 1 << 2;
const TIMER_PERIODIC: u64   = 1 << 3;
const TIMER_VALUE_SET: u64  = 1 << 6;

/// The ACPI HPET description table.
#[repr(C, packed)]
struct HpetTable {
    header: SdtHeader,
    event_timer_block_id: u32,
    address: GenericAddress,
    hpet_number: u8,
    minimum_tick: u16,
    page_protection: u8,
}

pub static HPET: Hpet = Hpet(Mutex::new(HpetInner {
    mmio_base: 0,
    frequency: 0,
    comparator_count: 0,
    accumulator: 0,
    last_counter: 0,
}));

struct HpetInner {
    mmio_base: VirtualAddress, // 0 = not initialized
    frequency: u64,            // main counter ticks per second
    comparator_count: u32,
    /// Total main counter ticks folded in by the rollover interrupt.
    accumulator: u64,
    /// Counter value at the last fold, 32 bit because QEMU's counter is.
    last_counter: u32,
}

pub struct Hpet(Mutex<HpetInner>);

impl Hpet {
    /// Discovers the HPET through ACPI, maps its MMIO block uncached and
    /// programs comparator 0 as a periodic ~30 Hz rollover tick routed to
    /// IRQ 0 via legacy replacement.
    pub fn init(&self) -> Result<(), TimerError> {
        let table = ACPI.find_table(b"HPET", 0).ok_or(TimerError::HpetNotPresent)?;
        let table = unsafe { &*(table as *const SdtHeader as *const HpetTable) };
        let mmio_phys = { table.address.address } as PhysicalAddress;

        let mmio_base = Self::map_mmio(mmio_phys);

        let inner = &mut *self.0.lock();
        inner.mmio_base = mmio_base;

        let caps = unsafe { read_reg(mmio_base, REG_CAPABILITIES) };
        let period_fs = caps >> 32;
        inner.frequency = FEMTOSECONDS_PER_SECOND / period_fs;
        inner.comparator_count = ((caps >> 8) & 0x1F) as u32 + 1;

        serial_println!(
            "hpet: {} comparators, period {} fs, frequency {} Hz, counter is {}",
            inner.comparator_count,
            period_fs,
            inner.frequency,
            if caps & (1 << 13) != 0 { "64-bit" } else { "32-bit" },
        );

        interrupts::without_interrupts(|| {
            unsafe {
                // quiesce the device before touching the comparator
                write_reg(mmio_base, REG_CONFIGURATION, 0);

                let timer0 = TIMER_INT_ENABLE | TIMER_PERIODIC | TIMER_VALUE_SET;
                write_reg(mmio_base, REG_TIMER0_CONFIG, timer0);
                write_reg(mmio_base, REG_TIMER0_COMPARATOR, inner.frequency / TICK_HZ);

                // the tick handler does the 32 bit rollover accounting
                interrupts::register_irq(0, hpet_tick_handler);

                write_reg(mmio_base, REG_CONFIGURATION, CONFIG_LEGACY_REPLACEMENT | CONFIG_ENABLE);
            }

            inner.accumulator = 0;
            inner.last_counter = unsafe { read_reg(mmio_base, REG_MAIN_COUNTER) } as u32;
        });

        Ok(())
    }

    /// Maps the MMIO block into the higher half unless the direct map
    /// already covers it, always uncached and never executable.
    fn map_mmio(mmio_phys: PhysicalAddress) -> VirtualAddress {
        let page_phys = mmio_phys.align_down(FRAME_PAGE_SIZE);
        let virt = phys_to_virt(page_phys);

        if ACTIVE_PAGING_CTX.translate(virt).is_none() {
            ACTIVE_PAGING_CTX
                .map(virt, page_phys, &FRAME_ALLOCATOR, EntryFlags::WRITABLE | EntryFlags::NO_CACHE | EntryFlags::NO_EXECUTE)
                .expect("out of physical memory while mapping the HPET");
        }

        phys_to_virt(mmio_phys)
    }

    /// Monotonic nanoseconds. The accumulator snapshot and the live counter
    /// read must be consistent, so the pair is taken with IRQs off.
    pub fn now_ns(&self) -> u64 {
        interrupts::without_interrupts(|| {
            let inner = &*self.0.lock();
            assert!(inner.mmio_base != 0, "the HPET is not initialized");

            let current = unsafe { read_reg(inner.mmio_base, REG_MAIN_COUNTER) } as u32;
            let delta = current.wrapping_sub(inner.last_counter) as u64;
            let total = inner.accumulator + delta;

            // the multiply overflows u64 within the hour, go through u128
            ((total as u128) * 1_000_000_000 / inner.frequency as u128) as u64
        })
    }

    /// Folds the counter movement since the last tick into the accumulator,
    /// with plain modular arithmetic covering 32 bit counter wraparound.
    fn tick(&self) {
        let inner = &mut *self.0.lock();
        if inner.mmio_base == 0 {
            return;
        }

        let current = unsafe { read_reg(inner.mmio_base, REG_MAIN_COUNTER) } as u32;
        let delta = current.wrapping_sub(inner.last_counter) as u64;
        inner.accumulator += delta;
        inner.last_counter = current;
    }
}

fn hpet_tick_handler(_context: &mut InterruptContext) {
    HPET.tick();
}

/// # Safety
///
/// `base` must be the mapped HPET MMIO block and `offset` a valid register.
unsafe fn read_reg(base: VirtualAddress, offset: usize) -> u64 {
    unsafe { core::ptr::read_volatile((base + offset) as *const u64) }
}

/// # Safety
///
/// `base` must be the mapped HPET MMIO block and `offset` a valid register.
unsafe fn write_reg(base: VirtualAddress, offset: usize, value: u64) {
    unsafe { core::ptr::write_volatile((base + offset) as *mut u64, value) }
}
