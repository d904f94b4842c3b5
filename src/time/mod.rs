pub mod hpet;
pub mod pit;
pub mod rtc;

use crate::interrupts;
use crate::log;
use core::arch::asm;
use core::sync::atomic::{AtomicBool, Ordering};
use hpet::HPET;
use pit::PIT;
use rtc::RTC;

#[derive(Debug, PartialEq, Eq)]
pub enum TimerError {
    /// No HPET table in ACPI (machine predates it or the VM hides it).
    HpetNotPresent,
    /// The requested PIT frequency needs a divisor outside 16 bits.
    InvalidPitDivisor,
}

/// Set once the HPET is ticking; decides which source backs `now_ns()`.
static HPET_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Default PIT rate: one tick per millisecond.
pub const PIT_TICK_FREQUENCY: u32 = 1000;

/// Brings up every time source the machine has: the PIT always (it doubles
/// as the ground truth for the HPET), the HPET when ACPI describes one, the
/// RTC for the wall clock. Requires the IDT, the PIC and ACPI discovery to
/// be done; IRQ lines are claimed here.
pub fn init() {
    PIT.init(PIT_TICK_FREQUENCY).expect("the default PIT divisor is always in range");

    match HPET.init() {
        Ok(()) => {
            // comparator 0 owns IRQ 0 through legacy replacement routing
            HPET_ACTIVE.store(true, Ordering::SeqCst);
            log!(ok, "HPET is the monotonic time source.");
        }
        Err(TimerError::HpetNotPresent) => {
            // fall back to counting PIT ticks
            PIT.enable_tick_interrupt();
            log!(warn, "No HPET, falling back to the PIT for monotonic time.");
        }
        Err(err) => panic!("HPET bring-up failed: {:?}", err),
    }

    match RTC.init() {
        Ok(boot_epoch) => log!(ok, "RTC wall clock: boot unix timestamp is {}.", boot_epoch),
        Err(err) => log!(warn, "RTC bring-up failed: {:?}", err),
    }
}

/// Whether the HPET backs `now_ns()`. While it does, legacy replacement
/// routing also swallows the RTC's periodic interrupt on most chipsets, so
/// wall clock consumers can check this to calibrate their expectations.
pub fn hpet_active() -> bool {
    HPET_ACTIVE.load(Ordering::Relaxed)
}

/// Monotonic nanoseconds since time bring-up.
pub fn now_ns() -> u64 {
    if HPET_ACTIVE.load(Ordering::Relaxed) {
        HPET.now_ns()
    } else {
        PIT.milliseconds() * 1_000_000
    }
}

/// Seconds since the unix epoch.
pub fn now_epoch() -> u64 {
    RTC.now_epoch()
}

/// Halts until at least `ns` nanoseconds have passed. Interrupts must be
/// enabled, something has to wake the cpu from `hlt`.
pub fn busy_wait_ns(ns: u64) {
    let deadline = now_ns() + ns;

    while now_ns() < deadline {
        debug_assert!(interrupts::interrupts_enabled());
        unsafe {
            asm!("hlt", options(nostack, preserves_flags));
        }
    }
}
