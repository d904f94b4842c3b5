// https://wiki.osdev.org/Programmable_Interval_Timer
use crate::interrupts::{self, InterruptContext};
use crate::io_port::IoPort;
use super::TimerError;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

const PIT_CHANNEL_0: u16        = 0x40;
const PIT_COMMAND_REGISTER: u16 = 0x43;

// command register bits
const PIT_SELECT_CHANNEL_0: u8 = 0b00 << 6;
const PIT_LOBYTE_HIBYTE: u8    = 0b11 << 4;
const PIT_MODE3_SQUARE_WAVE: u8 = 0b011 << 1;
const PIT_BINARY: u8           = 0;

// latch command for reading back the current count of channel 0
const PIT_LATCH_CHANNEL_0: u8 = 0b00 << 6;

/// The PIT input clock in Hz; the divisor slices interrupts out of this.
pub const PIT_BASE_FREQUENCY: u32 = 1_193_182;

pub static PIT: Pit = Pit::new();

/// Legacy interval timer on IRQ 0. Programmed unconditionally (its counter
/// is the ground truth the HPET is verified against); its tick interrupt is
/// only wired up when the HPET is absent, since legacy replacement routing
/// gives IRQ 0 to the HPET otherwise.
pub struct Pit {
    frequency: AtomicU32,
    divisor: AtomicU32,
    ticks: AtomicU64,
    milliseconds: AtomicU64,
    tick_tracker: AtomicU64,
}

impl Pit {
    const fn new() -> Self {
        Pit {
            frequency: AtomicU32::new(0),
            divisor: AtomicU32::new(0),
            ticks: AtomicU64::new(0),
            milliseconds: AtomicU64::new(0),
            tick_tracker: AtomicU64::new(0),
        }
    }

    /// Programs channel 0 as a square wave generator at `frequency` Hz.
    pub fn init(&self, frequency: u32) -> Result<(), TimerError> {
        let divisor = PIT_BASE_FREQUENCY / frequency;
        if divisor == 0 || divisor > u16::MAX as u32 {
            return Err(TimerError::InvalidPitDivisor);
        }

        self.frequency.store(frequency, Ordering::SeqCst);
        self.divisor.store(divisor, Ordering::SeqCst);

        interrupts::without_interrupts(|| {
            IoPort::write_u8(PIT_COMMAND_REGISTER, PIT_SELECT_CHANNEL_0 | PIT_LOBYTE_HIBYTE | PIT_MODE3_SQUARE_WAVE | PIT_BINARY);
            IoPort::io_wait();
            IoPort::write_u8(PIT_CHANNEL_0, (divisor & 0xFF) as u8);
            IoPort::io_wait();
            IoPort::write_u8(PIT_CHANNEL_0, ((divisor >> 8) & 0xFF) as u8);
            IoPort::io_wait();
        });

        Ok(())
    }

    /// Claims IRQ 0 and starts counting ticks and milliseconds. Only valid
    /// when nothing else (the HPET) owns the line.
    pub fn enable_tick_interrupt(&self) {
        interrupts::register_irq(0, pit_tick_handler);
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn milliseconds(&self) -> u64 {
        self.milliseconds.load(Ordering::Relaxed)
    }

    pub fn frequency(&self) -> u32 {
        self.frequency.load(Ordering::Relaxed)
    }

    /// Reads the current channel 0 count through the latch command. The
    /// count runs from the divisor down to 0 and reloads.
    pub fn read_count(&self) -> u16 {
        interrupts::without_interrupts(|| {
            IoPort::write_u8(PIT_COMMAND_REGISTER, PIT_LATCH_CHANNEL_0);
            let lo = IoPort::read_u8(PIT_CHANNEL_0) as u16;
            let hi = IoPort::read_u8(PIT_CHANNEL_0) as u16;
            (hi << 8) | lo
        })
    }

    /// Busy-polls the hardware counter for `n` output periods. Works with
    /// the tick interrupt routed away (or masked), which makes it the
    /// interrupt-free ground truth measurement.
    pub fn poll_ticks(&self, n: u64) {
        assert!(self.divisor.load(Ordering::Relaxed) > 0, "the PIT is not programmed");

        // in mode 3 the counter decrements by two and reloads at every
        // output edge, so one output period is two reloads
        let reloads = n * 2;

        let mut wraps = 0;
        let mut last = self.read_count();

        while wraps < reloads {
            let current = self.read_count();
            // the counter counts down, so a jump upwards is a reload
            if current > last {
                wraps += 1;
            }
            last = current;
        }
    }
}

fn pit_tick_handler(_context: &mut InterruptContext) {
    PIT.ticks.fetch_add(1, Ordering::Relaxed);

    let per_ms = (PIT.frequency.load(Ordering::Relaxed) / 1000).max(1) as u64;
    let tracker = PIT.tick_tracker.fetch_add(1, Ordering::Relaxed) + 1;
    if tracker >= per_ms {
        PIT.tick_tracker.store(0, Ordering::Relaxed);
        PIT.milliseconds.fetch_add(1, Ordering::Relaxed);
    }
}
