// https://wiki.osdev.org/RTC
// https://wiki.osdev.org/CMOS
use crate::interrupts::{self, InterruptContext};
use crate::io_port::IoPort;
use super::TimerError;
use bitflags::bitflags;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

const CMOS_ADDRESS: u16 = 0x70;
const CMOS_DATA: u16    = 0x71;

// selecting a register with bit 7 set keeps NMIs disabled during the access
const CMOS_DISABLE_NMI: u8 = 0x80;

const REG_SECONDS: u8  = 0x00;
const REG_MINUTES: u8  = 0x02;
const REG_HOURS: u8    = 0x04;
const REG_DAY: u8      = 0x07;
const REG_MONTH: u8    = 0x08;
const REG_YEAR: u8     = 0x09;
const REG_STATUS_A: u8 = 0x0A;
const REG_STATUS_B: u8 = 0x0B;
const REG_STATUS_C: u8 = 0x0C;

bitflags! {
    struct StatusB: u8 {
        const PERIODIC_INTERRUPT = 1 << 6;
        const BINARY_MODE        = 1 << 2; // clear means BCD encoded registers
        const HOUR_24            = 1 << 1; // clear means 12 hour format
    }
}

/// Rate divisor value 6 in status register A gives 32768 >> (6-1) = 1024 Hz.
const PERIODIC_RATE_1024HZ: u8 = 0x06;
pub const TICKS_PER_SECOND: u64 = 1024;

/// The RTC line on the slave PIC.
const RTC_IRQ_LINE: u8 = 8;

pub static RTC: Rtc = Rtc {
    boot_epoch: Mutex::new(0),
    ticks: AtomicU64::new(0),
};

/// Wall clock: the CMOS date is read once at boot, converted to a unix
/// timestamp, and advanced by the 1024 Hz periodic interrupt from then on.
pub struct Rtc {
    boot_epoch: Mutex<u64>,
    ticks: AtomicU64,
}

/// A calendar date and time as read from CMOS, already decoded to binary
/// 24 hour values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeData {
    pub second: u8,
    pub minute: u8,
    pub hour: u8,
    pub day: u8,
    pub month: u8,
    pub year: u32,
}

impl Rtc {
    /// Reads the wall clock, computes the boot timestamp and enables the
    /// periodic interrupt. Returns the boot unix timestamp.
    pub fn init(&self) -> Result<u64, TimerError> {
        let initial = self.read_cmos_time();
        let boot_epoch = unix_timestamp_from(initial);
        *self.boot_epoch.lock() = boot_epoch;

        interrupts::register_irq(RTC_IRQ_LINE, rtc_tick_handler);

        interrupts::without_interrupts(|| {
            // periodic interrupt on, rate 1024 Hz
            let prev_b = read_register(REG_STATUS_B | CMOS_DISABLE_NMI);
            write_register(REG_STATUS_B | CMOS_DISABLE_NMI, prev_b | StatusB::PERIODIC_INTERRUPT.bits());

            let prev_a = read_register(REG_STATUS_A | CMOS_DISABLE_NMI);
            write_register(REG_STATUS_A | CMOS_DISABLE_NMI, (prev_a & 0xF0) | PERIODIC_RATE_1024HZ);

            // a pending interrupt flag would block all further ones
            read_register(REG_STATUS_C);
        });

        Ok(boot_epoch)
    }

    /// Seconds since the unix epoch.
    pub fn now_epoch(&self) -> u64 {
        *self.boot_epoch.lock() + self.ticks.load(Ordering::Relaxed) / TICKS_PER_SECOND
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Reads a stable calendar time from CMOS, decoding BCD and 12 hour
    /// formats according to status register B.
    fn read_cmos_time(&self) -> TimeData {
        // wait out an in-progress update, the registers are inconsistent
        // while the clock rolls over
        while read_register(REG_STATUS_A | CMOS_DISABLE_NMI) & 0x80 != 0 {}

        let status_b = StatusB::from_bits_truncate(read_register(REG_STATUS_B | CMOS_DISABLE_NMI));
        let bcd = !status_b.contains(StatusB::BINARY_MODE);

        let second = read_register(REG_SECONDS);
        let minute = read_register(REG_MINUTES);
        let hour_raw = read_register(REG_HOURS);
        let day = read_register(REG_DAY);
        let month = read_register(REG_MONTH);
        let year = read_register(REG_YEAR);

        // in 12 hour format the PM flag rides on bit 7 of the hour byte
        let pm = !status_b.contains(StatusB::HOUR_24) && hour_raw & 0x80 != 0;
        let hour_raw = hour_raw & 0x7F;

        let decode = |value: u8| if bcd { bcd_to_binary(value) } else { value };

        let mut hour = decode(hour_raw);
        if pm {
            hour = (hour % 12) + 12;
        } else if !status_b.contains(StatusB::HOUR_24) && hour == 12 {
            hour = 0; // 12 AM is midnight
        }

        TimeData {
            second: decode(second),
            minute: decode(minute),
            hour,
            day: decode(day),
            month: decode(month),
            // the century register is unreliable, the two digit year is
            // anchored to the 2000s
            year: decode(year) as u32 + 2000,
        }
    }
}

fn rtc_tick_handler(_context: &mut InterruptContext) {
    // reading status C acknowledges the interrupt in the RTC itself,
    // without it the next periodic interrupt never fires
    read_register(REG_STATUS_C);

    RTC.ticks.fetch_add(1, Ordering::Relaxed);
}

fn read_register(reg: u8) -> u8 {
    IoPort::write_u8(CMOS_ADDRESS, reg);
    IoPort::read_u8(CMOS_DATA)
}

fn write_register(reg: u8, value: u8) {
    IoPort::write_u8(CMOS_ADDRESS, reg);
    IoPort::write_u8(CMOS_DATA, value);
}

fn bcd_to_binary(bcd: u8) -> u8 {
    (bcd / 16) * 10 + (bcd % 16)
}

/// Days in each month of a non leap year.
const DAYS_IN_MONTH: [u64; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

fn is_leap_year(year: u32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Converts a calendar date to seconds since the unix epoch.
pub fn unix_timestamp_from(data: TimeData) -> u64 {
    let mut timestamp: u64 = 0;

    for year in 1970..data.year {
        timestamp += 365 * 24 * 3600;
        if is_leap_year(year) {
            timestamp += 24 * 3600;
        }
    }

    for month in 1..data.month {
        timestamp += DAYS_IN_MONTH[month as usize - 1] * 24 * 3600;
        if month == 2 && is_leap_year(data.year) {
            timestamp += 24 * 3600;
        }
    }

    timestamp += (data.day as u64 - 1) * 24 * 3600;
    timestamp += data.hour as u64 * 3600;
    timestamp += data.minute as u64 * 60;
    timestamp += data.second as u64;

    timestamp
}
