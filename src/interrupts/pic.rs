// https://wiki.osdev.org/8259_PIC
use crate::io_port::IoPort;
use core::sync::atomic::{AtomicU64, Ordering};

const PIC1_COMMAND: u16 = 0x20;
const PIC1_DATA: u16    = 0x21;
const PIC2_COMMAND: u16 = 0xA0;
const PIC2_DATA: u16    = 0xA1;

const ICW1_INIT: u8 = 0x10;
const ICW1_ICW4: u8 = 0x01;
const ICW4_8086: u8 = 0x01;

const PIC_EOI: u8 = 0x20;

// OCW3 command selecting the in-service register for the next data read
const PIC_READ_ISR: u8 = 0x0B;

/// The two cascaded 8259s, remapped so their 16 lines land on the vectors
/// right after the cpu exceptions.
pub struct Pic {
    master_offset: u8,
    slave_offset: u8,
}

/// Spurious IRQs (line 7/15 raised with nothing in service) are dropped, but
/// counted so a noisy line can be diagnosed.
pub static SPURIOUS_IRQ_COUNT: AtomicU64 = AtomicU64::new(0);

impl Pic {
    pub const fn new(master_offset: u8, slave_offset: u8) -> Self {
        Pic { master_offset, slave_offset }
    }

    pub fn master_offset(&self) -> u8 {
        self.master_offset
    }

    pub fn slave_offset(&self) -> u8 {
        self.slave_offset
    }

    /// Runs the ICW init sequence: remap both PICs to the configured vector
    /// offsets, wire the slave to master line 2, select 8086 mode and mask
    /// every line. Lines are unmasked one by one as handlers register.
    ///
    /// Each configuration write is followed by an I/O delay, the 8259 needs
    /// time to settle between command bytes.
    pub fn init(&self) {
        IoPort::write_u8(PIC1_COMMAND, ICW1_INIT | ICW1_ICW4);
        IoPort::io_wait();
        IoPort::write_u8(PIC2_COMMAND, ICW1_INIT | ICW1_ICW4);
        IoPort::io_wait();

        // set the vector offsets
        IoPort::write_u8(PIC1_DATA, self.master_offset);
        IoPort::io_wait();
        IoPort::write_u8(PIC2_DATA, self.slave_offset);
        IoPort::io_wait();

        // tell the master that there is a slave PIC at line 2 (0000 0100)
        IoPort::write_u8(PIC1_DATA, 4);
        IoPort::io_wait();

        // tell the slave its cascade identity (0000 0010)
        IoPort::write_u8(PIC2_DATA, 2);
        IoPort::io_wait();

        // set both PICs to 8086/88 mode
        IoPort::write_u8(PIC1_DATA, ICW4_8086);
        IoPort::io_wait();
        IoPort::write_u8(PIC2_DATA, ICW4_8086);
        IoPort::io_wait();

        // mask every line until a handler claims it
        IoPort::write_u8(PIC1_DATA, 0xFF);
        IoPort::io_wait();
        IoPort::write_u8(PIC2_DATA, 0xFF);
        IoPort::io_wait();

        // the cascade line must stay open or the slave can never deliver
        self.clear_irq_mask(2);
    }

    /// Masks every line on both PICs.
    pub fn disable(&self) {
        IoPort::write_u8(PIC1_DATA, 0xFF);
        IoPort::io_wait();
        IoPort::write_u8(PIC2_DATA, 0xFF);
        IoPort::io_wait();
    }

    pub fn set_irq_mask(&self, irq_line: u8) {
        assert!(irq_line < 16);
        let (port, line) = Self::line_port(irq_line);

        let mask = IoPort::read_u8(port) | (1 << line);
        IoPort::write_u8(port, mask);
        IoPort::io_wait();
    }

    pub fn clear_irq_mask(&self, irq_line: u8) {
        assert!(irq_line < 16);
        let (port, line) = Self::line_port(irq_line);

        let mask = IoPort::read_u8(port) & !(1 << line);
        IoPort::write_u8(port, mask);
        IoPort::io_wait();
    }

    /// Acknowledges `irq_line`; lines on the slave need an EOI on both chips.
    pub fn send_eoi(&self, irq_line: u8) {
        if irq_line >= 8 {
            IoPort::write_u8(PIC2_COMMAND, PIC_EOI);
        }
        IoPort::write_u8(PIC1_COMMAND, PIC_EOI);
    }

    /// Checks whether `irq_line` is actually being serviced. A line 7 or 15
    /// interrupt whose in-service bit is clear is spurious.
    pub fn is_spurious(&self, irq_line: u8) -> bool {
        if irq_line == 7 {
            IoPort::write_u8(PIC1_COMMAND, PIC_READ_ISR);
            return IoPort::read_u8(PIC1_COMMAND) & (1 << 7) == 0;
        }

        if irq_line == 15 {
            IoPort::write_u8(PIC2_COMMAND, PIC_READ_ISR);
            return IoPort::read_u8(PIC2_COMMAND) & (1 << 7) == 0;
        }

        false
    }

    /// Handles a spurious interrupt. A spurious line 7 is counted and
    /// dropped with no EOI; a spurious line 15 means the cascade itself is
    /// lying to us and there is no sane way to continue.
    pub fn handle_spurious(&self, irq_line: u8) {
        SPURIOUS_IRQ_COUNT.fetch_add(1, Ordering::Relaxed);

        if irq_line == 15 {
            panic!("spurious interrupt on the slave PIC");
        }
    }

    fn line_port(irq_line: u8) -> (u16, u8) {
        if irq_line < 8 {
            (PIC1_DATA, irq_line)
        } else {
            (PIC2_DATA, irq_line - 8)
        }
    }
}
