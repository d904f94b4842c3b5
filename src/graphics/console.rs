use crate::interrupts;
use crate::multiboot2::framebuffer_info::{FrameBufferError, FrameBufferInfo};
use crate::multiboot2::MbBootInfo;
use super::font::{self, FONT_HEIGHT, FONT_WIDTH};
use super::framebuffer::{Framebuffer, Rgb};
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use spin::Mutex;

/// The kernel console, present once the framebuffer is up. Every writer
/// (print macros, the logger, the panic path) serializes behind this lock.
pub static CONSOLE: Mutex<Option<FramebufferConsole>> = Mutex::new(None);

/// The ANSI palette for SGR 30-37 / 40-47.
pub const ANSI_COLORS: [Rgb; 8] = [
    Rgb::new(0x00, 0x00, 0x00), // black
    Rgb::new(0xCC, 0x24, 0x1D), // red
    Rgb::new(0x98, 0x97, 0x1A), // green
    Rgb::new(0xD7, 0x99, 0x21), // yellow
    Rgb::new(0x45, 0x85, 0x88), // blue
    Rgb::new(0xB1, 0x62, 0x86), // magenta
    Rgb::new(0x68, 0x9D, 0x6A), // cyan
    Rgb::new(0xEB, 0xDB, 0xB2), // white
];

pub const DEFAULT_FG: Rgb = ANSI_COLORS[7];
pub const DEFAULT_BG: Rgb = ANSI_COLORS[0];

const TAB_WIDTH: usize = 4;

/// Colors a cell was last drawn with.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CellAttr {
    pub fg: Rgb,
    pub bg: Rgb,
}

/// Escape sequence parser state. Only the SGR color subset, cursor home and
/// clear screen are recognized; any other complete sequence is swallowed.
#[derive(Clone, Copy)]
enum EscapeState {
    Idle,
    Escape,
    Csi { params: [u16; 4], count: usize, current: u16, has_digits: bool },
}

pub struct FramebufferConsole {
    fb: Framebuffer,
    cols: usize,
    rows: usize,
    cursor_col: usize,
    cursor_row: usize,
    fg: Rgb,
    bg: Rgb,
    attrs: Vec<CellAttr>,
    escape: EscapeState,
}

impl FramebufferConsole {
    /// Builds a console over `fb`. The cell grid is the pixel size divided
    /// by the glyph size; leftover pixels on the right/bottom stay unused.
    pub fn new(fb: Framebuffer) -> Self {
        let cols = fb.width() as usize / FONT_WIDTH;
        let rows = fb.height() as usize / FONT_HEIGHT;
        assert!(cols > 0 && rows > 0, "the framebuffer is smaller than one glyph");

        fb.clear(DEFAULT_BG);

        FramebufferConsole {
            fb,
            cols,
            rows,
            cursor_col: 0,
            cursor_row: 0,
            fg: DEFAULT_FG,
            bg: DEFAULT_BG,
            attrs: vec![CellAttr { fg: DEFAULT_FG, bg: DEFAULT_BG }; cols * rows],
            escape: EscapeState::Idle,
        }
    }

    pub fn size(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.fb
    }

    pub fn cursor(&self) -> (usize, usize) {
        (self.cursor_col, self.cursor_row)
    }

    pub fn cell_attr(&self, col: usize, row: usize) -> CellAttr {
        self.attrs[row * self.cols + col]
    }

    pub fn set_color(&mut self, fg: Rgb, bg: Rgb) {
        self.fg = fg;
        self.bg = bg;
    }

    /// Clears the whole screen with the current background and homes the
    /// cursor.
    pub fn clear(&mut self) {
        self.fb.clear(self.bg);
        self.attrs.fill(CellAttr { fg: self.fg, bg: self.bg });
        self.cursor_col = 0;
        self.cursor_row = 0;
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.write_byte(byte);
        }
    }

    pub fn write_byte(&mut self, byte: u8) {
        // escape processing consumes the byte entirely
        if self.process_escape(byte) {
            return;
        }

        match byte {
            b'\n' => {
                self.cursor_col = 0;
                self.advance_row();
            }
            b'\r' => self.cursor_col = 0,
            b'\t' => {
                let next_stop = (self.cursor_col / TAB_WIDTH + 1) * TAB_WIDTH;
                while self.cursor_col < next_stop.min(self.cols) {
                    self.draw_at_cursor(b' ');
                    self.advance_col();
                }
            }
            b'\x08' => {
                // backspace erases the previous cell
                if self.cursor_col > 0 {
                    self.cursor_col -= 1;
                    self.draw_at_cursor(b' ');
                }
            }
            _ => {
                self.draw_at_cursor(byte);
                self.advance_col();
            }
        }
    }

    /// Feeds `byte` to the escape state machine. Returns true when the byte
    /// belonged to an escape sequence.
    fn process_escape(&mut self, byte: u8) -> bool {
        match self.escape {
            EscapeState::Idle => {
                if byte == 0x1B {
                    self.escape = EscapeState::Escape;
                    return true;
                }
                false
            }

            EscapeState::Escape => {
                if byte == b'[' {
                    self.escape = EscapeState::Csi { params: [0; 4], count: 0, current: 0, has_digits: false };
                } else {
                    // not a CSI introducer, drop the sequence
                    self.escape = EscapeState::Idle;
                }
                true
            }

            EscapeState::Csi { mut params, mut count, mut current, mut has_digits } => {
                match byte {
                    b'0'..=b'9' => {
                        current = current.saturating_mul(10).saturating_add((byte - b'0') as u16);
                        has_digits = true;
                        self.escape = EscapeState::Csi { params, count, current, has_digits };
                    }
                    b';' => {
                        if count < params.len() {
                            params[count] = current;
                            count += 1;
                        }
                        current = 0;
                        has_digits = false;
                        self.escape = EscapeState::Csi { params, count, current, has_digits };
                    }
                    final_byte => {
                        if has_digits && count < params.len() {
                            params[count] = current;
                            count += 1;
                        }
                        self.escape = EscapeState::Idle;
                        self.apply_csi(final_byte, &params[..count]);
                    }
                }
                true
            }
        }
    }

    fn apply_csi(&mut self, final_byte: u8, params: &[u16]) {
        match final_byte {
            b'm' => {
                if params.is_empty() {
                    self.set_color(DEFAULT_FG, DEFAULT_BG);
                }
                for &param in params {
                    match param {
                        0 => self.set_color(DEFAULT_FG, DEFAULT_BG),
                        30..=37 => self.fg = ANSI_COLORS[param as usize - 30],
                        40..=47 => self.bg = ANSI_COLORS[param as usize - 40],
                        _ => {} // unsupported attribute, ignored
                    }
                }
            }

            b'H' => {
                // cursor home (row/column parameters are not supported)
                self.cursor_col = 0;
                self.cursor_row = 0;
            }

            b'J' => self.clear(),

            _ => {} // unknown final byte, sequence dropped
        }
    }

    fn draw_at_cursor(&mut self, byte: u8) {
        let x = (self.cursor_col * FONT_WIDTH) as u32;
        let y = (self.cursor_row * FONT_HEIGHT) as u32;
        self.fb.draw_glyph(x, y, font::glyph(byte), self.fg, self.bg);
        self.attrs[self.cursor_row * self.cols + self.cursor_col] = CellAttr { fg: self.fg, bg: self.bg };
    }

    fn advance_col(&mut self) {
        self.cursor_col += 1;
        if self.cursor_col >= self.cols {
            self.cursor_col = 0;
            self.advance_row();
        }
    }

    fn advance_row(&mut self) {
        self.cursor_row += 1;
        if self.cursor_row >= self.rows {
            self.scroll();
            self.cursor_row = self.rows - 1;
        }
    }

    /// Scrolls one text row: the pixels move up by one glyph height and the
    /// last row becomes background. The attribute buffer moves along.
    fn scroll(&mut self) {
        self.fb.scroll_up(FONT_HEIGHT as u32, self.bg);

        self.attrs.copy_within(self.cols.., 0);
        let last_row = (self.rows - 1) * self.cols;
        self.attrs[last_row..].fill(CellAttr { fg: self.fg, bg: self.bg });
    }
}

impl fmt::Write for FramebufferConsole {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_bytes(s.as_bytes());
        Ok(())
    }
}

#[derive(Debug)]
pub enum ConsoleError {
    NoFramebufferTag,
    FrameBuffer(FrameBufferError),
}

/// Stands up the global console over the boot framebuffer. Needs the heap
/// (the attribute buffer) and paging, so this runs late in the bring-up.
pub fn init(mb_info: &MbBootInfo) -> Result<(), ConsoleError> {
    let info = mb_info.get_tag::<FrameBufferInfo>().ok_or(ConsoleError::NoFramebufferTag)?;
    let fb = Framebuffer::from_boot_info(info).map_err(ConsoleError::FrameBuffer)?;
    let console = FramebufferConsole::new(fb);

    interrupts::without_interrupts(|| {
        *CONSOLE.lock() = Some(console);
    });

    Ok(())
}

/// Writes raw bytes (escape sequences included) to the global console.
pub fn console_write(bytes: &[u8]) {
    interrupts::without_interrupts(|| {
        if let Some(console) = &mut *CONSOLE.lock() {
            console.write_bytes(bytes);
        }
    });
}

pub fn console_set_color(fg: Rgb, bg: Rgb) {
    interrupts::without_interrupts(|| {
        if let Some(console) = &mut *CONSOLE.lock() {
            console.set_color(fg, bg);
        }
    });
}

pub fn console_clear() {
    interrupts::without_interrupts(|| {
        if let Some(console) = &mut *CONSOLE.lock() {
            console.clear();
        }
    });
}

#[doc(hidden)]
pub fn _console_print(args: fmt::Arguments) {
    use core::fmt::Write;

    interrupts::without_interrupts(|| {
        if let Some(console) = &mut *CONSOLE.lock() {
            console.write_fmt(args).unwrap();
        }
    });
}
