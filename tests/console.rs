#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(borealos::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::vec;
use borealos::graphics::console::{FramebufferConsole, ANSI_COLORS, DEFAULT_BG, DEFAULT_FG};
use borealos::graphics::font::{FONT_HEIGHT, FONT_WIDTH};
use borealos::graphics::framebuffer::{Framebuffer, Rgb};
use core::panic::PanicInfo;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    borealos::test_panic_handler(info);
}

/// # Safety
///
/// Called once by the boot assembly with the Multiboot2 register values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn main(mb_magic: u64, mb_boot_info_addr: *const u8) -> ! {
    unsafe { borealos::init(mb_magic, mb_boot_info_addr) };
    test_main();
    borealos::hlt();
}

const WIDTH: u32 = 640;  // 80 columns
const HEIGHT: u32 = 320; // 20 rows
const PITCH: u32 = WIDTH * 4;

/// A console rendering into plain heap memory; the buffer must outlive the
/// console, so it is leaked.
fn test_console() -> FramebufferConsole {
    let buffer = vec![0u8; (PITCH * HEIGHT) as usize].leak();
    let fb = unsafe { Framebuffer::from_raw_parts(buffer.as_mut_ptr() as usize, WIDTH, HEIGHT, PITCH) };
    FramebufferConsole::new(fb)
}

#[test_case]
fn grid_is_derived_from_the_pixel_size() {
    let console = test_console();
    assert_eq!(console.size(), ((WIDTH as usize) / FONT_WIDTH, (HEIGHT as usize) / FONT_HEIGHT));
    assert_eq!(console.cursor(), (0, 0));
}

#[test_case]
fn plain_text_advances_and_wraps_the_cursor() {
    let mut console = test_console();
    let (cols, _) = console.size();

    console.write_bytes(b"AB");
    assert_eq!(console.cursor(), (2, 0));

    console.write_bytes(b"\n");
    assert_eq!(console.cursor(), (0, 1));

    // fill the rest of row 1 and one more cell, the cursor must wrap
    for _ in 0..cols + 1 {
        console.write_bytes(b"x");
    }
    assert_eq!(console.cursor(), (1, 2));
}

#[test_case]
fn control_bytes_move_the_cursor() {
    let mut console = test_console();

    console.write_bytes(b"abcd\r");
    assert_eq!(console.cursor(), (0, 0));

    console.write_bytes(b"\t");
    assert_eq!(console.cursor(), (4, 0));

    console.write_bytes(b"z\x08");
    assert_eq!(console.cursor(), (4, 0));
}

#[test_case]
fn sgr_colors_apply_to_drawn_cells() {
    let mut console = test_console();

    console.write_bytes(b"A\x1b[31mB\x1b[44mC\x1b[0mD");

    assert_eq!(console.cell_attr(0, 0).fg, DEFAULT_FG);
    assert_eq!(console.cell_attr(1, 0).fg, ANSI_COLORS[1]); // red foreground
    assert_eq!(console.cell_attr(2, 0).fg, ANSI_COLORS[1]);
    assert_eq!(console.cell_attr(2, 0).bg, ANSI_COLORS[4]); // blue background
    assert_eq!(console.cell_attr(3, 0).fg, DEFAULT_FG);     // reset
    assert_eq!(console.cell_attr(3, 0).bg, DEFAULT_BG);
}

#[test_case]
fn cursor_home_and_clear_screen() {
    let mut console = test_console();

    console.write_bytes(b"some text\nmore text");
    console.write_bytes(b"\x1b[H");
    assert_eq!(console.cursor(), (0, 0));

    console.write_bytes(b"XY\x1b[2J");
    assert_eq!(console.cursor(), (0, 0));
    // everything is background again after the clear
    assert_eq!(console.cell_attr(0, 0).bg, DEFAULT_BG);
}

#[test_case]
fn unknown_escape_sequences_are_swallowed() {
    let mut console = test_console();

    // an unsupported CSI command and a non-CSI escape must print nothing
    console.write_bytes(b"\x1b[5A\x1bZA");
    assert_eq!(console.cursor(), (1, 0));
}

#[test_case]
fn scrolling_consumes_exactly_one_row() {
    let mut console = test_console();
    let (_, rows) = console.size();

    // write one character per row until the bottom, then force one scroll
    for _ in 0..rows {
        console.write_bytes(b"r\n");
    }
    assert_eq!(console.cursor(), (0, rows - 1));

    // glyph rows drawn earlier moved up, the bottom row is clean background
    console.write_bytes(b"s");
    assert_eq!(console.cursor(), (1, rows - 1));
}

#[test_case]
fn glyphs_change_the_pixels_under_the_cell() {
    let mut console = test_console();
    console.write_bytes(b"\x1b[37mM");

    // at least one pixel inside the first cell must be foreground now
    let fg = encoded(DEFAULT_FG);
    let mut found = false;
    'outer: for y in 0..FONT_HEIGHT as u32 {
        for x in 0..FONT_WIDTH as u32 {
            if console_pixel(&console, x, y) == fg {
                found = true;
                break 'outer;
            }
        }
    }
    assert!(found);
}

fn encoded(color: Rgb) -> u32 {
    ((color.r as u32) << 16) | ((color.g as u32) << 8) | color.b as u32
}

fn console_pixel(console: &FramebufferConsole, x: u32, y: u32) -> u32 {
    console.framebuffer().get_pixel(x, y)
}
