use crate::memory::frames::FRAME_ALLOCATOR;
use crate::memory::pages::page_table::page_table_entry::EntryFlags;
use crate::memory::pages::paging::ACTIVE_PAGING_CTX;
use crate::memory::{phys_to_virt, AddrOps, VirtualAddress, FRAME_PAGE_SIZE};
use crate::multiboot2::framebuffer_info::{FrameBufferError, FrameBufferInfo, FrameBufferType};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Rgb { r, g, b }
    }
}

/// A direct-RGB linear framebuffer. Pixel writes are volatile, the memory is
/// device memory as far as the kernel is concerned.
pub struct Framebuffer {
    base: VirtualAddress,
    width: u32,
    height: u32,
    pitch: u32,
    red_position: u8,
    green_position: u8,
    blue_position: u8,
}

impl Framebuffer {
    /// Builds the framebuffer from the boot descriptor and makes sure its
    /// physical range is mapped. Only 32 bpp direct RGB modes are supported;
    /// everything else the console cannot render.
    pub fn from_boot_info(info: &FrameBufferInfo) -> Result<Self, FrameBufferError> {
        if info.fb_type()? != FrameBufferType::DirectRGBColor {
            return Err(FrameBufferError::UnsupportedFrameBufferType);
        }
        if info.bpp() != 32 {
            return Err(FrameBufferError::UnsupportedFrameBufferType);
        }

        let color_info = info.color_info()?;
        let base = phys_to_virt(info.phy_addr());

        // the loader's direct map usually covers the framebuffer already;
        // map whatever part of it is missing
        let fb_bytes = info.pitch() as usize * info.height() as usize;
        let first_page = info.phy_addr().align_down(FRAME_PAGE_SIZE);
        let last_page = (info.phy_addr() + fb_bytes - 1).align_down(FRAME_PAGE_SIZE);
        let mut page = first_page;
        while page <= last_page {
            if ACTIVE_PAGING_CTX.translate(phys_to_virt(page)).is_none() {
                ACTIVE_PAGING_CTX
                    .map(phys_to_virt(page), page, &FRAME_ALLOCATOR,
                        EntryFlags::WRITABLE | EntryFlags::NO_CACHE | EntryFlags::NO_EXECUTE)
                    .expect("out of physical memory while mapping the framebuffer");
            }
            page += FRAME_PAGE_SIZE;
        }

        Ok(Framebuffer {
            base,
            width: info.width(),
            height: info.height(),
            pitch: info.pitch(),
            red_position: color_info.red_field_position,
            green_position: color_info.green_field_position,
            blue_position: color_info.blue_field_position,
        })
    }

    /// Wraps an arbitrary chunk of memory as a framebuffer. Test images
    /// render into heap buffers through this.
    ///
    /// # Safety
    ///
    /// `base` must point to at least `pitch * height` writable bytes that
    /// outlive the framebuffer.
    pub unsafe fn from_raw_parts(base: VirtualAddress, width: u32, height: u32, pitch: u32) -> Self {
        Framebuffer {
            base,
            width,
            height,
            pitch,
            // the conventional 0x00RRGGBB layout
            red_position: 16,
            green_position: 8,
            blue_position: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn encode(&self, color: Rgb) -> u32 {
        ((color.r as u32) << self.red_position)
            | ((color.g as u32) << self.green_position)
            | ((color.b as u32) << self.blue_position)
    }

    fn pixel_ptr(&self, x: u32, y: u32) -> *mut u32 {
        debug_assert!(x < self.width && y < self.height);
        (self.base + y as usize * self.pitch as usize + x as usize * 4) as *mut u32
    }

    pub fn put_pixel(&self, x: u32, y: u32, color: Rgb) {
        unsafe { self.pixel_ptr(x, y).write_volatile(self.encode(color)) };
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> u32 {
        unsafe { self.pixel_ptr(x, y).read_volatile() }
    }

    pub fn fill_rect(&self, x: u32, y: u32, w: u32, h: u32, color: Rgb) {
        let pixel = self.encode(color);
        for row in y..y + h {
            let mut ptr = self.pixel_ptr(x, row);
            for _ in 0..w {
                unsafe {
                    ptr.write_volatile(pixel);
                    ptr = ptr.add(1);
                }
            }
        }
    }

    pub fn clear(&self, color: Rgb) {
        self.fill_rect(0, 0, self.width, self.height, color);
    }

    /// Draws one glyph with its cell background.
    pub fn draw_glyph(&self, x: u32, y: u32, glyph: &[u8; super::font::FONT_HEIGHT], fg: Rgb, bg: Rgb) {
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..super::font::FONT_WIDTH {
                let set = bits & (0x80 >> col) != 0;
                self.put_pixel(x + col as u32, y + row as u32, if set { fg } else { bg });
            }
        }
    }

    /// Scrolls the whole framebuffer up by `rows_px` pixel rows and fills
    /// the freed band at the bottom with `fill`. This moves
    /// `pitch * (height - rows_px)` bytes.
    pub fn scroll_up(&self, rows_px: u32, fill: Rgb) {
        assert!(rows_px <= self.height);

        let moved_bytes = self.pitch as usize * (self.height - rows_px) as usize;
        unsafe {
            core::ptr::copy(
                (self.base + rows_px as usize * self.pitch as usize) as *const u8,
                self.base as *mut u8,
                moved_bytes,
            );
        }

        self.fill_rect(0, self.height - rows_px, self.width, rows_px, fill);
    }
}

// Safety: the framebuffer memory is exclusively owned by whoever holds the
// struct; the console serializes all access behind its lock.
unsafe impl Send for Framebuffer {}
