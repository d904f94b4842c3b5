use crate::memory::PhysicalAddress;
use super::{tag_trait::MbTag, MbTagHeader, TagType};

#[repr(u8)]
#[derive(Debug, PartialEq, Eq)]
pub enum FrameBufferType {
    IndexedColor = 0,
    DirectRGBColor = 1,
    EGAText = 2,
}

#[derive(Debug)]
pub enum FrameBufferError {
    UnknownFrameBufferType,
    /// The kernel console only renders direct RGB framebuffers.
    UnsupportedFrameBufferType,
}

/// Channel layout for a direct RGB framebuffer (bit positions and widths
/// inside one pixel).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ColorInfoDirectRGBColor {
    pub red_field_position: u8,
    pub red_mask_size: u8,
    pub green_field_position: u8,
    pub green_mask_size: u8,
    pub blue_field_position: u8,
    pub blue_mask_size: u8,
}

#[repr(C)]
#[derive(ptr_meta::Pointee)]
pub struct FrameBufferInfo {
    header: MbTagHeader,
    framebuffer_addr: u64, // physical address
    framebuffer_pitch: u32,
    framebuffer_width: u32,
    framebuffer_height: u32,
    framebuffer_bpp: u8,
    framebuffer_type: u8,
    reserved: u8,
    color_info: [u8], // depends on framebuffer_type
}

impl FrameBufferInfo {
    pub fn fb_type(&self) -> Result<FrameBufferType, FrameBufferError> {
        match self.framebuffer_type {
            0 => Ok(FrameBufferType::IndexedColor),
            1 => Ok(FrameBufferType::DirectRGBColor),
            2 => Ok(FrameBufferType::EGAText),
            _ => Err(FrameBufferError::UnknownFrameBufferType),
        }
    }

    pub fn phy_addr(&self) -> PhysicalAddress {
        self.framebuffer_addr as PhysicalAddress
    }

    pub fn pitch(&self) -> u32 {
        self.framebuffer_pitch
    }

    pub fn width(&self) -> u32 {
        self.framebuffer_width
    }

    pub fn height(&self) -> u32 {
        self.framebuffer_height
    }

    pub fn bpp(&self) -> u8 {
        self.framebuffer_bpp
    }

    /// Channel layout, only meaningful for [FrameBufferType::DirectRGBColor].
    pub fn color_info(&self) -> Result<&ColorInfoDirectRGBColor, FrameBufferError> {
        if self.fb_type()? != FrameBufferType::DirectRGBColor {
            return Err(FrameBufferError::UnsupportedFrameBufferType);
        }

        // Safety: the layout is guaranteed by the tag type checked above
        Ok(unsafe { &*(self.color_info.as_ptr() as *const ColorInfoDirectRGBColor) })
    }
}

impl MbTag for FrameBufferInfo {
    const TAG_TYPE: TagType = TagType::FrameBufferInfo;

    fn dst_size(base_tag: &MbTagHeader) -> Self::Metadata {
        // fixed fields between the header and the color info take 23 bytes
        base_tag.size as usize - size_of::<MbTagHeader>() - 23
    }
}
