// https://refspecs.linuxfoundation.org/elf/elf.pdf
use crate::memory::PhysicalAddress;
use super::{tag_trait::MbTag, MbTagHeader, TagType};
use core::ptr::slice_from_raw_parts;
use bitflags::bitflags;

/// ELF section headers of the loaded kernel image. The physical span of the
/// image is derived from the sections flagged as allocated.
#[repr(C)]
#[derive(ptr_meta::Pointee)]
pub struct ElfSymbols {
    header: MbTagHeader,
    num: u32,        // number of section headers
    entry_size: u32, // size of each section header (64 for ELF64)
    string_table: u32,

    /*
     * If this was `section_headers: [ElfSectionHeader]`, it would unalign the sections by 4 bytes
     * and thus, make the reading completely wrong.
     */
    section_headers: [u8],
}

#[repr(C)]
struct ElfSectionHeader {
    name_index: u32,
    section_type: u32,
    flags: u64,
    addr: u64,
    offset: u64,
    size: u64,
    link: u32,
    info: u32,
    addralign: u64,
    entry_size: u64,
}

pub struct ElfSection {
    header: &'static ElfSectionHeader,
}

bitflags! {
    #[derive(Debug)]
    pub struct ElfSectionFlags: u64 {
        const ELF_SECTION_WRITABLE   = 0x00000001; // section contains data that is writable
        const ELF_SECTION_ALLOCATED  = 0x00000002; // section is in memory during execution
        const ELF_SECTION_EXECUTABLE = 0x00000004; // section contains executable code
    }
}

#[derive(Debug)]
pub enum ElfSectionError {
    Invalid32BitSectionHeaders,
}

impl ElfSymbols {
    // Safety: This assumes that the memory is valid as it *should* only be created by the bootloader and thus,
    // it assumes correct bootloader behavior.
    pub fn sections(&self) -> Result<ElfSymbolsIter, ElfSectionError> {
        if self.entry_size as usize != size_of::<ElfSectionHeader>() { // must be 64 bytes
            return Err(ElfSectionError::Invalid32BitSectionHeaders);
        }

        // construct the elf sections from raw bytes
        let section_headers_ptr: *const ElfSectionHeader = &self.section_headers as *const [u8] as *const u8 as *const _;
        let sections = slice_from_raw_parts(section_headers_ptr, self.num as usize);
        let sections = unsafe { &*sections };

        Ok(ElfSymbolsIter {
            sections,
            curr_section_idx: 0,
        })
    }
}

impl MbTag for ElfSymbols {
    const TAG_TYPE: TagType = TagType::ElfSymbols;

    fn dst_size(base_tag: &MbTagHeader) -> Self::Metadata {
        base_tag.size as usize - size_of::<MbTagHeader>() - size_of::<u32>() * 3
    }
}

impl ElfSection {
    pub fn flags(&self) -> ElfSectionFlags {
        ElfSectionFlags::from_bits_truncate(self.header.flags)
    }

    pub fn addr(&self) -> PhysicalAddress {
        self.header.addr as _
    }

    pub fn size(&self) -> u64 {
        self.header.size
    }
}

#[derive(Clone, Copy)]
pub struct ElfSymbolsIter {
    sections: &'static [ElfSectionHeader],
    curr_section_idx: usize,
}

impl Iterator for ElfSymbolsIter {
    type Item = ElfSection;

    fn next(&mut self) -> Option<Self::Item> {
        if self.curr_section_idx >= self.sections.len() {
            return None;
        }

        // go to the next section and return the current one
        self.curr_section_idx += 1;
        Some(ElfSection {
            header: &self.sections[self.curr_section_idx - 1],
        })
    }
}
