// https://www.gnu.org/software/grub/manual/multiboot2/multiboot.html
// https://wiki.osdev.org/Multiboot
pub mod tag_iter;
pub mod tag_trait;
pub mod cmd_line;
pub mod boot_loader_name;
pub mod modules;
pub mod memory_map;
pub mod elf_symbols;
pub mod framebuffer_info;
pub mod acpi_old_rsdp;
pub mod acpi_new_rsdp;

use crate::memory::VirtualAddress;
use tag_iter::MbTagIter;
use tag_trait::MbTag;

/// The value a Multiboot2 compliant loader leaves in EAX.
pub const MB2_BOOTLOADER_MAGIC: u64 = 0x36d76289;

/// Upper bound on the boot info struct size used to detect garbage pointers
/// before trusting `total_size`.
const MB2_MAX_TOTAL_SIZE: u32 = 1024 * 1024;

#[repr(C)]
#[derive(Clone)]
struct MbBootInformationHeader {
    total_size: u32,
    reserved: u32,
    // followed by the tags
}

#[repr(C)]
pub struct MbTagHeader {
    tag_type: u32,
    size: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TagType {
    End,
    CmdLine,
    BootLoaderName,
    Modules,
    BasicMemoryInfo,
    BiosBootDevice,
    MemoryMap,
    VbeInfo,
    FrameBufferInfo,
    ElfSymbols,
    ApmTable,
    AcpiOldRsdp,
    AcpiNewRsdp,
    Unknown(u32),
}

impl TagType {
    fn from_u32(tag_type: u32) -> TagType {
        match tag_type {
            0  => TagType::End,
            1  => TagType::CmdLine,
            2  => TagType::BootLoaderName,
            3  => TagType::Modules,
            4  => TagType::BasicMemoryInfo,
            5  => TagType::BiosBootDevice,
            6  => TagType::MemoryMap,
            7  => TagType::VbeInfo,
            8  => TagType::FrameBufferInfo,
            9  => TagType::ElfSymbols,
            10 => TagType::ApmTable,
            14 => TagType::AcpiOldRsdp,
            15 => TagType::AcpiNewRsdp,
            other => TagType::Unknown(other),
        }
    }
}

impl MbTagHeader {
    pub fn tag_type(&self) -> TagType {
        TagType::from_u32(self.tag_type)
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    fn cast_to<T: MbTag + ?Sized>(&self) -> &T {
        // Safety: At this point, we take the data as being valid as it was already checked.
        unsafe { MbTag::from_base_tag(self) }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Multiboot2Error {
    /// The magic value in the entry register did not come from a Multiboot2 loader.
    BadMagic(u64),
    NullPointer,
    MisalignedPointer,
    /// `total_size` is smaller than the fixed header or absurdly large.
    BadTotalSize(u32),
    /// No end tag was found inside the declared `total_size`.
    UnterminatedTags,
}

pub struct MbBootInfo {
    header: MbBootInformationHeader,

    /*
     * Not using NonNull<MbTagHeader> as it expects mut ptrs.
     */
    tags_ptr: *const MbTagHeader,
}

// Safety: The boot info is read-only after the loader hands it over and the
// struct itself is never mutated, so sharing it between contexts is fine.
unsafe impl Send for MbBootInfo {}
unsafe impl Sync for MbBootInfo {}

impl MbBootInfo {
    /// Validates and wraps the boot information handed over by the loader.
    ///
    /// This performs every sanity check the rest of the kernel relies on:
    /// the loader magic, pointer validity, a bound on `total_size` and the
    /// presence of a terminating end tag inside that bound.
    ///
    /// # Safety
    ///
    /// `mb_boot_info` must point to memory that stays mapped and unmodified
    /// for the lifetime of the kernel.
    pub unsafe fn new(mb_magic: u64, mb_boot_info: *const u8) -> Result<Self, Multiboot2Error> {
        if mb_magic != MB2_BOOTLOADER_MAGIC {
            return Err(Multiboot2Error::BadMagic(mb_magic));
        }

        if mb_boot_info.is_null() {
            return Err(Multiboot2Error::NullPointer);
        }

        // the whole struct must be 64bit aligned per the multiboot2 protocol
        if mb_boot_info.align_offset(size_of::<u64>()) != 0 {
            return Err(Multiboot2Error::MisalignedPointer);
        }

        let header: &MbBootInformationHeader = unsafe { &*mb_boot_info.cast() };
        if header.total_size < size_of::<MbBootInformationHeader>() as u32 + size_of::<MbTagHeader>() as u32
            || header.total_size > MB2_MAX_TOTAL_SIZE
        {
            return Err(Multiboot2Error::BadTotalSize(header.total_size));
        }

        let tags_ptr: *const MbTagHeader = unsafe {
            mb_boot_info.byte_offset(size_of::<MbBootInformationHeader>() as isize).cast()
        };

        let info = Self {
            header: header.clone(),
            tags_ptr,
        };

        // the tag chain must be terminated by an end tag within total_size
        info.check_terminated()?;
        Ok(info)
    }

    /// Walks the whole chain once. Any tag stepping past the declared size
    /// before the end tag shows up means the boot info is malformed.
    fn check_terminated(&self) -> Result<(), Multiboot2Error> {
        let mut curr = self.tags_ptr;
        let max = self.max_tag_addr();

        loop {
            if curr as VirtualAddress >= max {
                return Err(Multiboot2Error::UnterminatedTags);
            }

            let tag = unsafe { &*curr };
            if tag.tag_type() == TagType::End {
                return Ok(());
            }

            let step = (tag.size as usize + 7) & !7;
            if step == 0 {
                return Err(Multiboot2Error::UnterminatedTags);
            }

            curr = unsafe { curr.byte_offset(step as isize) };
        }
    }

    /// First address past the boot info struct.
    fn max_tag_addr(&self) -> VirtualAddress {
        self.tags_ptr as VirtualAddress + self.header.total_size as usize
            - size_of::<MbBootInformationHeader>()
    }

    pub(crate) fn tags(&self) -> MbTagIter {
        MbTagIter::new(self.tags_ptr, self.max_tag_addr())
    }

    /// Lookup-first by tag type.
    pub fn get_tag<T: MbTag + ?Sized>(&self) -> Option<&T> {
        self.tags()
            .find(|tag| tag.tag_type() == T::TAG_TYPE)
            .map(|tag| tag.cast_to::<T>())
    }

    /// Enumerate every tag of one type (boot modules may repeat).
    pub fn get_tags<'a, T: MbTag + ?Sized + 'a>(&'a self) -> impl Iterator<Item = &'a T> {
        self.tags()
            .filter(|tag| tag.tag_type() == T::TAG_TYPE)
            .map(|tag| tag.cast_to::<T>())
    }

    /// Address of the boot info struct itself.
    pub fn addr(&self) -> VirtualAddress {
        self.tags_ptr as VirtualAddress - size_of::<MbBootInformationHeader>()
    }

    /// Total size (in bytes) of the boot info struct.
    pub fn size(&self) -> u32 {
        self.header.total_size
    }
}
