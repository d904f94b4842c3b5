// https://wiki.osdev.org/RSDP
use super::{tag_trait::MbTag, MbTagHeader, TagType};

/// ACPI 1.0 root system description pointer, as copied into the boot info.
#[repr(C, packed)]
pub struct RsdpV1 {
    pub signature: [u8; 8],
    pub checksum: u8,
    pub oemid: [u8; 6],
    pub revision: u8,
    pub rsdt_address: u32,
}

impl RsdpV1 {
    /// The 20 bytes the v1 checksum covers.
    pub fn bytes(&self) -> &[u8] {
        // Safety: RsdpV1 is packed, so its size is exactly the wire size
        unsafe { core::slice::from_raw_parts(self as *const _ as *const u8, size_of::<RsdpV1>()) }
    }
}

#[repr(C)]
#[derive(ptr_meta::Pointee)]
pub struct AcpiOldRsdp {
    header: MbTagHeader,
    rsdp: [u8],
}

impl AcpiOldRsdp {
    pub fn rsdp(&self) -> &RsdpV1 {
        assert!(self.rsdp.len() >= size_of::<RsdpV1>());
        // Safety: the loader copies a full RSDP structure into this tag
        unsafe { &*(self.rsdp.as_ptr() as *const RsdpV1) }
    }
}

impl MbTag for AcpiOldRsdp {
    const TAG_TYPE: TagType = TagType::AcpiOldRsdp;

    fn dst_size(base_tag: &MbTagHeader) -> Self::Metadata {
        base_tag.size as usize - size_of::<MbTagHeader>()
    }
}
