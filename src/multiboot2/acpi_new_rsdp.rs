// https://wiki.osdev.org/RSDP
use super::{acpi_old_rsdp::RsdpV1, tag_trait::MbTag, MbTagHeader, TagType};

/// ACPI 2.0+ root system description pointer, as copied into the boot info.
#[repr(C, packed)]
pub struct RsdpV2 {
    pub v1: RsdpV1,

    pub length: u32,
    pub xsdt_address: u64,
    pub extended_checksum: u8,
    pub reserved: [u8; 3],
}

impl RsdpV2 {
    /// The bytes the extended checksum covers (the full declared length).
    pub fn bytes(&self) -> &[u8] {
        let len = self.length as usize;
        assert!(len >= size_of::<RsdpV2>());
        // Safety: the structure declares its own length and the loader copied that many bytes
        unsafe { core::slice::from_raw_parts(self as *const _ as *const u8, len) }
    }
}

#[repr(C)]
#[derive(ptr_meta::Pointee)]
pub struct AcpiNewRsdp {
    header: MbTagHeader,
    rsdp: [u8],
}

impl AcpiNewRsdp {
    pub fn rsdp(&self) -> &RsdpV2 {
        assert!(self.rsdp.len() >= size_of::<RsdpV2>());
        // Safety: the loader copies a full XSDP structure into this tag
        unsafe { &*(self.rsdp.as_ptr() as *const RsdpV2) }
    }
}

impl MbTag for AcpiNewRsdp {
    const TAG_TYPE: TagType = TagType::AcpiNewRsdp;

    fn dst_size(base_tag: &MbTagHeader) -> Self::Metadata {
        base_tag.size as usize - size_of::<MbTagHeader>()
    }
}
