use super::{tag_trait::MbTag, MbTagHeader, TagType};

#[repr(C)]
#[derive(ptr_meta::Pointee)]
pub struct CmdLine {
    header: MbTagHeader,
    string: [u8],
}

#[derive(Debug)]
pub enum CmdLineError {
    StringMissingNull,
    StringNotUtf8,
}

impl CmdLine {
    pub fn string(&self) -> Result<&str, CmdLineError> {
        // get the cstr using ffi and return it as a &str
        let cstr = core::ffi::CStr::from_bytes_until_nul(&self.string).map_err(|_| CmdLineError::StringMissingNull)?;
        cstr.to_str().map_err(|_| CmdLineError::StringNotUtf8)
    }
}

impl MbTag for CmdLine {
    const TAG_TYPE: TagType = TagType::CmdLine;

    fn dst_size(base_tag: &MbTagHeader) -> Self::Metadata {
        base_tag.size as usize - size_of::<MbTagHeader>()
    }
}
