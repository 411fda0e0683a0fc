//! MS-DOS `MZ` executables.

use std::any::Any;
use std::borrow::Cow;
use std::sync::Arc;

use super::{le_u16, Format, FormatValue, HeaderHint};
use crate::error::Result;
use crate::graph::LinkedNode;
use crate::stream::{read_up_to, ByteStream, StreamFactory};
use crate::vocab::{Class, Property};

pub(crate) const MZ_HEADER_LEN: usize = 64;

pub struct DosFormat;

impl Format for DosFormat {
    fn name(&self) -> &'static str {
        "dos"
    }

    fn header_length(&self) -> usize {
        2
    }

    fn could_match(&self, header: &[u8], _hint: &HeaderHint) -> bool {
        header.starts_with(b"MZ")
    }

    fn parse(
        &self,
        mut stream: Box<dyn ByteStream>,
        _source: Arc<dyn StreamFactory>,
    ) -> Result<Arc<dyn FormatValue>> {
        let mut header = [0u8; MZ_HEADER_LEN];
        let n = read_up_to(&mut stream, &mut header)?;
        let header = &header[..n];

        let last_page = le_u16(header, 2);
        let pages = le_u16(header, 4);
        let image_size = match (last_page, pages) {
            (Some(_), Some(0)) | (None, _) | (_, None) => None,
            (Some(0), Some(pages)) => Some(pages as u64 * 512),
            (Some(last), Some(pages)) => Some((pages as u64 - 1) * 512 + last as u64),
        };

        Ok(Arc::new(DosExecutable {
            image_size,
            relocations: le_u16(header, 6).unwrap_or(0),
        }))
    }
}

#[derive(Debug)]
pub struct DosExecutable {
    pub image_size: Option<u64>,
    pub relocations: u16,
}

impl FormatValue for DosExecutable {
    fn media_type(&self) -> Cow<'static, str> {
        Cow::Borrowed("application/x-dosexec")
    }

    fn extension(&self) -> Option<Cow<'static, str>> {
        Some(Cow::Borrowed("exe"))
    }

    fn describe(&self, node: &LinkedNode) {
        node.set_class(Class::Executable);
        node.set(Property::Subsystem, "ms-dos");
        if let Some(size) = self.image_size {
            node.set(Property::Extent, size);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
