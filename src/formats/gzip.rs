//! gzip files: a container holding one decompressed payload.

use std::any::Any;
use std::borrow::Cow;
use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Container, ContainerEntry, EntryListing, Format, FormatValue, HeaderHint};
use crate::error::{ArchiverError, Result};
use crate::graph::LinkedNode;
use crate::stream::{read_up_to, ByteStream, DerivedStreamFactory, Encoding, StreamFactory};
use crate::vocab::{Class, Property};

const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;
const MAX_NAME_LEN: usize = 4096;

pub struct GzipFormat;

impl Format for GzipFormat {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn header_length(&self) -> usize {
        3
    }

    fn could_match(&self, header: &[u8], _hint: &HeaderHint) -> bool {
        header.starts_with(&[0x1f, 0x8b, 0x08])
    }

    fn parse(
        &self,
        mut stream: Box<dyn ByteStream>,
        source: Arc<dyn StreamFactory>,
    ) -> Result<Arc<dyn FormatValue>> {
        let mut fixed = [0u8; 10];
        if read_up_to(&mut stream, &mut fixed)? < fixed.len() {
            return Err(ArchiverError::format("gzip", "truncated header"));
        }
        let flags = fixed[3];
        let mtime = u32::from_le_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]);

        if flags & FEXTRA != 0 {
            let mut len = [0u8; 2];
            stream.read_exact(&mut len)?;
            std::io::copy(
                &mut stream.by_ref().take(u16::from_le_bytes(len) as u64),
                &mut std::io::sink(),
            )?;
        }
        let name = if flags & FNAME != 0 {
            Some(read_zero_terminated(&mut stream)?)
        } else {
            None
        };
        let comment = if flags & FCOMMENT != 0 {
            Some(read_zero_terminated(&mut stream)?)
        } else {
            None
        };
        if flags & FHCRC != 0 {
            let mut crc = [0u8; 2];
            stream.read_exact(&mut crc)?;
        }

        Ok(Arc::new(GzipFile {
            source,
            name,
            comment,
            modified: (mtime != 0)
                .then(|| DateTime::from_timestamp(mtime as i64, 0))
                .flatten(),
        }))
    }
}

fn read_zero_terminated<R: Read>(stream: &mut R) -> Result<String> {
    let mut bytes = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte)?;
        if byte[0] == 0 {
            break;
        }
        if bytes.len() == MAX_NAME_LEN {
            return Err(ArchiverError::format("gzip", "header string too long"));
        }
        bytes.push(byte[0]);
    }
    // header strings are ISO 8859-1
    Ok(bytes.into_iter().map(char::from).collect())
}

pub struct GzipFile {
    source: Arc<dyn StreamFactory>,
    name: Option<String>,
    comment: Option<String>,
    modified: Option<DateTime<Utc>>,
}

impl GzipFile {
    pub fn original_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Entry name of the payload: the stored name without directories, or
    /// `content` when none was stored.
    pub fn payload_name(&self) -> String {
        self.name
            .as_deref()
            .and_then(|n| n.rsplit(['/', '\\']).next())
            .filter(|n| !n.is_empty())
            .unwrap_or("content")
            .to_string()
    }
}

impl FormatValue for GzipFile {
    fn media_type(&self) -> Cow<'static, str> {
        Cow::Borrowed("application/gzip")
    }

    fn extension(&self) -> Option<Cow<'static, str>> {
        Some(Cow::Borrowed("gz"))
    }

    fn describe(&self, node: &LinkedNode) {
        node.set_class(Class::Archive);
        node.set_class(Class::CompressedFile);
        node.set(Property::CompressionMethod, "deflate");
        if let Some(comment) = &self.comment {
            node.set(Property::Comment, comment.as_str());
        }
    }

    fn container(&self) -> Option<&dyn Container> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl Container for GzipFile {
    async fn entries(&self) -> EntryListing {
        let name = self.payload_name();
        EntryListing {
            entries: vec![ContainerEntry {
                source: Some(Arc::new(DerivedStreamFactory::new(
                    self.source.clone(),
                    name.clone(),
                    Encoding::Gzip,
                    None,
                ))),
                path: name,
                modified: self.modified,
                compressed_length: self.source.length(),
                compression: Some("deflate"),
                ..Default::default()
            }],
            error: None,
        }
    }
}
