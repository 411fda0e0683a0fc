use std::sync::Arc;

use async_trait::async_trait;
use flate2::read::{DeflateDecoder, MultiGzDecoder};

use super::{AccessMode, ByteStream, DedupKey, ForwardOnly, ReferenceKey, StreamFactory, Window};
use crate::error::Result;

/// How a derived stream is decoded from its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Raw bytes at `offset`.
    Stored { offset: u64, length: u64 },
    /// Raw deflate data at `offset` (ZIP method 8).
    Deflate { offset: u64, compressed: u64 },
    /// The whole parent is a gzip stream.
    Gzip,
}

/// A stream nested inside another factory's content: an archive entry or
/// the payload of a compressed file. Opening it reopens the parent.
///
/// The data key combines the entry name with its offset, since an archive
/// may hold several entries under one name.
pub struct DerivedStreamFactory {
    parent: Arc<dyn StreamFactory>,
    parent_key: DedupKey,
    name: String,
    data_key: String,
    encoding: Encoding,
    length: Option<u64>,
}

impl DerivedStreamFactory {
    pub fn new(
        parent: Arc<dyn StreamFactory>,
        name: impl Into<String>,
        encoding: Encoding,
        length: Option<u64>,
    ) -> Self {
        let parent_key = parent.dedup_key();
        let name = name.into();
        let data_key = match encoding {
            Encoding::Stored { offset, .. } | Encoding::Deflate { offset, .. } => format!("{name}@{offset}"),
            Encoding::Gzip => name.clone(),
        };
        Self {
            parent,
            parent_key,
            name,
            data_key,
            encoding,
            length,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl StreamFactory for DerivedStreamFactory {
    fn length(&self) -> Option<u64> {
        self.length
    }

    fn access_mode(&self) -> AccessMode {
        self.parent.access_mode().derive()
    }

    fn reference_key(&self) -> ReferenceKey {
        ReferenceKey::Nested(Box::new(self.parent_key.clone()))
    }

    fn data_key(&self) -> Option<String> {
        Some(self.data_key.clone())
    }

    async fn open(&self) -> Result<Box<dyn ByteStream>> {
        let parent = self.parent.open().await?;
        let stream: Box<dyn ByteStream> = match self.encoding {
            Encoding::Stored { offset, length } => Box::new(Window::new(parent, offset, length)?),
            Encoding::Deflate { offset, compressed } => {
                let window = Window::new(parent, offset, compressed)?;
                Box::new(ForwardOnly::new(DeflateDecoder::new(window), self.length))
            }
            Encoding::Gzip => Box::new(ForwardOnly::new(MultiGzDecoder::new(parent), self.length)),
        };
        Ok(stream)
    }
}
