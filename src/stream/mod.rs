//! Re-openable byte sources.
//!
//! A [`StreamFactory`] stands for one logical object (a file, a buffer, an
//! archive entry) that can be opened any number of times. Two factories with
//! equal [`DedupKey`]s must yield byte-identical content; the node cache
//! relies on it.

pub mod derived;
pub mod io;
pub mod serialized;

pub use derived::{DerivedStreamFactory, Encoding};
pub use io::{read_up_to, ForwardOnly, Window};
pub use serialized::SerializedStreamFactory;

use std::fmt;
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Readable, seekable stream handed to format parsers.
///
/// Forward-only sources (decompressors) implement `Seek` for forward moves
/// only and report `seekable() == false`; see [`ForwardOnly`].
pub trait ByteStream: Read + Seek + Send {
    /// Whether backward seeks are supported.
    fn seekable(&self) -> bool {
        true
    }
}

impl ByteStream for std::fs::File {}

impl ByteStream for Cursor<Bytes> {}

impl ByteStream for Cursor<Vec<u8>> {}

impl ByteStream for Box<dyn ByteStream> {
    fn seekable(&self) -> bool {
        (**self).seekable()
    }
}

/// How a factory may be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Concurrent opens are safe and all see the same content.
    Reentrant,
    /// Concurrent opens are safe; each open is an independent stream.
    Parallel,
    /// Only one open at a time.
    Single,
}

impl AccessMode {
    pub fn allows_concurrency(self) -> bool {
        !matches!(self, AccessMode::Single)
    }

    /// Mode of a stream derived from a parent with this mode.
    pub fn derive(self) -> AccessMode {
        match self {
            AccessMode::Single => AccessMode::Single,
            _ => AccessMode::Parallel,
        }
    }
}

/// Identity of the physical source behind a factory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReferenceKey {
    /// Device and inode; hard links share it.
    File { device: u64, inode: u64 },
    /// Canonical path, used where inodes are unavailable.
    Path(PathBuf),
    /// In-memory buffer, identified per allocation.
    Buffer(u64),
    /// Stream derived from another object, e.g. an archive entry.
    Nested(Box<DedupKey>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub reference: ReferenceKey,
    pub data: Option<String>,
}

impl DedupKey {
    pub fn new(reference: ReferenceKey, data: Option<String>) -> Self {
        Self { reference, data }
    }

    /// Key of a stream nested in the object identified by `self`.
    pub fn nested(&self, data: impl Into<String>) -> Self {
        Self {
            reference: ReferenceKey::Nested(Box::new(self.clone())),
            data: Some(data.into()),
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reference {
            ReferenceKey::File { device, inode } => write!(f, "file:{}:{}", device, inode)?,
            ReferenceKey::Path(path) => write!(f, "path:{}", path.display())?,
            ReferenceKey::Buffer(id) => write!(f, "buffer:{}", id)?,
            ReferenceKey::Nested(parent) => write!(f, "{}", parent)?,
        }
        if let Some(data) = &self.data {
            write!(f, "!{}", data)?;
        }
        Ok(())
    }
}

#[async_trait]
pub trait StreamFactory: Send + Sync {
    /// Length in bytes, when known without opening.
    fn length(&self) -> Option<u64>;

    fn access_mode(&self) -> AccessMode;

    fn reference_key(&self) -> ReferenceKey;

    /// Distinguishes logical streams sharing one reference.
    fn data_key(&self) -> Option<String> {
        None
    }

    fn dedup_key(&self) -> DedupKey {
        DedupKey::new(self.reference_key(), self.data_key())
    }

    async fn open(&self) -> Result<Box<dyn ByteStream>>;
}

/// A file on disk. Every open is an independent handle.
pub struct FileStreamFactory {
    path: PathBuf,
    length: u64,
    reference: ReferenceKey,
}

impl FileStreamFactory {
    pub fn new(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            length: metadata.len(),
            reference: file_reference(path, &metadata)?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
pub(crate) fn file_reference(_path: &Path, metadata: &std::fs::Metadata) -> Result<ReferenceKey> {
    use std::os::unix::fs::MetadataExt;
    Ok(ReferenceKey::File {
        device: metadata.dev(),
        inode: metadata.ino(),
    })
}

#[cfg(not(unix))]
pub(crate) fn file_reference(path: &Path, _metadata: &std::fs::Metadata) -> Result<ReferenceKey> {
    Ok(ReferenceKey::Path(std::fs::canonicalize(path)?))
}

#[async_trait]
impl StreamFactory for FileStreamFactory {
    fn length(&self) -> Option<u64> {
        Some(self.length)
    }

    fn access_mode(&self) -> AccessMode {
        AccessMode::Parallel
    }

    fn reference_key(&self) -> ReferenceKey {
        self.reference.clone()
    }

    async fn open(&self) -> Result<Box<dyn ByteStream>> {
        let file = tokio::fs::File::open(&self.path).await?;
        Ok(Box::new(file.into_std().await))
    }
}

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// A shared in-memory buffer. Clones keep the same identity.
#[derive(Clone)]
pub struct MemoryStreamFactory {
    data: Bytes,
    id: u64,
    name: Option<String>,
}

impl MemoryStreamFactory {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }
}

#[async_trait]
impl StreamFactory for MemoryStreamFactory {
    fn length(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn access_mode(&self) -> AccessMode {
        AccessMode::Reentrant
    }

    fn reference_key(&self) -> ReferenceKey {
        ReferenceKey::Buffer(self.id)
    }

    fn data_key(&self) -> Option<String> {
        self.name.clone()
    }

    async fn open(&self) -> Result<Box<dyn ByteStream>> {
        Ok(Box::new(Cursor::new(self.data.clone())))
    }
}
