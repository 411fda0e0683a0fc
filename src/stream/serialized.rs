use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::{AccessMode, ByteStream, ReferenceKey, StreamFactory};
use crate::error::{ArchiverError, Result};

/// Restricts a factory to one open stream at a time.
///
/// `open` waits until the previously opened stream is dropped. Used for
/// sources that cannot be read concurrently, e.g. forward-only readers.
pub struct SerializedStreamFactory {
    inner: Arc<dyn StreamFactory>,
    gate: Arc<Semaphore>,
}

impl SerializedStreamFactory {
    pub fn new(inner: Arc<dyn StreamFactory>) -> Self {
        Self {
            inner,
            gate: Arc::new(Semaphore::new(1)),
        }
    }
}

struct Gated {
    stream: Box<dyn ByteStream>,
    _permit: OwnedSemaphorePermit,
}

impl Read for Gated {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Seek for Gated {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.stream.seek(pos)
    }
}

impl ByteStream for Gated {
    fn seekable(&self) -> bool {
        self.stream.seekable()
    }
}

#[async_trait]
impl StreamFactory for SerializedStreamFactory {
    fn length(&self) -> Option<u64> {
        self.inner.length()
    }

    fn access_mode(&self) -> AccessMode {
        AccessMode::Single
    }

    fn reference_key(&self) -> ReferenceKey {
        self.inner.reference_key()
    }

    fn data_key(&self) -> Option<String> {
        self.inner.data_key()
    }

    async fn open(&self) -> Result<Box<dyn ByteStream>> {
        let permit = self
            .gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ArchiverError::Task("stream gate closed".into()))?;
        let stream = self.inner.open().await?;
        Ok(Box::new(Gated {
            stream,
            _permit: permit,
        }))
    }
}
