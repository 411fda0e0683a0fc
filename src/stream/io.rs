use std::io::{self, Read, Seek, SeekFrom};

use super::ByteStream;

/// Reads until `buf` is full or the stream ends. Returns the byte count.
pub fn read_up_to<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// A `[start, start + len)` view over a seekable stream.
pub struct Window<R> {
    inner: R,
    start: u64,
    len: u64,
    pos: u64,
}

impl<R: Read + Seek> Window<R> {
    pub fn new(mut inner: R, start: u64, len: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(start))?;
        Ok(Self {
            inner,
            start,
            len,
            pos: 0,
        })
    }
}

impl<R: Read> Read for Window<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len {
            return Ok(0);
        }
        let max = (self.len - self.pos).min(buf.len() as u64) as usize;
        let n = self.inner.read(&mut buf[..max])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Seek> Seek for Window<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = resolve_seek(pos, self.pos, Some(self.len))?;
        self.inner
            .seek(SeekFrom::Start(self.start + target.min(self.len)))?;
        self.pos = target;
        Ok(target)
    }
}

impl<R: ByteStream> ByteStream for Window<R> {
    fn seekable(&self) -> bool {
        self.inner.seekable()
    }
}

/// Adapts a plain reader (e.g. a decompressor) to `Seek`.
///
/// Only forward moves are possible; they are served by discarding bytes.
pub struct ForwardOnly<R> {
    inner: R,
    pos: u64,
    len: Option<u64>,
}

impl<R: Read> ForwardOnly<R> {
    pub fn new(inner: R, len: Option<u64>) -> Self {
        Self { inner, pos: 0, len }
    }
}

impl<R: Read> Read for ForwardOnly<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read> Seek for ForwardOnly<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = resolve_seek(pos, self.pos, self.len)?;
        if target < self.pos {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stream does not support seeking backwards",
            ));
        }
        let skip = target - self.pos;
        let skipped = io::copy(&mut (&mut self.inner).take(skip), &mut io::sink())?;
        self.pos += skipped;
        Ok(self.pos)
    }
}

impl<R: Read + Send> ByteStream for ForwardOnly<R> {
    fn seekable(&self) -> bool {
        false
    }
}

fn resolve_seek(pos: SeekFrom, current: u64, len: Option<u64>) -> io::Result<u64> {
    let (base, offset) = match pos {
        SeekFrom::Start(n) => return Ok(n),
        SeekFrom::Current(off) => (current, off),
        SeekFrom::End(off) => match len {
            Some(len) => (len, off),
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "stream length is unknown",
                ))
            }
        },
    };
    base.checked_add_signed(offset).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream")
    })
}
