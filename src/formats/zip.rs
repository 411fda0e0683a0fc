//! ZIP archives.
//!
//! The central directory is read at parse time. Local headers, which give the
//! real data offsets, are read when entries are listed; a bad local header
//! only marks that one entry as corrupted.

use std::any::Any;
use std::borrow::Cow;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use super::{le_u16, le_u32, Container, ContainerEntry, EntryListing, Format, FormatValue};
use crate::error::{ArchiverError, Result};
use crate::graph::LinkedNode;
use crate::stream::{read_up_to, ByteStream, DerivedStreamFactory, Encoding, StreamFactory};
use crate::vocab::{Class, Property};

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const EOCD_SIG: u32 = 0x0605_4b50;

const LOCAL_HEADER_LEN: usize = 30;
const CENTRAL_HEADER_LEN: usize = 46;
const EOCD_LEN: usize = 22;
const MAX_COMMENT_LEN: usize = 0xFFFF;

/// Largest forward-only archive that is buffered in memory for parsing.
const MAX_BUFFERED: u64 = 256 * 1024 * 1024;

const FLAG_ENCRYPTED: u16 = 0x0001;
const FLAG_UTF8: u16 = 0x0800;

pub struct ZipFormat;

impl Format for ZipFormat {
    fn name(&self) -> &'static str {
        "zip"
    }

    fn header_length(&self) -> usize {
        4
    }

    fn could_match(&self, header: &[u8], _hint: &super::HeaderHint) -> bool {
        header.starts_with(b"PK\x03\x04") || header.starts_with(b"PK\x05\x06")
    }

    fn parse(
        &self,
        mut stream: Box<dyn ByteStream>,
        source: Arc<dyn StreamFactory>,
    ) -> Result<Arc<dyn FormatValue>> {
        let (entries, comment) = if stream.seekable() {
            read_central_directory(&mut stream)?
        } else {
            let mut buffer = Vec::new();
            stream.by_ref().take(MAX_BUFFERED + 1).read_to_end(&mut buffer)?;
            if buffer.len() as u64 > MAX_BUFFERED {
                return Err(ArchiverError::format("zip", "archive too large to buffer"));
            }
            read_central_directory(&mut Cursor::new(buffer))?
        };

        Ok(Arc::new(ZipArchive {
            source,
            entries,
            comment,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct CentralEntry {
    pub name: String,
    pub flags: u16,
    pub method: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub local_header_offset: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl CentralEntry {
    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }
}

pub struct ZipArchive {
    source: Arc<dyn StreamFactory>,
    entries: Vec<CentralEntry>,
    comment: Option<String>,
}

impl ZipArchive {
    pub fn entries(&self) -> &[CentralEntry] {
        &self.entries
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }
}

impl FormatValue for ZipArchive {
    fn media_type(&self) -> Cow<'static, str> {
        Cow::Borrowed("application/zip")
    }

    fn extension(&self) -> Option<Cow<'static, str>> {
        Some(Cow::Borrowed("zip"))
    }

    fn describe(&self, node: &LinkedNode) {
        node.set_class(Class::Archive);
        node.set(Property::EntryCount, self.entries.len() as u64);
    }

    fn container(&self) -> Option<&dyn Container> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl Container for ZipArchive {
    async fn entries(&self) -> EntryListing {
        let stream = match self.source.open().await {
            Ok(stream) => stream,
            Err(e) => return EntryListing::failed(e),
        };
        let entries = self.entries.clone();
        let source = self.source.clone();
        match tokio::task::spawn_blocking(move || list_entries(stream, &entries, &source)).await {
            Ok(listing) => listing,
            Err(e) => EntryListing::failed(e.into()),
        }
    }
}

fn method_name(method: u16) -> &'static str {
    match method {
        0 => "stored",
        8 => "deflate",
        9 => "deflate64",
        12 => "bzip2",
        14 => "lzma",
        93 => "zstd",
        95 => "xz",
        99 => "aes",
        _ => "unknown",
    }
}

fn list_entries(
    mut stream: Box<dyn ByteStream>,
    entries: &[CentralEntry],
    source: &Arc<dyn StreamFactory>,
) -> EntryListing {
    // ascending offsets keep forward-only sources usable
    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by_key(|&i| entries[i].local_header_offset);

    let mut listed: Vec<Option<ContainerEntry>> = vec![None; entries.len()];
    let mut error = None;

    for i in order {
        let central = &entries[i];
        let mut entry = ContainerEntry {
            path: central.name.clone(),
            is_directory: central.is_directory(),
            length: Some(central.uncompressed_size),
            compressed_length: Some(central.compressed_size),
            encrypted: central.is_encrypted(),
            modified: central.modified,
            compression: Some(method_name(central.method)),
            ..Default::default()
        };

        if !entry.is_directory && !entry.encrypted && error.is_none() {
            match data_offset(&mut stream, central) {
                Ok(offset) => entry.source = entry_source(source, central, offset),
                Err(ArchiverError::Corrupted(message)) => {
                    tracing::debug!("ZIP entry {}: {}", central.name, message);
                    entry.corrupted = true;
                }
                Err(e) => error = Some(e),
            }
        }
        listed[i] = Some(entry);
    }

    EntryListing {
        entries: listed.into_iter().flatten().collect(),
        error,
    }
}

fn entry_source(
    source: &Arc<dyn StreamFactory>,
    central: &CentralEntry,
    offset: u64,
) -> Option<Arc<dyn StreamFactory>> {
    let encoding = match central.method {
        0 => Encoding::Stored {
            offset,
            length: central.compressed_size,
        },
        8 => Encoding::Deflate {
            offset,
            compressed: central.compressed_size,
        },
        _ => return None,
    };
    Some(Arc::new(DerivedStreamFactory::new(
        source.clone(),
        central.name.clone(),
        encoding,
        Some(central.uncompressed_size),
    )))
}

fn data_offset<R: Read + Seek>(stream: &mut R, central: &CentralEntry) -> Result<u64> {
    stream.seek(SeekFrom::Start(central.local_header_offset))?;
    let mut header = [0u8; LOCAL_HEADER_LEN];
    if read_up_to(stream, &mut header)? < LOCAL_HEADER_LEN {
        return Err(ArchiverError::Corrupted("truncated local header".into()));
    }
    if le_u32(&header, 0) != Some(LOCAL_HEADER_SIG) {
        return Err(ArchiverError::Corrupted("bad local header signature".into()));
    }
    let name_len = le_u16(&header, 26).unwrap_or(0) as u64;
    let extra_len = le_u16(&header, 28).unwrap_or(0) as u64;
    Ok(central.local_header_offset + LOCAL_HEADER_LEN as u64 + name_len + extra_len)
}

fn read_central_directory<R: Read + Seek>(
    stream: &mut R,
) -> Result<(Vec<CentralEntry>, Option<String>)> {
    let len = stream.seek(SeekFrom::End(0))?;
    if len < EOCD_LEN as u64 {
        return Err(ArchiverError::format("zip", "too short for end of central directory"));
    }

    let tail_len = len.min((EOCD_LEN + MAX_COMMENT_LEN) as u64);
    stream.seek(SeekFrom::Start(len - tail_len))?;
    let mut tail = vec![0u8; tail_len as usize];
    stream.read_exact(&mut tail)?;

    let eocd = (0..=tail.len() - EOCD_LEN)
        .rev()
        .find(|&i| le_u32(&tail, i) == Some(EOCD_SIG))
        .ok_or_else(|| ArchiverError::format("zip", "end of central directory not found"))?;
    let record = &tail[eocd..];

    let count = le_u16(record, 10).unwrap_or(0);
    let cd_size = le_u32(record, 12).unwrap_or(0);
    let cd_offset = le_u32(record, 16).unwrap_or(0);
    let comment_len = le_u16(record, 20).unwrap_or(0) as usize;
    if count == 0xFFFF || cd_size == 0xFFFF_FFFF || cd_offset == 0xFFFF_FFFF {
        return Err(ArchiverError::format("zip", "ZIP64 archives are not supported"));
    }
    let comment = record
        .get(EOCD_LEN..EOCD_LEN + comment_len)
        .filter(|c| !c.is_empty())
        .map(|c| String::from_utf8_lossy(c).into_owned());

    if cd_offset as u64 + cd_size as u64 > len {
        return Err(ArchiverError::format("zip", "central directory out of bounds"));
    }
    stream.seek(SeekFrom::Start(cd_offset as u64))?;
    let mut directory = vec![0u8; cd_size as usize];
    stream.read_exact(&mut directory)?;

    let mut entries = Vec::with_capacity(count as usize);
    let mut pos = 0usize;
    for _ in 0..count {
        let header = directory
            .get(pos..pos + CENTRAL_HEADER_LEN)
            .ok_or_else(|| ArchiverError::format("zip", "truncated central directory"))?;
        if le_u32(header, 0) != Some(CENTRAL_HEADER_SIG) {
            return Err(ArchiverError::format("zip", "bad central directory signature"));
        }
        let flags = le_u16(header, 8).unwrap_or(0);
        let method = le_u16(header, 10).unwrap_or(0);
        let time = le_u16(header, 12).unwrap_or(0);
        let date = le_u16(header, 14).unwrap_or(0);
        let crc32 = le_u32(header, 16).unwrap_or(0);
        let compressed_size = le_u32(header, 20).unwrap_or(0) as u64;
        let uncompressed_size = le_u32(header, 24).unwrap_or(0) as u64;
        let name_len = le_u16(header, 28).unwrap_or(0) as usize;
        let extra_len = le_u16(header, 30).unwrap_or(0) as usize;
        let entry_comment_len = le_u16(header, 32).unwrap_or(0) as usize;
        let local_header_offset = le_u32(header, 42).unwrap_or(0) as u64;

        let name_start = pos + CENTRAL_HEADER_LEN;
        let raw_name = directory
            .get(name_start..name_start + name_len)
            .ok_or_else(|| ArchiverError::format("zip", "truncated file name"))?;
        let name = if flags & FLAG_UTF8 != 0 {
            String::from_utf8_lossy(raw_name).into_owned()
        } else {
            decode_cp437(raw_name)
        };

        entries.push(CentralEntry {
            name,
            flags,
            method,
            crc32,
            compressed_size,
            uncompressed_size,
            local_header_offset,
            modified: dos_datetime(date, time),
        });
        pos = name_start + name_len + extra_len + entry_comment_len;
    }

    Ok((entries, comment))
}

/// ASCII passes through; the upper half is decoded as UTF-8 when valid.
fn decode_cp437(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

fn dos_datetime(date: u16, time: u16) -> Option<DateTime<Utc>> {
    let year = 1980 + (date >> 9) as i32;
    let month = ((date >> 5) & 0x0F) as u32;
    let day = (date & 0x1F) as u32;
    let hour = (time >> 11) as u32;
    let minute = ((time >> 5) & 0x3F) as u32;
    let second = ((time & 0x1F) * 2) as u32;
    NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_opt(hour, minute, second)
        .map(|dt| dt.and_utc())
}
