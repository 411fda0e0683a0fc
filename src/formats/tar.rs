//! POSIX ustar archives, including GNU long names and PAX path overrides.
//!
//! Entries are enumerated lazily by walking headers front to back, so tar
//! payloads inside compressed streams need no backward seeks.

use std::any::Any;
use std::borrow::Cow;
use std::io::{Seek, SeekFrom};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{Container, ContainerEntry, EntryListing, Format, FormatValue, HeaderHint};
use crate::error::{ArchiverError, Result};
use crate::graph::LinkedNode;
use crate::stream::{read_up_to, ByteStream, DerivedStreamFactory, Encoding, StreamFactory};
use crate::vocab::Class;

pub const BLOCK_LEN: usize = 512;
const MAGIC_OFFSET: usize = 257;
/// Upper bound on GNU long name and PAX record payloads.
const MAX_META_LEN: u64 = 1024 * 1024;

pub struct TarFormat;

impl Format for TarFormat {
    fn name(&self) -> &'static str {
        "tar"
    }

    fn header_length(&self) -> usize {
        BLOCK_LEN
    }

    fn could_match(&self, header: &[u8], _hint: &HeaderHint) -> bool {
        header.len() >= BLOCK_LEN
            && &header[MAGIC_OFFSET..MAGIC_OFFSET + 5] == b"ustar"
            && checksum_ok(&header[..BLOCK_LEN])
    }

    fn parse(
        &self,
        mut stream: Box<dyn ByteStream>,
        source: Arc<dyn StreamFactory>,
    ) -> Result<Arc<dyn FormatValue>> {
        let mut block = [0u8; BLOCK_LEN];
        if read_up_to(&mut stream, &mut block)? < BLOCK_LEN || !checksum_ok(&block) {
            return Err(ArchiverError::format("tar", "invalid first header"));
        }
        let first_entry = field_str(&block[0..100]);
        Ok(Arc::new(TarArchive {
            source,
            first_entry,
        }))
    }
}

pub struct TarArchive {
    source: Arc<dyn StreamFactory>,
    first_entry: String,
}

impl TarArchive {
    pub fn first_entry(&self) -> &str {
        &self.first_entry
    }
}

impl FormatValue for TarArchive {
    fn media_type(&self) -> Cow<'static, str> {
        Cow::Borrowed("application/x-tar")
    }

    fn extension(&self) -> Option<Cow<'static, str>> {
        Some(Cow::Borrowed("tar"))
    }

    fn describe(&self, node: &LinkedNode) {
        node.set_class(Class::Archive);
    }

    fn container(&self) -> Option<&dyn Container> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl Container for TarArchive {
    async fn entries(&self) -> EntryListing {
        let stream = match self.source.open().await {
            Ok(stream) => stream,
            Err(e) => return EntryListing::failed(e),
        };
        let source = self.source.clone();
        match tokio::task::spawn_blocking(move || walk(stream, &source)).await {
            Ok(listing) => listing,
            Err(e) => EntryListing::failed(e.into()),
        }
    }
}

fn walk(mut stream: Box<dyn ByteStream>, source: &Arc<dyn StreamFactory>) -> EntryListing {
    let mut listing = EntryListing::default();
    let mut reader = HeaderReader {
        stream: &mut stream,
        pos: 0,
    };
    if let Err(e) = reader.run(&mut listing.entries, source) {
        listing.error = Some(e);
    }
    listing
}

struct HeaderReader<'a> {
    stream: &'a mut Box<dyn ByteStream>,
    pos: u64,
}

impl HeaderReader<'_> {
    fn run(&mut self, entries: &mut Vec<ContainerEntry>, source: &Arc<dyn StreamFactory>) -> Result<()> {
        let mut long_name: Option<String> = None;
        let mut pax_path: Option<String> = None;
        let mut pax_mtime: Option<DateTime<Utc>> = None;
        let mut block = [0u8; BLOCK_LEN];

        loop {
            let n = read_up_to(self.stream, &mut block)?;
            self.pos += n as u64;
            if n == 0 {
                return Ok(());
            }
            if n < BLOCK_LEN {
                return Err(ArchiverError::Corrupted("truncated tar header".into()));
            }
            if block.iter().all(|&b| b == 0) {
                return Ok(());
            }
            if !checksum_ok(&block) {
                return Err(ArchiverError::Corrupted(format!(
                    "bad tar header checksum at offset {}",
                    self.pos - BLOCK_LEN as u64
                )));
            }

            let size = parse_number(&block[124..136])
                .ok_or_else(|| ArchiverError::Corrupted("bad tar size field".into()))?;
            let data_offset = self.pos;
            let typeflag = block[156];

            match typeflag {
                b'L' => {
                    long_name = Some(self.read_meta(size)?.trim_end_matches('\0').to_string());
                    continue;
                }
                b'x' => {
                    for (key, value) in parse_pax(&self.read_meta(size)?) {
                        match key.as_str() {
                            "path" => pax_path = Some(value),
                            "mtime" => {
                                pax_mtime = value
                                    .split('.')
                                    .next()
                                    .and_then(|s| s.parse::<i64>().ok())
                                    .and_then(|secs| DateTime::from_timestamp(secs, 0));
                            }
                            _ => {}
                        }
                    }
                    continue;
                }
                _ => {}
            }

            let header_name = if &block[MAGIC_OFFSET..MAGIC_OFFSET + 5] == b"ustar" {
                let prefix = field_str(&block[345..500]);
                let name = field_str(&block[0..100]);
                if prefix.is_empty() {
                    name
                } else {
                    format!("{}/{}", prefix, name)
                }
            } else {
                field_str(&block[0..100])
            };
            let path = pax_path.take().or(long_name.take()).unwrap_or(header_name);
            let modified = pax_mtime.take().or_else(|| {
                parse_number(&block[136..148])
                    .and_then(|secs| i64::try_from(secs).ok())
                    .and_then(|secs| DateTime::from_timestamp(secs, 0))
            });

            match typeflag {
                b'0' | b'\0' | b'7' => entries.push(ContainerEntry {
                    source: Some(Arc::new(DerivedStreamFactory::new(
                        source.clone(),
                        path.clone(),
                        Encoding::Stored {
                            offset: data_offset,
                            length: size,
                        },
                        Some(size),
                    ))),
                    path,
                    length: Some(size),
                    modified,
                    ..Default::default()
                }),
                b'5' => entries.push(ContainerEntry {
                    path,
                    is_directory: true,
                    modified,
                    ..Default::default()
                }),
                other => debug!("Skipping tar entry {} of type {:?}", path, other as char),
            }

            self.skip(size)?;
        }
    }

    fn read_meta(&mut self, size: u64) -> Result<String> {
        if size > MAX_META_LEN {
            return Err(ArchiverError::Corrupted("tar metadata record too large".into()));
        }
        let mut data = vec![0u8; size as usize];
        if read_up_to(self.stream, &mut data)? < data.len() {
            return Err(ArchiverError::Corrupted("truncated tar metadata".into()));
        }
        self.pos += size;
        self.skip_padding(size)?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    fn skip(&mut self, size: u64) -> Result<()> {
        let target = self.pos + padded(size);
        self.stream.seek(SeekFrom::Start(target))?;
        self.pos = target;
        Ok(())
    }

    fn skip_padding(&mut self, size: u64) -> Result<()> {
        let target = self.pos + padded(size) - size;
        self.stream.seek(SeekFrom::Start(target))?;
        self.pos = target;
        Ok(())
    }
}

fn padded(size: u64) -> u64 {
    size.div_ceil(BLOCK_LEN as u64) * BLOCK_LEN as u64
}

fn field_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Octal, or base-256 when the high bit of the first byte is set.
fn parse_number(field: &[u8]) -> Option<u64> {
    if field.first().is_some_and(|b| b & 0x80 != 0) {
        let mut value = (field[0] & 0x7F) as u64;
        for &b in &field[1..] {
            value = value.checked_mul(256)?.checked_add(b as u64)?;
        }
        return Some(value);
    }
    let text = field_str(field);
    let text = text.trim_matches(|c: char| c == ' ' || c == '\0');
    if text.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(text, 8).ok()
}

fn checksum_ok(block: &[u8]) -> bool {
    let Some(expected) = parse_number(&block[148..156]) else {
        return false;
    };
    let sum: u64 = block
        .iter()
        .enumerate()
        .map(|(i, &b)| if (148..156).contains(&i) { b' ' as u64 } else { b as u64 })
        .sum();
    sum == expected
}

fn parse_pax(records: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut rest = records;
    while let Some((len, tail)) = rest.split_once(' ') {
        let Ok(len) = len.parse::<usize>() else {
            break;
        };
        let record_len = len.saturating_sub(len.to_string().len() + 1);
        let Some(record) = tail.get(..record_len) else {
            break;
        };
        if let Some((key, value)) = record.trim_end_matches('\n').split_once('=') {
            out.push((key.to_string(), value.to_string()));
        }
        rest = &tail[record_len..];
    }
    out
}
