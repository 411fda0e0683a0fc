//! Format plugins and their registry.
//!
//! A [`Format`] declares how many leading bytes it needs, a cheap signature
//! check over them, and a parser producing a [`FormatValue`]. Values that
//! hold other objects (archives, compressed payloads) expose a [`Container`].

pub mod dos;
pub mod gzip;
pub mod pe;
pub mod png;
pub mod tar;
pub mod xml;
pub mod zip;

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glob::Pattern;

use crate::error::{ArchiverError, Result};
use crate::graph::LinkedNode;
use crate::hashing::{classify, classify_prefix};
use crate::stream::{ByteStream, StreamFactory};

/// Which content a format can match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Binary,
    Text,
    Any,
}

/// What is known about the header before any matcher runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeaderHint {
    pub is_binary: bool,
    pub charset: Option<&'static str>,
    /// The header holds the entire stream.
    pub complete: bool,
}

impl HeaderHint {
    pub fn from_header(header: &[u8], length: Option<u64>, text_confidence: f32) -> Self {
        let complete = length.is_some_and(|len| len <= header.len() as u64);
        let verdict = if complete {
            classify(header, text_confidence)
        } else {
            classify_prefix(header, text_confidence)
        };
        Self {
            is_binary: verdict.is_binary,
            charset: verdict.charset,
            complete,
        }
    }

    pub fn admits(&self, kind: ContentKind) -> bool {
        match kind {
            ContentKind::Any => true,
            ContentKind::Binary => self.is_binary,
            ContentKind::Text => !self.is_binary,
        }
    }
}

/// A pluggable format recognizer.
///
/// `parse` runs on the blocking pool. It must not keep `stream` alive in the
/// returned value: sources opened one at a time stay locked while a stream
/// exists. Keep `source` instead and reopen it when needed.
pub trait Format: Send + Sync {
    /// Short unique name, also used as the format node's fragment.
    fn name(&self) -> &'static str;

    /// Leading bytes the signature check needs. Zero means the format is
    /// always a candidate and rejects inside its matcher or parser.
    fn header_length(&self) -> usize;

    fn content_kind(&self) -> ContentKind {
        ContentKind::Binary
    }

    /// Cheap signature check. Receives exactly `header_length` bytes on the
    /// first pass and the whole available header when re-validated.
    fn could_match(&self, header: &[u8], hint: &HeaderHint) -> bool;

    fn parse(
        &self,
        stream: Box<dyn ByteStream>,
        source: Arc<dyn StreamFactory>,
    ) -> Result<Arc<dyn FormatValue>>;
}

/// A parsed object.
pub trait FormatValue: Send + Sync + 'static {
    fn media_type(&self) -> Cow<'static, str>;

    fn extension(&self) -> Option<Cow<'static, str>> {
        None
    }

    /// Writes classes and properties onto the format node.
    fn describe(&self, node: &LinkedNode);

    fn container(&self) -> Option<&dyn Container> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// Enumerates nested objects.
#[async_trait]
pub trait Container: Send + Sync {
    /// Lists entries. A failure part way through keeps the entries read so
    /// far and reports the error alongside them.
    async fn entries(&self) -> EntryListing;
}

#[derive(Default)]
pub struct EntryListing {
    pub entries: Vec<ContainerEntry>,
    pub error: Option<ArchiverError>,
}

impl EntryListing {
    pub fn failed(error: ArchiverError) -> Self {
        Self {
            entries: Vec::new(),
            error: Some(error),
        }
    }
}

#[derive(Clone, Default)]
pub struct ContainerEntry {
    /// `/`-separated path inside the container.
    pub path: String,
    pub is_directory: bool,
    pub length: Option<u64>,
    pub compressed_length: Option<u64>,
    /// Content, when it can be read.
    pub source: Option<Arc<dyn StreamFactory>>,
    pub encrypted: bool,
    pub corrupted: bool,
    pub modified: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub revision: Option<u32>,
    pub compression: Option<&'static str>,
}

impl std::fmt::Debug for ContainerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerEntry")
            .field("path", &self.path)
            .field("is_directory", &self.is_directory)
            .field("length", &self.length)
            .field("readable", &self.source.is_some())
            .field("encrypted", &self.encrypted)
            .field("corrupted", &self.corrupted)
            .finish()
    }
}

/// Formats in registration order. Registration order breaks precedence ties.
pub struct FormatRegistry {
    formats: Vec<Arc<dyn Format>>,
    by_name: HashMap<&'static str, usize>,
}

impl FormatRegistry {
    /// Registry with every built-in format.
    pub fn new() -> Self {
        let mut registry = Self::empty();

        registry.register(Arc::new(zip::ZipFormat));
        registry.register(Arc::new(tar::TarFormat));
        registry.register(Arc::new(gzip::GzipFormat));
        registry.register(Arc::new(pe::PeFormat));
        registry.register(Arc::new(dos::DosFormat));
        registry.register(Arc::new(png::PngFormat));
        registry.register(Arc::new(xml::XmlFormat));

        registry
    }

    pub fn empty() -> Self {
        Self {
            formats: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Adds a format. A format with the same name is replaced in place.
    pub fn register(&mut self, format: Arc<dyn Format>) {
        let name = format.name();
        match self.by_name.get(name) {
            Some(&index) => self.formats[index] = format,
            None => {
                self.by_name.insert(name, self.formats.len());
                self.formats.push(format);
            }
        }
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn Format>> {
        self.by_name.get(name).map(|&i| self.formats[i].clone())
    }

    pub fn formats(&self) -> &[Arc<dyn Format>] {
        &self.formats
    }

    pub fn supported_formats(&self) -> Vec<&'static str> {
        self.formats.iter().map(|f| f.name()).collect()
    }

    /// Longest header any format needs.
    pub fn max_header_length(&self) -> usize {
        self.formats
            .iter()
            .map(|f| f.header_length())
            .max()
            .unwrap_or(0)
    }

    /// Keeps only formats whose name matches one of `patterns`.
    pub fn retain_matching(&mut self, patterns: &[String]) -> Result<()> {
        let compiled = patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| ArchiverError::Config(format!("format pattern {}: {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        let kept: Vec<_> = self
            .formats
            .drain(..)
            .filter(|f| compiled.iter().any(|p| p.matches(f.name())))
            .collect();
        self.by_name.clear();
        for format in kept {
            self.register(format);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn le_u16(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

pub(crate) fn le_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

pub(crate) fn be_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_new() {
        let registry = FormatRegistry::new();
        for name in ["zip", "tar", "gzip", "pe", "dos", "png", "xml"] {
            assert!(registry.get_by_name(name).is_some(), "{} missing", name);
        }
        assert_eq!(registry.max_header_length(), 512);
    }

    #[test]
    fn test_registry_keeps_order() {
        let registry = FormatRegistry::new();
        let names = registry.supported_formats();
        assert_eq!(names.first(), Some(&"zip"));
        assert_eq!(names.last(), Some(&"xml"));
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = FormatRegistry::new();
        let before = registry.len();
        registry.register(Arc::new(dos::DosFormat));
        assert_eq!(registry.len(), before);
        assert_eq!(registry.supported_formats()[4], "dos");
    }

    #[test]
    fn test_retain_matching() {
        let mut registry = FormatRegistry::new();
        registry
            .retain_matching(&["z*".to_string(), "png".to_string()])
            .unwrap();
        assert_eq!(registry.supported_formats(), vec!["zip", "png"]);
        assert!(registry.get_by_name("tar").is_none());
        assert_eq!(registry.max_header_length(), 8);
    }

    #[test]
    fn test_retain_invalid_pattern() {
        let mut registry = FormatRegistry::new();
        assert!(registry.retain_matching(&["[".to_string()]).is_err());
    }

    #[test]
    fn test_empty_registry() {
        let registry = FormatRegistry::empty();
        assert!(registry.is_empty());
        assert_eq!(registry.max_header_length(), 0);
    }

    #[test]
    fn test_header_hint() {
        let hint = HeaderHint::from_header(b"hello", Some(5), 0.5);
        assert!(!hint.is_binary);
        assert!(hint.complete);
        assert!(hint.admits(ContentKind::Text));
        assert!(!hint.admits(ContentKind::Binary));

        let hint = HeaderHint::from_header(b"PK\x03\x04\x14\x00", None, 0.5);
        assert!(hint.is_binary);
        assert!(!hint.complete);
        assert!(hint.admits(ContentKind::Any));
    }

    #[test]
    fn test_header_hint_tolerates_cut_character() {
        // "<a>é" cut after the first byte of 'é'
        let header = b"<a>\xC3";
        let hint = HeaderHint::from_header(header, Some(64), 0.5);
        assert!(!hint.is_binary);
        assert_eq!(hint.charset, Some("utf-8"));

        // the same bytes as a whole stream are not UTF-8
        let hint = HeaderHint::from_header(header, Some(4), 0.5);
        assert!(hint.complete);
        assert_ne!(hint.charset, Some("utf-8"));
    }
}
