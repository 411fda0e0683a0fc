//! XML documents, recognized by their declaration.
//!
//! Only the prolog and the root start tag are read; the document body is
//! never parsed.

use std::any::Any;
use std::borrow::Cow;
use std::io::Read;
use std::sync::Arc;

use quick_xml::events::Event;
use quick_xml::Reader;

use super::{ContentKind, Format, FormatValue, HeaderHint};
use crate::error::{ArchiverError, Result};
use crate::graph::LinkedNode;
use crate::stream::{ByteStream, StreamFactory};
use crate::vocab::{Class, Property};

const MAX_PROLOG: u64 = 64 * 1024;

pub struct XmlFormat;

fn strip_preamble(text: &[u8]) -> &[u8] {
    let text = text.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(text);
    let start = text
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(text.len());
    &text[start..]
}

impl Format for XmlFormat {
    fn name(&self) -> &'static str {
        "xml"
    }

    fn header_length(&self) -> usize {
        0
    }

    fn content_kind(&self) -> ContentKind {
        ContentKind::Text
    }

    fn could_match(&self, header: &[u8], _hint: &HeaderHint) -> bool {
        let body = strip_preamble(header);
        body.starts_with(b"<?xml") && body.get(5).is_some_and(|b| b.is_ascii_whitespace())
    }

    fn parse(
        &self,
        stream: Box<dyn ByteStream>,
        _source: Arc<dyn StreamFactory>,
    ) -> Result<Arc<dyn FormatValue>> {
        let mut prolog = Vec::new();
        stream.take(MAX_PROLOG).read_to_end(&mut prolog)?;
        read_prolog(strip_preamble(&prolog)).map(|doc| Arc::new(doc) as Arc<dyn FormatValue>)
    }
}

fn xml_error(e: impl std::fmt::Display) -> ArchiverError {
    ArchiverError::format("xml", e.to_string())
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Reads events up to the root start tag.
fn read_prolog(text: &[u8]) -> Result<XmlDocument> {
    let mut reader = Reader::from_reader(text);
    let mut buf = Vec::new();
    let mut doc = XmlDocument::default();

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Decl(decl) => {
                doc.version = Some(lossy(&decl.version().map_err(xml_error)?));
                if let Some(encoding) = decl.encoding() {
                    doc.encoding = Some(lossy(&encoding.map_err(xml_error)?));
                }
            }
            Event::Start(tag) | Event::Empty(tag) => {
                doc.root = lossy(tag.name().as_ref());
                for attr in tag.attributes() {
                    let attr = attr.map_err(xml_error)?;
                    if attr.key.as_ref() == b"xmlns" {
                        doc.namespace = Some(lossy(&attr.value));
                    }
                }
                return Ok(doc);
            }
            Event::Eof => return Err(ArchiverError::format("xml", "no root element")),
            _ => {}
        }
        buf.clear();
    }
}

#[derive(Debug, Default)]
pub struct XmlDocument {
    pub root: String,
    pub namespace: Option<String>,
    pub version: Option<String>,
    pub encoding: Option<String>,
}

impl FormatValue for XmlDocument {
    fn media_type(&self) -> Cow<'static, str> {
        match (self.namespace.as_deref(), self.root.as_str()) {
            (Some("http://www.w3.org/2000/svg"), _) => Cow::Borrowed("image/svg+xml"),
            (Some("http://www.w3.org/1999/xhtml"), _) => Cow::Borrowed("application/xhtml+xml"),
            _ => Cow::Borrowed("application/xml"),
        }
    }

    fn extension(&self) -> Option<Cow<'static, str>> {
        let ext = match self.media_type().as_ref() {
            "image/svg+xml" => "svg",
            "application/xhtml+xml" => "xhtml",
            _ => "xml",
        };
        Some(Cow::Borrowed(ext))
    }

    fn describe(&self, node: &LinkedNode) {
        node.set_class(Class::Document);
        node.set(Property::RootElement, self.root.as_str());
        if let Some(ns) = &self.namespace {
            node.set_iri(Property::Namespace, ns);
        }
        if let Some(version) = &self.version {
            node.set(Property::Version, version.as_str());
        }
        if let Some(encoding) = &self.encoding {
            node.set(Property::CharacterEncoding, encoding.to_ascii_lowercase());
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
