//! In-memory triple sink and the [`LinkedNode`] handle analyzers write through.
//!
//! The graph is a set: inserting a triple twice is a no-op, so re-visiting a
//! node never duplicates statements. Serialization is N-Triples; in stable
//! mode lines are sorted so identical inputs give byte-identical documents.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::vocab::{Class, Datatype, Individual, Property};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subject {
    Iri(Arc<str>),
    Blank(Arc<str>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Literal {
    pub value: String,
    pub datatype: Option<Arc<str>>,
    pub language: Option<String>,
}

impl Literal {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            datatype: None,
            language: None,
        }
    }

    pub fn typed(value: impl Into<String>, datatype: Datatype) -> Self {
        Self {
            value: value.into(),
            datatype: Some(datatype.iri()),
            language: None,
        }
    }

    pub fn lang(value: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            datatype: None,
            language: Some(language.into()),
        }
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::plain(value)
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Literal::plain(value)
    }
}

impl From<u64> for Literal {
    fn from(value: u64) -> Self {
        Literal::typed(value.to_string(), Datatype::NonNegativeInteger)
    }
}

impl From<u32> for Literal {
    fn from(value: u32) -> Self {
        Literal::typed(value.to_string(), Datatype::NonNegativeInteger)
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::typed(value.to_string(), Datatype::Integer)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::typed(value.to_string(), Datatype::Boolean)
    }
}

impl From<DateTime<Utc>> for Literal {
    fn from(value: DateTime<Utc>) -> Self {
        Literal::typed(
            value.to_rfc3339_opts(SecondsFormat::Secs, true),
            Datatype::DateTime,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    Iri(Arc<str>),
    Blank(Arc<str>),
    Literal(Literal),
}

impl From<&Subject> for Term {
    fn from(subject: &Subject) -> Self {
        match subject {
            Subject::Iri(iri) => Term::Iri(iri.clone()),
            Subject::Blank(id) => Term::Blank(id.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Triple {
    pub subject: Subject,
    pub predicate: Arc<str>,
    pub object: Term,
}

impl Triple {
    pub fn to_ntriples(&self) -> String {
        let mut line = String::new();
        match &self.subject {
            Subject::Iri(iri) => write_iri(&mut line, iri),
            Subject::Blank(id) => {
                let _ = write!(line, "_:{}", id);
            }
        }
        line.push(' ');
        write_iri(&mut line, &self.predicate);
        line.push(' ');
        match &self.object {
            Term::Iri(iri) => write_iri(&mut line, iri),
            Term::Blank(id) => {
                let _ = write!(line, "_:{}", id);
            }
            Term::Literal(lit) => {
                line.push('"');
                escape_literal(&mut line, &lit.value);
                line.push('"');
                if let Some(lang) = &lit.language {
                    let _ = write!(line, "@{}", lang);
                } else if let Some(dt) = &lit.datatype {
                    line.push_str("^^");
                    write_iri(&mut line, dt);
                }
            }
        }
        line.push_str(" .");
        line
    }
}

fn write_iri(out: &mut String, iri: &str) {
    out.push('<');
    for c in iri.chars() {
        match c {
            '<' | '>' | '"' | '{' | '}' | '|' | '^' | '`' | '\\' => {
                let _ = write!(out, "\\u{:04X}", c as u32);
            }
            c if c <= ' ' => {
                let _ = write!(out, "\\u{:04X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('>');
}

fn escape_literal(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04X}", c as u32);
            }
            c => out.push(c),
        }
    }
}

#[derive(Default)]
struct GraphInner {
    order: Vec<Triple>,
    seen: HashSet<Triple>,
}

/// Deduplicating triple store shared by every node of one run.
#[derive(Default)]
pub struct Graph {
    inner: Mutex<GraphInner>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a triple. Returns `false` if it was already present.
    pub fn insert(&self, triple: Triple) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.seen.contains(&triple) {
            return false;
        }
        inner.seen.insert(triple.clone());
        inner.order.push(triple);
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Triples in insertion order.
    pub fn triples(&self) -> Vec<Triple> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .order
            .clone()
    }

    pub fn objects(&self, subject: &Subject, property: Property) -> Vec<Term> {
        let predicate = property.iri();
        self.triples()
            .into_iter()
            .filter(|t| &t.subject == subject && t.predicate == predicate)
            .map(|t| t.object)
            .collect()
    }

    pub fn subjects_of_class(&self, class: Class) -> Vec<Subject> {
        let predicate = Property::Type.iri();
        let object = Term::Iri(class.iri());
        self.triples()
            .into_iter()
            .filter(|t| t.predicate == predicate && t.object == object)
            .map(|t| t.subject)
            .collect()
    }

    pub fn has_class(&self, subject: &Subject, class: Class) -> bool {
        self.objects(subject, Property::Type)
            .contains(&Term::Iri(class.iri()))
    }

    /// Writes the graph as N-Triples.
    pub fn write_ntriples<W: Write>(&self, mut out: W, stable: bool) -> io::Result<()> {
        let mut lines: Vec<String> = self.triples().iter().map(Triple::to_ntriples).collect();
        if stable {
            lines.sort();
        }
        for line in lines {
            writeln!(out, "{}", line)?;
        }
        out.flush()
    }

    /// Writes the document to `path`, gzip-compressed if requested.
    pub fn write_to_path(&self, path: &Path, stable: bool, compress: bool) -> io::Result<()> {
        let file = BufWriter::new(File::create(path)?);
        if compress {
            let mut encoder = GzEncoder::new(file, Compression::default());
            self.write_ntriples(&mut encoder, stable)?;
            encoder.finish()?.flush()
        } else {
            self.write_ntriples(file, stable)
        }
    }
}

/// One subject in the output graph.
#[derive(Clone)]
pub struct LinkedNode {
    subject: Subject,
    graph: Arc<Graph>,
}

impl std::fmt::Debug for LinkedNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LinkedNode").field(&self.subject).finish()
    }
}

impl PartialEq for LinkedNode {
    fn eq(&self, other: &Self) -> bool {
        self.subject == other.subject && Arc::ptr_eq(&self.graph, &other.graph)
    }
}

impl Eq for LinkedNode {}

impl LinkedNode {
    pub fn new(graph: Arc<Graph>, subject: Subject) -> Self {
        Self { subject, graph }
    }

    pub fn iri(graph: Arc<Graph>, iri: &str) -> Self {
        Self::new(graph, Subject::Iri(Arc::from(iri)))
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    fn emit(&self, property: Property, object: Term) {
        self.graph.insert(Triple {
            subject: self.subject.clone(),
            predicate: property.iri(),
            object,
        });
    }

    pub fn set_class(&self, class: Class) {
        self.emit(Property::Type, Term::Iri(class.iri()));
    }

    pub fn set(&self, property: Property, value: impl Into<Literal>) {
        self.emit(property, Term::Literal(value.into()));
    }

    pub fn set_typed(&self, property: Property, value: impl Into<String>, datatype: Datatype) {
        self.emit(property, Term::Literal(Literal::typed(value, datatype)));
    }

    pub fn set_lang(&self, property: Property, value: impl Into<String>, language: &str) {
        self.emit(property, Term::Literal(Literal::lang(value, language)));
    }

    pub fn set_node(&self, property: Property, node: &LinkedNode) {
        self.emit(property, Term::from(&node.subject));
    }

    pub fn set_iri(&self, property: Property, iri: &str) {
        self.emit(property, Term::Iri(Arc::from(iri)));
    }

    pub fn set_individual(&self, property: Property, individual: Individual) {
        self.emit(property, Term::Iri(individual.iri()));
    }

    /// Node for the relative path segment `segment` under this node.
    pub fn child(&self, segment: &str) -> LinkedNode {
        let subject = match &self.subject {
            Subject::Iri(iri) => {
                let sep = if iri.ends_with('/') { "" } else { "/" };
                Subject::Iri(Arc::from(format!("{}{}{}", iri, sep, encode_segment(segment))))
            }
            Subject::Blank(id) => {
                Subject::Blank(Arc::from(format!("{}-{}", id, blank_label(segment))))
            }
        };
        LinkedNode::new(self.graph.clone(), subject)
    }

    /// Node named by a fragment of this node's IRI.
    pub fn fragment(&self, name: &str) -> LinkedNode {
        match &self.subject {
            Subject::Iri(iri) if !iri.contains('#') => LinkedNode::new(
                self.graph.clone(),
                Subject::Iri(Arc::from(format!("{}#{}", iri, encode_segment(name)))),
            ),
            _ => self.child(name),
        }
    }
}

/// Percent-encodes everything outside RFC 3986 `pchar`.
pub fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        let keep = b.is_ascii_alphanumeric()
            || matches!(
                b,
                b'-' | b'.' | b'_' | b'~' | b'!' | b'$' | b'&' | b'\'' | b'(' | b')' | b'*'
                    | b'+' | b',' | b';' | b'=' | b':' | b'@'
            );
        if keep {
            out.push(b as char);
        } else {
            let _ = write!(out, "%{:02X}", b);
        }
    }
    out
}

fn blank_label(segment: &str) -> String {
    segment
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(graph: &Arc<Graph>, iri: &str) -> LinkedNode {
        LinkedNode::iri(graph.clone(), iri)
    }

    #[test]
    fn test_insert_deduplicates() {
        let graph = Arc::new(Graph::new());
        let n = node(&graph, "urn:x");
        n.set_class(Class::FileDataObject);
        n.set_class(Class::FileDataObject);
        n.set(Property::FileName, "a.txt");
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_child_encodes_segments() {
        let graph = Arc::new(Graph::new());
        let root = node(&graph, "urn:root");
        let child = root.child("my file#1.txt");
        assert_eq!(
            child.subject(),
            &Subject::Iri(Arc::from("urn:root/my%20file%231.txt"))
        );

        let slash_root = node(&graph, "http://example.org/");
        assert_eq!(
            slash_root.child("a").subject(),
            &Subject::Iri(Arc::from("http://example.org/a"))
        );
    }

    #[test]
    fn test_fragment() {
        let graph = Arc::new(Graph::new());
        let content = node(&graph, "ni:///sha-256;abc");
        assert_eq!(
            content.fragment("md5").subject(),
            &Subject::Iri(Arc::from("ni:///sha-256;abc#md5"))
        );
        assert_eq!(
            content.fragment("zip").fragment("x").subject(),
            &Subject::Iri(Arc::from("ni:///sha-256;abc#zip/x"))
        );
    }

    #[test]
    fn test_blank_child() {
        let graph = Arc::new(Graph::new());
        let root = LinkedNode::new(graph, Subject::Blank(Arc::from("b0")));
        assert_eq!(
            root.child("a.txt").subject(),
            &Subject::Blank(Arc::from("b0-a_txt"))
        );
    }

    #[test]
    fn test_ntriples_literals() {
        let graph = Arc::new(Graph::new());
        let n = node(&graph, "urn:x");
        n.set(Property::FileName, "say \"hi\"\n");
        n.set(Property::FileSize, 6u64);
        n.set_lang(Property::FileName, "hallo", "de");

        let mut out = Vec::new();
        graph.write_ntriples(&mut out, false).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "<urn:x> <http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#fileName> \"say \\\"hi\\\"\\n\" ."
        );
        assert_eq!(
            lines[1],
            "<urn:x> <http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#fileSize> \"6\"^^<http://www.w3.org/2001/XMLSchema#nonNegativeInteger> ."
        );
        assert!(lines[2].ends_with("\"hallo\"@de ."));
    }

    #[test]
    fn test_stable_output_is_sorted() {
        let graph = Arc::new(Graph::new());
        node(&graph, "urn:b").set(Property::FileName, "b");
        node(&graph, "urn:a").set(Property::FileName, "a");

        let mut out = Vec::new();
        graph.write_ntriples(&mut out, true).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("<urn:a>"));
    }

    #[test]
    fn test_queries() {
        let graph = Arc::new(Graph::new());
        let a = node(&graph, "urn:a");
        let b = node(&graph, "urn:b");
        a.set_class(Class::Folder);
        b.set_node(Property::BelongsToContainer, &a);

        assert!(graph.has_class(a.subject(), Class::Folder));
        assert_eq!(graph.subjects_of_class(Class::Folder), vec![a.subject().clone()]);
        assert_eq!(
            graph.objects(b.subject(), Property::BelongsToContainer),
            vec![Term::from(a.subject())]
        );
    }

    #[test]
    fn test_write_compressed() {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.nt.gz");
        let graph = Arc::new(Graph::new());
        node(&graph, "urn:a").set(Property::FileName, "a");
        graph.write_to_path(&path, true, true).unwrap();

        let mut text = String::new();
        GzDecoder::new(File::open(&path).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert!(text.contains("<urn:a>"));
    }
}
