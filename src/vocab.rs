//! Vocabulary terms used in emitted graphs.
//!
//! Terms are declared as prefixed names in the tables below and expanded once
//! into [`VOCABULARY`].

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;

pub const PREFIXES: &[(&str, &str)] = &[
    ("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
    ("xsd", "http://www.w3.org/2001/XMLSchema#"),
    ("owl", "http://www.w3.org/2002/07/owl#"),
    ("dcterms", "http://purl.org/dc/terms/"),
    ("cnt", "http://www.w3.org/2011/content#"),
    ("nie", "http://www.semanticdesktop.org/ontologies/2007/01/19/nie#"),
    ("nfo", "http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#"),
    ("schema", "http://schema.org/"),
    ("at", "https://w3id.org/linked-archiver#"),
];

macro_rules! terms {
    ($kind:ident { $($variant:ident => $name:literal,)* }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $kind {
            $($variant,)*
        }

        impl $kind {
            pub const ALL: &'static [$kind] = &[$($kind::$variant,)*];

            /// Prefixed name, e.g. `nfo:FileDataObject`.
            pub fn name(self) -> &'static str {
                match self {
                    $($kind::$variant => $name,)*
                }
            }

            pub fn iri(self) -> Arc<str> {
                VOCABULARY.resolve(self.name())
            }
        }
    };
}

terms!(Class {
    FileDataObject => "nfo:FileDataObject",
    Folder => "nfo:Folder",
    Archive => "nfo:Archive",
    ArchiveItem => "nfo:ArchiveItem",
    Executable => "nfo:Executable",
    Image => "nfo:Image",
    RasterImage => "nfo:RasterImage",
    Document => "nfo:Document",
    FileHash => "nfo:FileHash",
    ContentAsText => "cnt:ContentAsText",
    ContentAsBase64 => "cnt:ContentAsBase64",
    DynamicLibrary => "at:DynamicLibrary",
    CompressedFile => "at:CompressedFile",
});

terms!(Property {
    Type => "rdf:type",
    SameAs => "owl:sameAs",
    FileName => "nfo:fileName",
    FileSize => "nfo:fileSize",
    FileLastModified => "nfo:fileLastModified",
    FileCreated => "nfo:fileCreated",
    BelongsToContainer => "nfo:belongsToContainer",
    InterpretedAs => "nie:interpretedAs",
    Comment => "nie:comment",
    MimeType => "nie:mimeType",
    HasFormat => "dcterms:hasFormat",
    Extent => "dcterms:extent",
    Created => "dcterms:created",
    CharacterEncoding => "cnt:characterEncoding",
    HasHash => "nfo:hasHash",
    HashAlgorithm => "nfo:hashAlgorithm",
    HashValue => "nfo:hashValue",
    EncryptionStatus => "nfo:encryptionStatus",
    UncompressedSize => "nfo:uncompressedSize",
    Width => "nfo:width",
    Height => "nfo:height",
    ColorDepth => "nfo:colorDepth",
    Version => "schema:version",
    Corrupted => "at:corrupted",
    Extension => "at:extension",
    CompressionMethod => "at:compressionMethod",
    Machine => "at:machine",
    Subsystem => "at:subsystem",
    RootElement => "at:rootElement",
    Namespace => "at:namespace",
    ColorType => "at:colorType",
    Interlaced => "at:interlaced",
    EntryCount => "at:entryCount",
});

terms!(Datatype {
    String => "xsd:string",
    Integer => "xsd:integer",
    NonNegativeInteger => "xsd:nonNegativeInteger",
    Boolean => "xsd:boolean",
    DateTime => "xsd:dateTime",
    HexBinary => "xsd:hexBinary",
});

terms!(Individual {
    EncryptedStatus => "nfo:encryptedStatus",
    DecryptedStatus => "nfo:decryptedStatus",
});

/// Immutable prefixed-name to IRI map.
pub struct Vocabulary {
    terms: HashMap<&'static str, Arc<str>>,
}

impl Vocabulary {
    fn new() -> Self {
        let names = Class::ALL
            .iter()
            .map(|t| t.name())
            .chain(Property::ALL.iter().map(|t| t.name()))
            .chain(Datatype::ALL.iter().map(|t| t.name()))
            .chain(Individual::ALL.iter().map(|t| t.name()));

        let terms = names
            .map(|name| (name, Arc::from(expand(name).as_str())))
            .collect();
        Self { terms }
    }

    pub fn get(&self, name: &str) -> Option<Arc<str>> {
        self.terms.get(name).cloned()
    }

    fn resolve(&self, name: &'static str) -> Arc<str> {
        self.get(name)
            .unwrap_or_else(|| Arc::from(expand(name).as_str()))
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Expands `prefix:local` using [`PREFIXES`]; unknown prefixes are returned as is.
pub fn expand(name: &str) -> String {
    if let Some((prefix, local)) = name.split_once(':') {
        if let Some((_, ns)) = PREFIXES.iter().find(|(p, _)| *p == prefix) {
            return format!("{}{}", ns, local);
        }
    }
    name.to_string()
}

pub static VOCABULARY: Lazy<Vocabulary> = Lazy::new(Vocabulary::new);
