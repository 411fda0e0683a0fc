pub mod analysis;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod formats;
pub mod graph;
pub mod hashing;
pub mod progress;
pub mod stream;
pub mod vocab;

pub use analysis::{AnalysisContext, AnalysisResult, Archiver, Entity, NodeCache, NodeKey};
pub use cache::PromiseMap;
pub use config::{ArchiverOptions, CliOverrides, MatchOptions};
pub use engine::{Candidate, CandidateState, FormatEngine, FormatObject, MAX_HEADER_LENGTH};
pub use error::{ArchiverError, Result};
pub use formats::{
    Container, ContainerEntry, ContentKind, EntryListing, Format, FormatRegistry, FormatValue, HeaderHint,
};
pub use graph::{Graph, LinkedNode, Literal, Subject, Term, Triple};
pub use hashing::{
    algorithm_by_name, hash_and_detect, BlockHashCache, BlockInfo, BuiltinHash, HashAlgorithm, HashOutcome,
    HashValue, IncrementalHash, PipelineSettings,
};
pub use progress::{AnalysisProgress, ProgressSnapshot};
pub use stream::{
    AccessMode, ByteStream, DedupKey, FileStreamFactory, MemoryStreamFactory, ReferenceKey, StreamFactory,
};
pub use vocab::{Class, Property, VOCABULARY};
