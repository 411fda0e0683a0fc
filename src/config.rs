//! Run options.
//!
//! [`ArchiverOptions`] is the serializable form, read from a TOML file and
//! overridden by command-line flags. [`ArchiverOptions::resolve`] validates it
//! into [`MatchOptions`], the immutable settings shared by a whole run.
//!
//! ```toml
//! stable = true
//! hash_algorithms = ["sha-256", "blake3"]
//! formats = ["zip", "t*"]
//! max_depth = 8
//! torrent = true
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::MAX_HEADER_LENGTH;
use crate::error::{ArchiverError, Result};
use crate::formats::FormatRegistry;
use crate::hashing::{algorithm_by_name, HashAlgorithm, PipelineSettings};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiverOptions {
    /// IRI of the root node; a fresh `urn:uuid` when unset.
    pub root: Option<String>,
    /// Deterministic identifiers and sorted output.
    pub stable: bool,
    /// Gzip the output document.
    pub compress: bool,
    pub quiet: bool,
    /// Hash algorithms in preference order; the first names content nodes.
    pub hash_algorithms: Vec<String>,
    /// Glob patterns selecting enabled formats; all formats when unset.
    pub formats: Option<Vec<String>>,
    /// Container nesting limit.
    pub max_depth: usize,
    pub header_limit: usize,
    pub chunk_size: usize,
    /// Minimum confidence for content to count as text.
    pub text_confidence: f32,
    /// Emit BitTorrent info hashes for files and directories.
    pub torrent: bool,
    pub piece_length: u64,
    /// Children analyzed concurrently per container.
    pub parallel_children: usize,
}

impl Default for ArchiverOptions {
    fn default() -> Self {
        Self {
            root: None,
            stable: false,
            compress: false,
            quiet: false,
            hash_algorithms: vec!["sha-256".into(), "md5".into(), "sha-1".into()],
            formats: None,
            max_depth: 16,
            header_limit: MAX_HEADER_LENGTH,
            chunk_size: 16 * 1024,
            text_confidence: 0.5,
            torrent: false,
            piece_length: 256 * 1024,
            parallel_children: 4,
        }
    }
}

impl ArchiverOptions {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validates against the built-in formats.
    pub fn resolve(&self) -> Result<MatchOptions> {
        self.resolve_with(FormatRegistry::new())
    }

    /// Validates against `registry`, narrowing it to the configured formats.
    pub fn resolve_with(&self, mut registry: FormatRegistry) -> Result<MatchOptions> {
        if self.chunk_size == 0 {
            return Err(ArchiverError::Config("chunk_size must be positive".into()));
        }
        if self.header_limit == 0 || self.header_limit > MAX_HEADER_LENGTH {
            return Err(ArchiverError::Config(format!(
                "header_limit must be between 1 and {}",
                MAX_HEADER_LENGTH
            )));
        }
        if self.piece_length == 0 {
            return Err(ArchiverError::Config("piece_length must be positive".into()));
        }
        if self.parallel_children == 0 {
            return Err(ArchiverError::Config("parallel_children must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.text_confidence) {
            return Err(ArchiverError::Config("text_confidence must be within [0, 1]".into()));
        }
        if self.hash_algorithms.is_empty() {
            return Err(ArchiverError::Config("at least one hash algorithm is required".into()));
        }

        let hash_algorithms = self
            .hash_algorithms
            .iter()
            .map(|name| {
                algorithm_by_name(name)
                    .ok_or_else(|| ArchiverError::Config(format!("unknown hash algorithm: {}", name)))
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(patterns) = &self.formats {
            registry.retain_matching(patterns)?;
        }

        Ok(MatchOptions {
            root: self.root.clone(),
            stable: self.stable,
            hash_algorithms,
            registry: Arc::new(registry),
            max_depth: self.max_depth,
            header_limit: self.header_limit,
            chunk_size: self.chunk_size,
            text_confidence: self.text_confidence,
            torrent: self.torrent,
            piece_length: self.piece_length,
            parallel_children: self.parallel_children,
        })
    }
}

/// Command-line values layered over an option file. Flags only ever switch
/// settings on; empty lists and `None` keep the file's value.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub root: Option<String>,
    pub stable: bool,
    pub compress: bool,
    pub quiet: bool,
    pub hash_algorithms: Vec<String>,
    pub formats: Vec<String>,
    pub max_depth: Option<usize>,
    pub torrent: bool,
    pub piece_length: Option<u64>,
}

impl ArchiverOptions {
    pub fn merge_cli(&mut self, cli: CliOverrides) {
        if cli.root.is_some() {
            self.root = cli.root;
        }
        self.stable |= cli.stable;
        self.compress |= cli.compress;
        self.quiet |= cli.quiet;
        self.torrent |= cli.torrent;
        if !cli.hash_algorithms.is_empty() {
            self.hash_algorithms = cli.hash_algorithms;
        }
        if !cli.formats.is_empty() {
            self.formats = Some(cli.formats);
        }
        if let Some(depth) = cli.max_depth {
            self.max_depth = depth;
        }
        if let Some(length) = cli.piece_length {
            self.piece_length = length;
        }
    }
}

/// Validated, shared run settings.
#[derive(Clone)]
pub struct MatchOptions {
    pub root: Option<String>,
    pub stable: bool,
    pub hash_algorithms: Vec<Arc<dyn HashAlgorithm>>,
    pub registry: Arc<FormatRegistry>,
    pub max_depth: usize,
    pub header_limit: usize,
    pub chunk_size: usize,
    pub text_confidence: f32,
    pub torrent: bool,
    pub piece_length: u64,
    pub parallel_children: usize,
}

impl MatchOptions {
    pub fn pipeline(&self) -> PipelineSettings {
        PipelineSettings {
            chunk_size: self.chunk_size,
            header_length: self.registry.max_header_length().min(self.header_limit),
            text_confidence: self.text_confidence,
        }
    }
}
