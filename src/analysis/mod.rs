//! Recursive analysis driver.
//!
//! [`Archiver::analyze`] resolves an [`Entity`] to a graph node. Every node
//! is registered in the [`NodeCache`] before its children are visited, so a
//! repeated reference resolves to the existing node and only gains an edge.
//! Filesystem paths become file or folder nodes; byte sources become content
//! nodes named by their primary hash, with the detected format hanging off
//! them and container entries analyzed recursively.

pub mod hierarchy;
pub mod node_cache;
pub mod walker;

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::MatchOptions;
use crate::engine::{FormatEngine, FormatObject};
use crate::error::{ArchiverError, Result};
use crate::formats::{Container, ContainerEntry};
use crate::graph::{Graph, LinkedNode};
use crate::hashing::torrent::{multi_file_info_hash, single_file_info_hash, InfoHash, TorrentFile};
use crate::hashing::{hash_and_detect, BlockHashCache};
use crate::progress::AnalysisProgress;
use crate::stream::{file_reference, DedupKey, FileStreamFactory, StreamFactory};
use crate::vocab::{Class, Individual, Property};

pub use hierarchy::PathHierarchy;
pub use node_cache::{CachedNode, NodeCache, NodeKey};
pub use walker::DirectoryLister;

/// Something to analyze.
#[derive(Clone)]
pub enum Entity {
    /// A file or directory on disk.
    Path(PathBuf),
    /// Raw bytes, e.g. an archive entry.
    Data(Arc<dyn StreamFactory>),
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Entity::Data(source) => f.debug_tuple("Data").field(&source.dedup_key()).finish(),
        }
    }
}

/// State threaded through one recursive call.
#[derive(Clone)]
pub struct AnalysisContext {
    /// Node the entity attaches under.
    pub parent: Option<LinkedNode>,
    /// Node to reuse instead of minting one.
    pub existing: Option<LinkedNode>,
    pub options: Arc<MatchOptions>,
    /// Container nesting level.
    pub depth: usize,
}

impl AnalysisContext {
    pub fn root(options: Arc<MatchOptions>) -> Self {
        Self {
            parent: None,
            existing: None,
            options,
            depth: 0,
        }
    }

    pub fn with_existing(mut self, node: LinkedNode) -> Self {
        self.existing = Some(node);
        self
    }

    /// Same nesting level, new parent.
    fn under(&self, parent: LinkedNode) -> Self {
        Self {
            parent: Some(parent),
            existing: None,
            options: self.options.clone(),
            depth: self.depth,
        }
    }

    /// One container level deeper.
    fn nested(&self, parent: LinkedNode) -> Self {
        Self {
            depth: self.depth + 1,
            ..self.under(parent)
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub node: LinkedNode,
    /// File name or format name, when known.
    pub label: Option<String>,
}

pub struct Archiver {
    options: Arc<MatchOptions>,
    engine: FormatEngine,
    graph: Arc<Graph>,
    nodes: NodeCache,
    blocks: Arc<BlockHashCache>,
    progress: AnalysisProgress,
    root: LinkedNode,
}

impl Archiver {
    pub fn new(options: MatchOptions) -> Self {
        Self::with_block_cache(options, Arc::new(BlockHashCache::new()))
    }

    /// Uses a caller-owned block hash cache, e.g. one shared between runs.
    pub fn with_block_cache(options: MatchOptions, blocks: Arc<BlockHashCache>) -> Self {
        let graph = Arc::new(Graph::new());
        let root_iri = match &options.root {
            Some(iri) => iri.clone(),
            None if options.stable => {
                Uuid::new_v5(&Uuid::NAMESPACE_URL, b"linked-archiver:root").urn().to_string()
            }
            None => Uuid::new_v4().urn().to_string(),
        };
        let root = LinkedNode::iri(graph.clone(), &root_iri);
        let engine = FormatEngine::new(options.registry.clone())
            .with_header_limit(options.header_limit)
            .with_text_confidence(options.text_confidence);

        Self {
            options: Arc::new(options),
            engine,
            graph,
            nodes: NodeCache::new(),
            blocks,
            progress: AnalysisProgress::new(),
            root,
        }
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    pub fn root(&self) -> &LinkedNode {
        &self.root
    }

    pub fn options(&self) -> &Arc<MatchOptions> {
        &self.options
    }

    pub fn progress(&self) -> &AnalysisProgress {
        &self.progress
    }

    pub fn block_cache(&self) -> &Arc<BlockHashCache> {
        &self.blocks
    }

    pub fn node_cache(&self) -> &NodeCache {
        &self.nodes
    }

    pub fn root_context(&self) -> AnalysisContext {
        AnalysisContext::root(self.options.clone())
    }

    /// Analyzes every input in order and reports the run.
    pub async fn describe_paths(&self, paths: &[PathBuf]) -> Result<Vec<AnalysisResult>> {
        self.progress.start();
        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            if !path.exists() {
                self.progress.finish();
                return Err(ArchiverError::Config(format!(
                    "input not found: {}",
                    path.display()
                )));
            }
            let result = self.analyze(Entity::Path(path.clone()), self.root_context()).await;
            match result {
                Ok(result) => results.push(result),
                Err(e) => {
                    self.progress.finish();
                    return Err(e);
                }
            }
        }
        self.progress.finish();

        let snap = self.progress.snapshot();
        info!(
            "Analyzed {} entities ({} bytes, {} containers, {} cache hits, {} errors) in {}ms",
            snap.entities, snap.bytes_hashed, snap.containers, snap.cache_hits, snap.errors, snap.elapsed_ms
        );
        Ok(results)
    }

    pub fn write_output(&self, path: &Path, compress: bool) -> Result<()> {
        self.graph.write_to_path(path, self.options.stable, compress)?;
        info!("Wrote {} triples to {}", self.graph.len(), path.display());
        Ok(())
    }

    /// Resolves `entity` to its node, analyzing it on first sight.
    pub fn analyze(&self, entity: Entity, cx: AnalysisContext) -> BoxFuture<'_, Result<AnalysisResult>> {
        Box::pin(async move {
            match entity {
                Entity::Path(path) => self.analyze_path(&path, cx).await,
                Entity::Data(source) => self.analyze_data(source, cx).await,
            }
        })
    }

    async fn analyze_path(&self, path: &Path, cx: AnalysisContext) -> Result<AnalysisResult> {
        let metadata = tokio::fs::metadata(path).await?;
        if metadata.is_dir() {
            self.analyze_directory(path, &metadata, cx).await
        } else {
            self.analyze_file(path, &metadata, cx).await
        }
    }

    fn named_node(&self, cx: &AnalysisContext, name: &str) -> LinkedNode {
        if let Some(existing) = &cx.existing {
            return existing.clone();
        }
        cx.parent.as_ref().unwrap_or(&self.root).child(name)
    }

    fn attach(&self, node: &LinkedNode, cx: &AnalysisContext, created: bool) {
        if !created {
            trace!("Node cache hit for {:?}", node);
            self.progress.inc_cache_hit();
        }
        if let Some(parent) = &cx.parent {
            node.set_node(Property::BelongsToContainer, parent);
        }
    }

    fn describe_file(&self, cx: &AnalysisContext, name: &str, metadata: &Metadata, class: Class) -> CachedNode {
        let node = self.named_node(cx, name);
        node.set_class(class);
        node.set(Property::FileName, name);
        if class == Class::FileDataObject {
            node.set(Property::FileSize, metadata.len());
        }
        if let Ok(modified) = metadata.modified() {
            node.set(Property::FileLastModified, DateTime::<Utc>::from(modified));
        }
        if let Ok(created) = metadata.created() {
            node.set(Property::FileCreated, DateTime::<Utc>::from(created));
        }
        CachedNode::plain(node)
    }

    async fn analyze_file(&self, path: &Path, metadata: &Metadata, cx: AnalysisContext) -> Result<AnalysisResult> {
        let name = file_name(path);
        let key = DedupKey::new(file_reference(path, metadata)?, None);

        let this = self;
        let (cx_ref, name_ref) = (&cx, name.as_str());
        let (cached, created) = self
            .nodes
            .get_or_create(NodeKey::File(key), move || async move {
                Ok(this.describe_file(cx_ref, name_ref, metadata, Class::FileDataObject))
            })
            .await?;
        let node = cached.node;
        self.attach(&node, &cx, created);

        if created {
            let source: Arc<dyn StreamFactory> = Arc::new(FileStreamFactory::new(path)?);
            if let Err(e) = self.analyze(Entity::Data(source.clone()), cx.under(node.clone())).await {
                warn!("Failed to analyze content of {}: {}", path.display(), e);
                self.progress.inc_error();
            }

            if cx.options.torrent {
                match single_file_info_hash(&self.blocks, &name, &source, cx.options.piece_length).await {
                    Ok(hash) => set_info_hash(&node, &hash),
                    Err(e) => {
                        warn!("Info hash of {} failed: {}", path.display(), e);
                        self.progress.inc_error();
                    }
                }
            }
        }

        Ok(AnalysisResult {
            node,
            label: Some(name),
        })
    }

    async fn analyze_directory(
        &self,
        path: &Path,
        metadata: &Metadata,
        cx: AnalysisContext,
    ) -> Result<AnalysisResult> {
        let name = file_name(path);
        let key = DedupKey::new(file_reference(path, metadata)?, None);

        let this = self;
        let (cx_ref, name_ref) = (&cx, name.as_str());
        let (cached, created) = self
            .nodes
            .get_or_create(NodeKey::Folder(key), move || async move {
                Ok(this.describe_file(cx_ref, name_ref, metadata, Class::Folder))
            })
            .await?;
        let node = cached.node;
        self.attach(&node, &cx, created);

        if created {
            let dir = path.to_path_buf();
            let children =
                tokio::task::spawn_blocking(move || DirectoryLister::new().children(&dir)).await??;
            debug!("{} has {} children", path.display(), children.len());

            let child_cx = cx.under(node.clone());
            let pending: Vec<BoxFuture<'_, (PathBuf, Result<AnalysisResult>)>> = children
                .into_iter()
                .map(|child| {
                    let child_cx = child_cx.clone();
                    Box::pin(async move {
                        let result = self.analyze(Entity::Path(child.clone()), child_cx).await;
                        (child, result)
                    }) as BoxFuture<'_, _>
                })
                .collect();
            let results: Vec<_> = stream::iter(pending)
                .buffered(cx.options.parallel_children)
                .collect()
                .await;
            for (child, result) in results {
                if let Err(e) = result {
                    warn!("Failed to analyze {}: {}", child.display(), e);
                    self.progress.inc_error();
                }
            }

            if cx.options.torrent {
                match self.directory_info_hash(path, &name, cx.options.piece_length).await {
                    Ok(Some(hash)) => set_info_hash(&node, &hash),
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Info hash of {} failed: {}", path.display(), e);
                        self.progress.inc_error();
                    }
                }
            }
        }

        Ok(AnalysisResult {
            node,
            label: Some(name),
        })
    }

    async fn directory_info_hash(&self, path: &Path, name: &str, piece_length: u64) -> Result<Option<InfoHash>> {
        let dir = path.to_path_buf();
        let files =
            tokio::task::spawn_blocking(move || DirectoryLister::new().files_recursive(&dir)).await??;
        if files.is_empty() {
            return Ok(None);
        }
        let files = files
            .into_iter()
            .map(|(components, path)| {
                let source: Arc<dyn StreamFactory> = Arc::new(FileStreamFactory::new(&path)?);
                Ok(TorrentFile {
                    path: components,
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        multi_file_info_hash(&self.blocks, name, &files, piece_length)
            .await
            .map(Some)
    }

    async fn analyze_data(&self, source: Arc<dyn StreamFactory>, cx: AnalysisContext) -> Result<AnalysisResult> {
        let key = source.dedup_key();

        let this = self;
        let (cx_ref, source_ref) = (&cx, &source);
        let (cached, created) = self
            .nodes
            .get_or_create(NodeKey::Content(key), move || async move {
                this.create_content(source_ref, cx_ref).await
            })
            .await?;

        if !created {
            trace!("Node cache hit for {:?}", cached.node);
            self.progress.inc_cache_hit();
        }
        if let Some(parent) = &cx.parent {
            parent.set_node(Property::InterpretedAs, &cached.node);
        }

        if created {
            if let (Some(format), Some(format_node)) = (&cached.format, &cached.format_node) {
                if let Some(container) = format.value().container() {
                    if cx.depth < cx.options.max_depth {
                        self.expand(container, format_node, &cx).await;
                    } else {
                        debug!("Not expanding {} beyond depth {}", format.format_name(), cx.depth);
                    }
                }
            }
        }

        Ok(AnalysisResult {
            node: cached.node,
            label: cached.format.as_ref().map(|f| f.format_name().to_string()),
        })
    }

    /// Hashes `source` and detects its format over a single read.
    async fn create_content(&self, source: &Arc<dyn StreamFactory>, cx: &AnalysisContext) -> Result<CachedNode> {
        let (header_tx, header_rx) = oneshot::channel::<Bytes>();
        let hashing = hash_and_detect(
            source.as_ref(),
            &cx.options.hash_algorithms,
            cx.options.pipeline(),
            Some(header_tx),
        );
        let detection = async {
            match header_rx.await {
                Ok(header) => self.engine.detect_with_header(source, header).await,
                Err(_) => None,
            }
        };
        let (hashed, format) = tokio::join!(hashing, detection);

        let node = match hashed {
            Ok(outcome) => {
                let node = match (&cx.existing, outcome.primary()) {
                    (Some(existing), _) => existing.clone(),
                    (None, Some(primary)) => LinkedNode::iri(self.graph.clone(), &primary.ni_uri()),
                    (None, None) => self.fallback_node(&source.dedup_key()),
                };

                node.set_class(if outcome.encoding.is_binary {
                    Class::ContentAsBase64
                } else {
                    Class::ContentAsText
                });
                node.set(Property::Extent, outcome.length);
                if let Some(charset) = outcome.encoding.charset {
                    node.set(Property::CharacterEncoding, charset);
                }
                for hash in &outcome.hashes {
                    let hash_node = node.fragment(&hash.algorithm);
                    hash_node.set_class(Class::FileHash);
                    hash_node.set(Property::HashAlgorithm, hash.label.as_str());
                    hash_node.set(Property::HashValue, hash.hex());
                    node.set_node(Property::HasHash, &hash_node);

                    let ni = hash.ni_uri();
                    if node.subject() != LinkedNode::iri(self.graph.clone(), &ni).subject() {
                        node.set_iri(Property::SameAs, &ni);
                    }
                }
                self.progress.inc_entity(outcome.length);
                node
            }
            Err(e) => {
                warn!("Failed to read {}: {}", source.dedup_key(), e);
                self.progress.inc_error();
                let node = cx
                    .existing
                    .clone()
                    .unwrap_or_else(|| self.fallback_node(&source.dedup_key()));
                node.set(Property::Corrupted, true);
                node
            }
        };

        let format_node = format.as_ref().map(|format| describe_format(&node, format));
        Ok(CachedNode {
            node,
            format,
            format_node,
        })
    }

    fn fallback_node(&self, key: &DedupKey) -> LinkedNode {
        let id = if self.options.stable {
            Uuid::new_v5(&Uuid::NAMESPACE_OID, key.to_string().as_bytes())
        } else {
            Uuid::new_v4()
        };
        LinkedNode::iri(self.graph.clone(), &id.urn().to_string())
    }

    /// Lists the container's entries and analyzes each readable one.
    async fn expand(&self, container: &dyn Container, format_node: &LinkedNode, cx: &AnalysisContext) {
        self.progress.inc_container();
        let listing = container.entries().await;

        if let Some(e) = listing.error {
            warn!("Container listing failed: {}", e);
            self.progress.inc_error();
            format_node.set(Property::Corrupted, true);
            if matches!(e, ArchiverError::Encrypted(_)) {
                format_node.set_individual(Property::EncryptionStatus, Individual::EncryptedStatus);
            }
        }

        let mut entries = listing.entries;
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        let mut hierarchy = PathHierarchy::new(format_node.clone());
        let mut readable = Vec::new();
        for entry in entries {
            let Some(item) = hierarchy.node_for(&entry.path, entry.is_directory) else {
                debug!("Skipping entry with empty path");
                continue;
            };
            describe_entry(&item, &entry);
            if entry.is_directory || entry.encrypted {
                continue;
            }
            if let Some(source) = entry.source {
                readable.push((item, source));
            }
        }

        let pending: Vec<BoxFuture<'_, (LinkedNode, Result<AnalysisResult>)>> = readable
            .into_iter()
            .map(|(item, source)| {
                let child_cx = cx.nested(item.clone());
                Box::pin(async move {
                    let result = self.analyze(Entity::Data(source), child_cx).await;
                    (item, result)
                }) as BoxFuture<'_, _>
            })
            .collect();
        let results: Vec<_> = stream::iter(pending)
            .buffered(cx.options.parallel_children)
            .collect()
            .await;
        for (item, result) in results {
            if let Err(e) = result {
                warn!("Failed to analyze entry {:?}: {}", item, e);
                self.progress.inc_error();
                item.set(Property::Corrupted, true);
            }
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn set_info_hash(node: &LinkedNode, hash: &InfoHash) {
    let hash_node = node.fragment("btih");
    hash_node.set_class(Class::FileHash);
    hash_node.set(Property::HashAlgorithm, "BTIH");
    hash_node.set(Property::HashValue, hash.hex());
    node.set_node(Property::HasHash, &hash_node);
    node.set_iri(Property::SameAs, &hash.urn());
}

fn describe_format(content: &LinkedNode, format: &FormatObject) -> LinkedNode {
    let node = content.fragment(format.format_name());
    content.set_node(Property::HasFormat, &node);
    node.set(Property::MimeType, format.media_type().into_owned());
    if let Some(extension) = format.extension() {
        node.set(Property::Extension, extension.into_owned());
    }
    format.value().describe(&node);
    debug!("Detected {} ({})", format.format_name(), format.media_type());
    node
}

fn describe_entry(item: &LinkedNode, entry: &ContainerEntry) {
    if entry.is_directory {
        item.set_class(Class::Folder);
    } else {
        item.set_class(Class::FileDataObject);
    }
    if let Some(length) = entry.length {
        item.set(Property::UncompressedSize, length);
    }
    if let Some(size) = entry.compressed_length.or(entry.length) {
        if !entry.is_directory {
            item.set(Property::FileSize, size);
        }
    }
    if let Some(modified) = entry.modified {
        item.set(Property::FileLastModified, modified);
    }
    if let Some(created) = entry.created {
        item.set(Property::FileCreated, created);
    }
    if let Some(revision) = entry.revision {
        item.set(Property::Version, revision);
    }
    if let Some(method) = entry.compression {
        item.set(Property::CompressionMethod, method);
    }
    if entry.encrypted {
        item.set_individual(Property::EncryptionStatus, Individual::EncryptedStatus);
    }
    if entry.corrupted {
        item.set(Property::Corrupted, true);
    }
}
