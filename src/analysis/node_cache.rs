use std::future::Future;

use crate::cache::PromiseMap;
use crate::engine::FormatObject;
use crate::error::Result;
use crate::graph::LinkedNode;
use crate::stream::DedupKey;

/// What kind of node a dedup key was resolved to. A file and its content
/// share a key but are distinct nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    File(DedupKey),
    Folder(DedupKey),
    Content(DedupKey),
}

#[derive(Clone)]
pub struct CachedNode {
    pub node: LinkedNode,
    pub format: Option<FormatObject>,
    pub format_node: Option<LinkedNode>,
}

impl CachedNode {
    pub fn plain(node: LinkedNode) -> Self {
        Self {
            node,
            format: None,
            format_node: None,
        }
    }
}

/// Dedup store: one node per key for the whole run.
#[derive(Default)]
pub struct NodeCache {
    nodes: PromiseMap<NodeKey, CachedNode>,
}

impl NodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the node for `key`, creating it with `create` on first use.
    /// The flag is `true` only for the caller that created it.
    pub async fn get_or_create<F, Fut>(&self, key: NodeKey, create: F) -> Result<(CachedNode, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedNode>>,
    {
        self.nodes.get_or_try_init(key, create).await
    }

    pub fn get(&self, key: &NodeKey) -> Option<CachedNode> {
        self.nodes.get(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
