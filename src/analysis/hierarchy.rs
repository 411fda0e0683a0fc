use std::collections::HashMap;

use crate::graph::LinkedNode;
use crate::vocab::{Class, Property};

/// Materializes the folder structure implied by `/`-separated entry paths.
///
/// Every path prefix gets exactly one item node, linked to its parent prefix
/// (or the container itself) by `nfo:belongsToContainer`.
pub struct PathHierarchy {
    container: LinkedNode,
    nodes: HashMap<String, LinkedNode>,
}

impl PathHierarchy {
    pub fn new(container: LinkedNode) -> Self {
        Self {
            container,
            nodes: HashMap::new(),
        }
    }

    fn components(path: &str) -> Vec<&str> {
        path.split(['/', '\\'])
            .filter(|c| !c.is_empty() && *c != ".")
            .collect()
    }

    /// Item node for `path`. Intermediate prefixes become folders. Returns
    /// `None` for paths without any named component.
    pub fn node_for(&mut self, path: &str, is_directory: bool) -> Option<LinkedNode> {
        let components = Self::components(path);
        let last = components.len().checked_sub(1)?;

        let mut parent = self.container.clone();
        let mut prefix = String::new();
        for (i, component) in components.iter().enumerate() {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(component);

            let node = self
                .nodes
                .entry(prefix.clone())
                .or_insert_with(|| {
                    let node = parent.child(&segment(component));
                    node.set_class(Class::ArchiveItem);
                    node.set(Property::FileName, *component);
                    node.set_node(Property::BelongsToContainer, &parent);
                    node
                })
                .clone();
            if i < last || is_directory {
                node.set_class(Class::Folder);
            }
            parent = node;
        }
        Some(parent)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// `..` would be collapsed by IRI normalization.
fn segment(component: &str) -> String {
    if component == ".." {
        "%2E%2E".to_string()
    } else {
        component.to_string()
    }
}
