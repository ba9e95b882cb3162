//! `name@version` lookup over the shared install.

use super::package::{NodeId, PackageTree};
use std::collections::HashMap;

/// Exact `name@version` index of a shared tree.
///
/// Built breadth-first so the shallowest (most hoisted) copy of each version
/// is the one indexed. Read-only after construction and shared by every
/// resolver worker.
#[derive(Debug, Default)]
pub struct PackageIndex {
    by_key: HashMap<String, NodeId>,
}

impl PackageIndex {
    /// Index every node of `tree`; the first occurrence of a key wins.
    #[must_use]
    pub fn build(tree: &PackageTree) -> Self {
        let mut by_key = HashMap::new();
        for id in tree.breadth_first() {
            let node = tree.get(id);
            by_key.entry(key(&node.name, &node.version)).or_insert(id);
        }
        Self { by_key }
    }

    /// Exact lookup; no range matching.
    #[must_use]
    pub fn lookup(&self, name: &str, version: &str) -> Option<NodeId> {
        self.by_key.get(&key(name, version)).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

fn key(name: &str, version: &str) -> String {
    format!("{name}@{version}")
}
