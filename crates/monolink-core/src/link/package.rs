//! Package trees: an arena of [`PackageNode`]s addressed by [`NodeId`].
//!
//! The same structure describes both the shared install (one node per
//! installed package folder) and each project's private tree of link
//! placeholders. Parents are plain indices, so the tree needs no reference
//! counting.

use crate::error::LinkError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Write;
use std::path::{Path, PathBuf};

/// Index of a node inside a [`PackageTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// How a dependency was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DependencyKind {
    Normal,
    /// A resolution failure downgrades to a warning.
    Optional,
    /// The installer already bound this entry to a sibling workspace project.
    LocalLink,
}

/// One declared dependency edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub name: String,
    pub version_range: String,
    pub kind: DependencyKind,
}

impl Dependency {
    pub fn new(name: impl Into<String>, version_range: impl Into<String>, kind: DependencyKind) -> Self {
        Self {
            name: name.into(),
            version_range: version_range.into(),
            kind,
        }
    }
}

/// The subset of `package.json` the linker reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub optional_dependencies: BTreeMap<String, String>,
    /// Entries the installer pre-resolved to sibling workspace projects.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub workspace_dependencies: BTreeMap<String, String>,
}

impl PackageJson {
    /// Read and parse a `package.json` file.
    pub fn read(path: &Path) -> Result<Self, LinkError> {
        let content = std::fs::read_to_string(path).map_err(|source| LinkError::ManifestRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    /// Parse `package.json` text. `path` is only used for error context.
    pub fn parse(content: &str, path: &Path) -> Result<Self, LinkError> {
        serde_json::from_str(content).map_err(|source| LinkError::ManifestParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Merge the dependency maps into one name-deduplicated list, sorted by name.
    ///
    /// Optional dependencies come first; a normal dependency of the same name
    /// replaces the optional entry. Workspace dependencies are added last and
    /// only if the name is not already present. `devDependencies` are not part
    /// of an installed package's dependencies.
    #[must_use]
    pub fn merged_dependencies(&self) -> Vec<Dependency> {
        let mut merged: BTreeMap<&str, Dependency> = BTreeMap::new();

        for (name, range) in &self.optional_dependencies {
            merged
                .entry(name)
                .or_insert_with(|| Dependency::new(name, range, DependencyKind::Optional));
        }

        for (name, range) in &self.dependencies {
            match merged.get(name.as_str()) {
                Some(existing) if existing.kind != DependencyKind::Optional => {}
                _ => {
                    merged.insert(name, Dependency::new(name, range, DependencyKind::Normal));
                }
            }
        }

        for (name, range) in &self.workspace_dependencies {
            merged
                .entry(name)
                .or_insert_with(|| Dependency::new(name, range, DependencyKind::LocalLink));
        }

        merged.into_values().collect()
    }
}

/// One package occupying one folder in a dependency tree.
#[derive(Debug, Clone)]
pub struct PackageNode {
    pub name: String,
    pub version: String,
    /// Where the package lives (shared tree) or will be linked (private tree).
    pub folder_path: PathBuf,
    pub dependencies: Vec<Dependency>,
    /// Set on link placeholders: the folder the link points at.
    pub symlink_target: Option<PathBuf>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    children_by_name: HashMap<String, NodeId>,
}

impl PackageNode {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        folder_path: impl Into<PathBuf>,
        dependencies: Vec<Dependency>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            folder_path: folder_path.into(),
            dependencies,
            symlink_target: None,
            parent: None,
            children: Vec::new(),
            children_by_name: HashMap::new(),
        }
    }

    /// Build a node from a parsed manifest located in `folder_path`.
    #[must_use]
    pub fn from_manifest(manifest: &PackageJson, folder_path: impl Into<PathBuf>) -> Self {
        Self::new(
            manifest.name.clone().unwrap_or_default(),
            manifest.version.clone().unwrap_or_default(),
            folder_path,
            manifest.merged_dependencies(),
        )
    }

    /// Build a link placeholder pointing at `target`.
    #[must_use]
    pub fn link(
        name: impl Into<String>,
        version: impl Into<String>,
        folder_path: impl Into<PathBuf>,
        dependencies: Vec<Dependency>,
        target: impl Into<PathBuf>,
    ) -> Self {
        let mut node = Self::new(name, version, folder_path, dependencies);
        node.symlink_target = Some(target.into());
        node
    }

    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    #[must_use]
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// `name@version`, the key used by the package index.
    #[must_use]
    pub fn name_and_version(&self) -> String {
        let name = if self.name.is_empty() {
            "(missing name)"
        } else {
            &self.name
        };
        let version = if self.version.is_empty() {
            "(missing version)"
        } else {
            &self.version
        };
        format!("{name}@{version}")
    }
}

/// Result of [`PackageTree::resolve_or_create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// The nearest node with the requested name, whatever its version.
    pub found: Option<NodeId>,
    /// The highest node where a new copy could be placed without colliding.
    ///
    /// `None` when the match was an immediate child, so no other version can
    /// be placed.
    pub parent_for_create: Option<NodeId>,
}

/// Arena of package nodes with a single root.
#[derive(Debug, Clone)]
pub struct PackageTree {
    nodes: Vec<PackageNode>,
    root: NodeId,
}

impl PackageTree {
    /// Create a tree holding only `root`.
    #[must_use]
    pub fn new(root: PackageNode) -> Self {
        let mut root = root;
        root.parent = None;
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Borrow a node.
    ///
    /// Ids are only handed out by this tree, so indexing cannot go out of bounds.
    #[must_use]
    pub fn get(&self, id: NodeId) -> &PackageNode {
        &self.nodes[id.0]
    }

    /// Store a detached node and return its id.
    pub fn insert(&mut self, node: PackageNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Attach a detached node under `parent`.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), LinkError> {
        if self.nodes[child.0].parent.is_some() || child == self.root || child == parent {
            return Err(LinkError::AlreadyHasParent {
                child: self.nodes[child.0].name_and_version(),
            });
        }

        let name = self.nodes[child.0].name.clone();
        if self.nodes[parent.0].children_by_name.contains_key(&name) {
            return Err(LinkError::DuplicateChild {
                parent: self.nodes[parent.0].name_and_version(),
                child: name,
            });
        }

        self.nodes[child.0].parent = Some(parent);
        let parent_node = &mut self.nodes[parent.0];
        parent_node.children.push(child);
        parent_node.children_by_name.insert(name, child);
        Ok(())
    }

    /// Insert `node` and attach it under `parent` in one step.
    pub fn push_child(&mut self, parent: NodeId, node: PackageNode) -> Result<NodeId, LinkError> {
        let id = self.insert(node);
        self.add_child(parent, id)?;
        Ok(id)
    }

    #[must_use]
    pub fn child_by_name(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[parent.0].children_by_name.get(name).copied()
    }

    /// Nearest-ancestor lookup of `name`, starting at `from`'s children.
    ///
    /// Walks upward until a node has a child named `name`, the tree root is
    /// reached, or `cyclic_root` is reached. `parent_for_create` is the last
    /// node visited without a match.
    #[must_use]
    pub fn resolve_or_create(
        &self,
        from: NodeId,
        name: &str,
        cyclic_root: Option<NodeId>,
    ) -> Resolution {
        let mut current = from;
        let mut parent_for_create = None;

        loop {
            if let Some(found) = self.child_by_name(current, name) {
                return Resolution {
                    found: Some(found),
                    parent_for_create,
                };
            }

            parent_for_create = Some(current);

            match self.nodes[current.0].parent {
                Some(parent) if cyclic_root != Some(current) => current = parent,
                _ => {
                    return Resolution {
                        found: None,
                        parent_for_create,
                    }
                }
            }
        }
    }

    /// Nearest-ancestor lookup without a placement target.
    #[must_use]
    pub fn resolve(&self, from: NodeId, name: &str) -> Option<NodeId> {
        self.resolve_or_create(from, name, None).found
    }

    /// Ids in breadth-first order from the root.
    #[must_use]
    pub fn breadth_first(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut queue = VecDeque::from([self.root]);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            queue.extend(self.nodes[id.0].children.iter().copied());
        }
        order
    }

    /// Render the tree as indented `name@version` lines, for trace logging.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut stack = vec![(self.root, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let node = &self.nodes[id.0];
            let _ = write!(out, "{:indent$}{}", "", node.name_and_version(), indent = depth * 2);
            if let Some(target) = &node.symlink_target {
                let _ = write!(out, " -> {}", target.display());
            }
            out.push('\n');
            for &child in node.children.iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        out
    }
}
