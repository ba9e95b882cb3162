//! Turning a resolved private tree into real folders and links.
//!
//! A project's link root is always purged and rebuilt. Patching it in place
//! cannot safely remove entries that a previous run created but the current
//! resolution no longer wants.

use super::package::{NodeId, PackageTree};
use crate::error::LinkError;
use crate::paths::NODE_MODULES;
use monolink_util::retry::{create_dir_all_with_retry, remove_path_with_retry, with_retry};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

/// Name of the shared tooling-binaries folder under `node_modules`.
pub const BIN_FOLDER: &str = ".bin";

/// What a link points at, which decides how it is created on each platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    File,
    Directory,
}

/// Counts from materializing one project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeStats {
    /// Links created, including per-entry overlay links.
    pub links: usize,
    /// Real folders created to hold overlaid packages.
    pub folders: usize,
}

/// Creates project link roots from private trees.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkMaterializer {
    absolute_symlinks: bool,
}

impl LinkMaterializer {
    #[must_use]
    pub fn new(absolute_symlinks: bool) -> Self {
        Self { absolute_symlinks }
    }

    /// Purge the link root of the project at `tree`'s root and rebuild it.
    ///
    /// A node without children becomes one directory link at its slot. A
    /// node with children becomes a real folder holding a link for every
    /// entry of its target except `node_modules`, which is rebuilt from the
    /// node's own children instead.
    pub fn relink_project(&self, tree: &PackageTree) -> Result<MaterializeStats, LinkError> {
        let project = tree.get(tree.root());
        if project.parent().is_some() {
            return Err(LinkError::invariant(format!(
                "{} is not a top-level project",
                project.name
            )));
        }

        let link_root = project.folder_path.join(NODE_MODULES);
        info!(path = %link_root.display(), "purging link root");
        remove_path_with_retry(&link_root)
            .map_err(|e| LinkError::io("failed to delete", &link_root, e))?;
        create_dir_all_with_retry(&link_root)
            .map_err(|e| LinkError::io("failed to create folder", &link_root, e))?;

        let mut stats = MaterializeStats::default();
        let mut queue: VecDeque<NodeId> = project.children().iter().copied().collect();

        // A node's children are only reached after the node itself exists
        while let Some(id) = queue.pop_front() {
            self.materialize_node(tree, id, &mut stats)?;
            queue.extend(tree.get(id).children().iter().copied());
        }

        Ok(stats)
    }

    fn materialize_node(
        &self,
        tree: &PackageTree,
        id: NodeId,
        stats: &mut MaterializeStats,
    ) -> Result<(), LinkError> {
        let node = tree.get(id);
        let Some(target) = node.symlink_target.as_deref() else {
            return Err(LinkError::invariant(format!(
                "{} has no link target",
                node.name_and_version()
            )));
        };

        if !node.has_children() {
            self.create_link(target, &node.folder_path, LinkKind::Directory)?;
            stats.links += 1;
            return Ok(());
        }

        create_dir_all_with_retry(&node.folder_path)
            .map_err(|e| LinkError::io("failed to create folder", &node.folder_path, e))?;
        stats.folders += 1;

        for name in read_entry_names(target)? {
            if name.eq_ignore_ascii_case(NODE_MODULES) {
                continue;
            }
            let (entry_target, kind) = classify_entry(&target.join(&name))?;
            self.create_link(&entry_target, &node.folder_path.join(&name), kind)?;
            stats.links += 1;
        }

        let nested = node.folder_path.join(NODE_MODULES);
        create_dir_all_with_retry(&nested)
            .map_err(|e| LinkError::io("failed to create folder", &nested, e))?;
        Ok(())
    }

    /// Link the shared `.bin` folder into a project whose tree has
    /// dependencies. Returns whether a link was created.
    pub fn link_bin_folder(&self, shared_root: &Path, tree: &PackageTree) -> Result<bool, LinkError> {
        let project = tree.get(tree.root());
        if !project.has_children() {
            return Ok(false);
        }

        let shared_bin = shared_root.join(NODE_MODULES).join(BIN_FOLDER);
        if !shared_bin.is_dir() {
            return Ok(false);
        }

        let project_bin = project.folder_path.join(NODE_MODULES).join(BIN_FOLDER);
        self.create_link(&shared_bin, &project_bin, LinkKind::Directory)?;
        Ok(true)
    }

    /// Create one link at `link` pointing to `target`.
    ///
    /// Directories become junctions on Windows and symlinks elsewhere. Files
    /// become hard links on Windows, since file symlinks need elevation there.
    /// Symlink targets are relative to the link's real parent folder unless
    /// absolute targets were requested.
    pub fn create_link(&self, target: &Path, link: &Path, kind: LinkKind) -> Result<(), LinkError> {
        let parent = link.parent().unwrap_or(Path::new("."));
        create_dir_all_with_retry(parent)
            .map_err(|e| LinkError::io("failed to create folder", parent, e))?;

        trace!(link = %link.display(), target = %target.display(), ?kind, "creating link");

        #[cfg(windows)]
        {
            let result = match kind {
                LinkKind::Directory => with_retry(|| junction::create(target, link)),
                LinkKind::File => with_retry(|| fs::hard_link(target, link)),
            };
            result.map_err(|e| LinkError::io("failed to create link", link, e))
        }

        #[cfg(unix)]
        {
            let _ = kind;
            let link_target = if self.absolute_symlinks {
                target.to_path_buf()
            } else {
                relative_target(target, parent)?
            };
            with_retry(|| std::os::unix::fs::symlink(&link_target, link))
                .map_err(|e| LinkError::io("failed to create link", link, e))
        }

        #[cfg(not(any(unix, windows)))]
        {
            let _ = (kind, self.absolute_symlinks);
            Err(LinkError::io(
                "failed to create link",
                link,
                std::io::Error::from(std::io::ErrorKind::Unsupported),
            ))
        }
    }
}

/// `target` expressed relative to the real path of `link_parent`.
#[cfg(unix)]
fn relative_target(target: &Path, link_parent: &Path) -> Result<PathBuf, LinkError> {
    let real_parent = dunce::canonicalize(link_parent)
        .map_err(|e| LinkError::io("failed to resolve", link_parent, e))?;
    Ok(pathdiff::diff_paths(target, &real_parent).unwrap_or_else(|| target.to_path_buf()))
}

/// Sorted entry names of a link target folder.
fn read_entry_names(folder: &Path) -> Result<Vec<String>, LinkError> {
    let entries =
        fs::read_dir(folder).map_err(|e| LinkError::io("failed to read folder", folder, e))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| LinkError::io("failed to read folder", folder, e))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// Decide the link kind for one entry of an overlaid package.
///
/// An entry that is itself a link to a directory is re-targeted at its real
/// path: a junction cannot point at a directory symlink.
fn classify_entry(entry: &Path) -> Result<(PathBuf, LinkKind), LinkError> {
    let metadata =
        fs::symlink_metadata(entry).map_err(|e| LinkError::io("failed to stat", entry, e))?;

    if metadata.file_type().is_symlink() {
        let real =
            dunce::canonicalize(entry).map_err(|e| LinkError::io("failed to resolve", entry, e))?;
        if real.is_dir() {
            debug!(entry = %entry.display(), real = %real.display(), "linking to real path");
            return Ok((real, LinkKind::Directory));
        }
        return Ok((entry.to_path_buf(), LinkKind::File));
    }

    let kind = if metadata.is_dir() {
        LinkKind::Directory
    } else {
        LinkKind::File
    };
    Ok((entry.to_path_buf(), kind))
}
