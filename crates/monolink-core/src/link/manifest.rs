//! The persisted record of project-to-project links.
//!
//! Downstream build tooling reads it to order tasks, so only true
//! workspace-to-workspace bindings are ever recorded.

use crate::error::LinkError;
use monolink_util::fs::{atomic_write, read_to_string_lossy};
use monolink_util::retry::{create_dir_all_with_retry, remove_path_with_retry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::Path;

/// `{ "localLinks": { "<project>": ["<sibling>", ...] } }`
///
/// Keys and values are sorted, so two runs over the same workspace
/// serialize to identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkManifest {
    #[serde(default)]
    local_links: BTreeMap<String, BTreeSet<String>>,
}

impl LinkManifest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `project` links directly to the sibling `dependency`.
    pub fn add_link(&mut self, project: &str, dependency: &str) {
        self.local_links
            .entry(project.to_string())
            .or_default()
            .insert(dependency.to_string());
    }

    /// Record every link of one project. Projects without links get no entry.
    pub fn extend_project<'a>(
        &mut self,
        project: &str,
        dependencies: impl IntoIterator<Item = &'a String>,
    ) {
        for dependency in dependencies {
            self.add_link(project, dependency);
        }
    }

    /// Siblings `project` links to, if any.
    #[must_use]
    pub fn links_for(&self, project: &str) -> Option<&BTreeSet<String>> {
        self.local_links.get(project)
    }

    #[must_use]
    pub fn local_links(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.local_links
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.local_links.is_empty()
    }

    /// Serialize as pretty JSON with a trailing newline.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Write the manifest atomically; readers never observe a partial file.
    pub fn save(&self, path: &Path) -> Result<(), LinkError> {
        let json = self
            .to_json()
            .map_err(|e| LinkError::io("failed to serialize link manifest", path, e.into()))?;
        if let Some(parent) = path.parent() {
            create_dir_all_with_retry(parent)
                .map_err(|e| LinkError::io("failed to create folder", parent, e))?;
        }
        atomic_write(path, json.as_bytes())
            .map_err(|e| LinkError::io("failed to write link manifest", path, e))
    }

    /// Read a manifest back, or `None` if no link run has completed.
    pub fn load(path: &Path) -> Result<Option<Self>, LinkError> {
        let content = match read_to_string_lossy(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(LinkError::ManifestRead {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| LinkError::ManifestParse {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Delete the manifest so an interrupted run forces a full relink.
    pub fn delete(path: &Path) -> Result<(), LinkError> {
        remove_path_with_retry(path)
            .map_err(|e| LinkError::io("failed to delete link manifest", path, e))
    }
}
