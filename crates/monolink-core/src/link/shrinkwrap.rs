//! Compatibility queries against the committed lockfile.
//!
//! The linker never re-resolves versions from the lockfile; it only asks
//! whether the lockfile could satisfy a range, to make warnings actionable.
//! npm workspaces commit `npm-shrinkwrap.json` ([`ShrinkwrapFile`]); pnpm
//! workspaces commit `pnpm-lock.yaml` ([`PnpmLockfile`]).

use crate::error::LinkError;
use crate::semver_range::version_satisfies;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;

/// Lockfile compatibility queries used by the resolvers.
pub trait ShrinkwrapQuery: Send + Sync + Debug {
    /// True if the lockfile's top-level entry for `name` satisfies `range`.
    fn has_compatible_top_level_dependency(&self, name: &str, range: &str) -> bool;

    /// The lockfile version of `name` visible from `project_scope` (a temp
    /// project name), if it satisfies `range`.
    fn try_ensure_compatible_dependency(
        &self,
        name: &str,
        range: &str,
        project_scope: &str,
    ) -> Option<String>;
}

/// Used when the workspace has no lockfile; answers every query negatively.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoShrinkwrap;

impl ShrinkwrapQuery for NoShrinkwrap {
    fn has_compatible_top_level_dependency(&self, _name: &str, _range: &str) -> bool {
        false
    }

    fn try_ensure_compatible_dependency(
        &self,
        _name: &str,
        _range: &str,
        _project_scope: &str,
    ) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ShrinkwrapEntry {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    dependencies: BTreeMap<String, ShrinkwrapEntry>,
}

/// An `npm-shrinkwrap.json` file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShrinkwrapFile {
    #[serde(default)]
    dependencies: BTreeMap<String, ShrinkwrapEntry>,
}

impl ShrinkwrapFile {
    /// Load a shrinkwrap file, or `None` if it does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, LinkError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(LinkError::ManifestRead {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::parse(&content, path).map(Some)
    }

    /// Parse shrinkwrap text. `path` is only used for error context.
    pub fn parse(content: &str, path: &Path) -> Result<Self, LinkError> {
        serde_json::from_str(content).map_err(|source| LinkError::ManifestParse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn top_level_version(&self, name: &str) -> Option<&str> {
        self.dependencies.get(name)?.version.as_deref()
    }
}

impl ShrinkwrapQuery for ShrinkwrapFile {
    fn has_compatible_top_level_dependency(&self, name: &str, range: &str) -> bool {
        self.top_level_version(name)
            .is_some_and(|v| version_satisfies(v, range))
    }

    fn try_ensure_compatible_dependency(
        &self,
        name: &str,
        range: &str,
        project_scope: &str,
    ) -> Option<String> {
        // A copy nested under the temp project shadows the top-level one
        let version = self
            .dependencies
            .get(project_scope)
            .and_then(|scope| scope.dependencies.get(name))
            .and_then(|entry| entry.version.as_deref())
            .or_else(|| self.top_level_version(name))?;

        version_satisfies(version, range).then(|| version.to_string())
    }
}

/// A `pnpm-lock.yaml` file.
///
/// ```yaml
/// dependencies:
///   '@monolink-temp/app': file:projects/app.tgz
///   lodash: 4.17.21
/// packages:
///   file:projects/app.tgz:
///     dependencies:
///       lodash: 4.17.20
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PnpmLockfile {
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default)]
    packages: BTreeMap<String, PnpmPackage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PnpmPackage {
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
}

impl PnpmLockfile {
    /// Load a pnpm lockfile, or `None` if it does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, LinkError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(LinkError::ManifestRead {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::parse(&content, path).map(Some)
    }

    /// Parse lockfile text. `path` is only used for error context.
    pub fn parse(content: &str, path: &Path) -> Result<Self, LinkError> {
        serde_yaml::from_str(content).map_err(|source| LinkError::LockfileParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Version a temp project's lockfile entry pins for `name`.
    fn temp_project_version(&self, name: &str, temp_project: &str) -> Option<&str> {
        let key = self.dependencies.get(temp_project)?;
        let entry = self.packages.get(key)?;
        dependency_key_version(entry.dependencies.get(name)?)
    }
}

impl ShrinkwrapQuery for PnpmLockfile {
    fn has_compatible_top_level_dependency(&self, name: &str, range: &str) -> bool {
        self.dependencies
            .get(name)
            .and_then(|key| dependency_key_version(key))
            .is_some_and(|v| version_satisfies(v, range))
    }

    fn try_ensure_compatible_dependency(
        &self,
        name: &str,
        range: &str,
        project_scope: &str,
    ) -> Option<String> {
        let version = self.temp_project_version(name, project_scope)?;
        version_satisfies(version, range).then(|| version.to_string())
    }
}

/// The version inside a pnpm dependency key.
///
/// Handles `1.2.3`, `1.2.3_react@16.8.0`, `1.2.3(react@16.8.0)`,
/// `/left-pad/1.3.0` and `/left-pad@1.3.0`. Tarball and link keys have no
/// version.
fn dependency_key_version(key: &str) -> Option<&str> {
    let key = key.split('(').next().unwrap_or(key);
    let key = match key.strip_prefix('/') {
        Some(path) => {
            let last = path.rsplit('/').next().unwrap_or(path);
            last.rsplit_once('@').map_or(last, |(_, version)| version)
        }
        None => key,
    };
    let version = key.split('_').next().unwrap_or(key);
    semver::Version::parse(version).is_ok().then_some(version)
}
