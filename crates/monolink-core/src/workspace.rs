//! Workspace configuration: which projects exist and how they relate.
//!
//! Loaded from `monolink.json` at the workspace root. Each listed project's
//! name and version come from its own `package.json`.

use crate::error::LinkError;
use crate::link::package::PackageJson;
use crate::link::LinkWarning;
use crate::paths::{self, TEMP_SCOPE, WORKSPACE_CONFIG_FILE};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// Default common temp folder, relative to the workspace root.
pub const DEFAULT_COMMON_TEMP_FOLDER: &str = "common/temp";

/// The installer that produced the shared tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PackageManagerKind {
    #[default]
    Npm,
    Pnpm,
}

impl PackageManagerKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Npm => "npm",
            Self::Pnpm => "pnpm",
        }
    }
}

impl fmt::Display for PackageManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWorkspaceConfig {
    #[serde(default)]
    package_manager: PackageManagerKind,
    #[serde(default = "default_common_temp_folder")]
    common_temp_folder: String,
    #[serde(default)]
    projects: Vec<RawProject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProject {
    package_name: String,
    project_folder: String,
    #[serde(default)]
    cyclic_dependency_projects: BTreeSet<String>,
}

fn default_common_temp_folder() -> String {
    DEFAULT_COMMON_TEMP_FOLDER.to_string()
}

/// One project of the workspace.
#[derive(Debug, Clone)]
pub struct WorkspaceProject {
    /// Package name (matches the project's package.json).
    pub package_name: String,
    /// Absolute project folder.
    pub project_folder: PathBuf,
    /// Version from the project's package.json.
    pub version: String,
    /// Sibling projects that must never be linked directly from this one.
    pub cyclic_dependency_projects: BTreeSet<String>,
    /// The project's own package.json.
    pub manifest: PackageJson,
    /// Unscoped temp name, unique across the workspace.
    ///
    /// Starts as the unscoped package name; [`WorkspaceConfig::new`] appends
    /// `-1`, `-2`, ... when two projects would otherwise share it.
    pub temp_name: String,
}

impl WorkspaceProject {
    /// Build a project from its folder, reading `package.json`.
    pub fn from_folder(
        project_folder: PathBuf,
        cyclic_dependency_projects: BTreeSet<String>,
    ) -> Result<Self, LinkError> {
        let manifest = PackageJson::read(&project_folder.join("package.json"))?;
        let package_name = manifest.name.clone().ok_or_else(|| {
            LinkError::ConfigInvalid(format!(
                "{} has no \"name\" field",
                project_folder.join("package.json").display()
            ))
        })?;
        let version = manifest
            .version
            .clone()
            .unwrap_or_else(|| "0.0.0".to_string());
        let temp_name = paths::unscoped_name(&package_name).to_string();

        Ok(Self {
            package_name,
            project_folder,
            version,
            cyclic_dependency_projects,
            manifest,
            temp_name,
        })
    }

    /// Name of the project's package in the shared install, e.g. `@monolink-temp/app`.
    #[must_use]
    pub fn temp_project_name(&self) -> String {
        format!("{TEMP_SCOPE}/{}", self.unscoped_temp_name())
    }

    /// The temp name without its scope; also the name of the packed tarball.
    #[must_use]
    pub fn unscoped_temp_name(&self) -> &str {
        &self.temp_name
    }

    /// The project's link root.
    #[must_use]
    pub fn node_modules(&self) -> PathBuf {
        paths::node_modules_dir(&self.project_folder)
    }
}

/// The loaded workspace.
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    /// Workspace root (folder containing `monolink.json`).
    pub root: PathBuf,
    /// Installer flavour of the shared tree.
    pub package_manager: PackageManagerKind,
    /// Absolute common temp folder holding the shared install.
    pub common_temp_folder: PathBuf,
    /// Projects in configuration order.
    pub projects: Vec<WorkspaceProject>,
    by_name: HashMap<String, usize>,
}

impl WorkspaceConfig {
    /// Find `monolink.json` at or above `cwd` and load it.
    pub fn discover(cwd: &Path) -> Result<Self, LinkError> {
        let root = paths::find_workspace_root(cwd).ok_or_else(|| LinkError::WorkspaceNotFound {
            start: cwd.to_path_buf(),
            file: WORKSPACE_CONFIG_FILE,
        })?;
        Self::load(&root)
    }

    /// Load `monolink.json` from the workspace root.
    pub fn load(root: &Path) -> Result<Self, LinkError> {
        let root = dunce::canonicalize(root).map_err(|source| LinkError::ConfigRead {
            path: root.to_path_buf(),
            source,
        })?;
        let path = root.join(WORKSPACE_CONFIG_FILE);
        let content = std::fs::read_to_string(&path).map_err(|source| LinkError::ConfigRead {
            path: path.clone(),
            source,
        })?;
        let raw: RawWorkspaceConfig =
            serde_json::from_str(&content).map_err(|source| LinkError::ConfigParse {
                path: path.clone(),
                source,
            })?;

        let mut projects = Vec::with_capacity(raw.projects.len());
        for p in raw.projects {
            let folder = root.join(&p.project_folder);
            if !folder.is_dir() {
                return Err(LinkError::ConfigInvalid(format!(
                    "project folder {} for \"{}\" does not exist",
                    folder.display(),
                    p.package_name
                )));
            }
            if !folder.join("package.json").is_file() {
                return Err(LinkError::ConfigInvalid(format!(
                    "project \"{}\" has no package.json in {}",
                    p.package_name,
                    folder.display()
                )));
            }

            let project = WorkspaceProject::from_folder(folder, p.cyclic_dependency_projects)?;
            if project.package_name != p.package_name {
                return Err(LinkError::ConfigInvalid(format!(
                    "project \"{}\" in {WORKSPACE_CONFIG_FILE} does not match name \"{}\" in {}",
                    p.package_name,
                    project.package_name,
                    project.project_folder.join("package.json").display()
                )));
            }
            projects.push(project);
        }

        let config = Self::new(root.clone(), root.join(raw.common_temp_folder), projects)?
            .with_package_manager(raw.package_manager);
        config.validate_cyclic()?;
        Ok(config)
    }

    /// Build a workspace from already-loaded projects.
    ///
    /// Fails if two projects share a package name. Temp names are assigned
    /// in project order: the first `@x/util` gets `util`, a later `@y/util`
    /// gets `util-1`.
    pub fn new(
        root: PathBuf,
        common_temp_folder: PathBuf,
        mut projects: Vec<WorkspaceProject>,
    ) -> Result<Self, LinkError> {
        let mut by_name = HashMap::with_capacity(projects.len());
        let mut used_temp_names = HashSet::with_capacity(projects.len());
        for (i, project) in projects.iter_mut().enumerate() {
            if by_name.insert(project.package_name.clone(), i).is_some() {
                return Err(LinkError::ConfigInvalid(format!(
                    "project \"{}\" is listed more than once",
                    project.package_name
                )));
            }

            let unscoped = paths::unscoped_name(&project.package_name);
            let mut temp_name = unscoped.to_string();
            let mut counter = 0;
            while used_temp_names.contains(&temp_name) {
                counter += 1;
                temp_name = format!("{unscoped}-{counter}");
            }
            used_temp_names.insert(temp_name.clone());
            project.temp_name = temp_name;
        }

        Ok(Self {
            root,
            package_manager: PackageManagerKind::default(),
            common_temp_folder,
            projects,
            by_name,
        })
    }

    /// Set the package manager flavour.
    #[must_use]
    pub fn with_package_manager(mut self, kind: PackageManagerKind) -> Self {
        self.package_manager = kind;
        self
    }

    /// Look up a project by package name.
    #[must_use]
    pub fn project(&self, name: &str) -> Option<&WorkspaceProject> {
        self.by_name.get(name).map(|&i| &self.projects[i])
    }

    /// Check if a package name belongs to a workspace project.
    #[must_use]
    pub fn is_project(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Check every project's `cyclicDependencyProjects`.
    ///
    /// A project listing itself is an error. Entries naming no workspace
    /// project are returned as warnings.
    pub fn validate_cyclic(&self) -> Result<Vec<LinkWarning>, LinkError> {
        let mut warnings = Vec::new();
        for project in &self.projects {
            for cyclic in &project.cyclic_dependency_projects {
                if *cyclic == project.package_name {
                    return Err(LinkError::AmbiguousCyclicConfiguration {
                        project: project.package_name.clone(),
                    });
                }
                if !self.is_project(cyclic) {
                    warnings.push(LinkWarning::UnknownCyclicProject {
                        project: project.package_name.clone(),
                        cyclic: cyclic.clone(),
                    });
                }
            }
        }
        Ok(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_project(root: &Path, folder: &str, package_json: &str) {
        let dir = root.join(folder);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("package.json"), package_json).unwrap();
    }

    #[test]
    fn test_load_workspace() {
        let dir = tempdir().unwrap();
        write_project(dir.path(), "libs/a", r#"{"name":"a","version":"1.2.0"}"#);
        write_project(
            dir.path(),
            "apps/b",
            r#"{"name":"@scope/b","version":"0.1.0","dependencies":{"a":"^1.0.0"}}"#,
        );
        fs::write(
            dir.path().join(WORKSPACE_CONFIG_FILE),
            r#"{
                "packageManager": "pnpm",
                "projects": [
                    { "packageName": "a", "projectFolder": "libs/a" },
                    { "packageName": "@scope/b", "projectFolder": "apps/b",
                      "cyclicDependencyProjects": ["a"] }
                ]
            }"#,
        )
        .unwrap();

        let ws = WorkspaceConfig::load(dir.path()).unwrap();
        assert_eq!(ws.package_manager, PackageManagerKind::Pnpm);
        assert!(ws.common_temp_folder.ends_with("common/temp"));
        assert_eq!(ws.projects.len(), 2);

        let a = ws.project("a").unwrap();
        assert_eq!(a.version, "1.2.0");

        let b = ws.project("@scope/b").unwrap();
        assert_eq!(b.temp_project_name(), "@monolink-temp/b");
        assert!(b.cyclic_dependency_projects.contains("a"));
        assert!(!ws.is_project("c"));
    }

    #[test]
    fn test_discover_walks_up() {
        let dir = tempdir().unwrap();
        write_project(dir.path(), "a", r#"{"name":"a","version":"1.0.0"}"#);
        fs::write(
            dir.path().join(WORKSPACE_CONFIG_FILE),
            r#"{"projects":[{"packageName":"a","projectFolder":"a"}]}"#,
        )
        .unwrap();

        let ws = WorkspaceConfig::discover(&dir.path().join("a")).unwrap();
        assert_eq!(ws.package_manager, PackageManagerKind::Npm);
        assert!(ws.is_project("a"));
    }

    #[test]
    fn test_discover_not_found() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nowhere");
        fs::create_dir_all(&nested).unwrap();
        // An ancestor of the temp dir could in principle hold a monolink.json
        if let Err(err) = WorkspaceConfig::discover(&nested) {
            assert!(matches!(err, LinkError::WorkspaceNotFound { .. }));
        }
    }

    #[test]
    fn test_name_mismatch_rejected() {
        let dir = tempdir().unwrap();
        write_project(dir.path(), "a", r#"{"name":"not-a","version":"1.0.0"}"#);
        fs::write(
            dir.path().join(WORKSPACE_CONFIG_FILE),
            r#"{"projects":[{"packageName":"a","projectFolder":"a"}]}"#,
        )
        .unwrap();

        let err = WorkspaceConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, LinkError::ConfigInvalid(_)));
    }

    #[test]
    fn test_missing_project_folder_rejected() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(WORKSPACE_CONFIG_FILE),
            r#"{"projects":[{"packageName":"a","projectFolder":"missing"}]}"#,
        )
        .unwrap();

        let err = WorkspaceConfig::load(dir.path()).unwrap_err();
        assert_eq!(err.code(), crate::error::codes::LINK_CONFIG_INVALID);
    }

    #[test]
    fn test_duplicate_project_rejected() {
        let dir = tempdir().unwrap();
        write_project(dir.path(), "a", r#"{"name":"a","version":"1.0.0"}"#);
        fs::write(
            dir.path().join(WORKSPACE_CONFIG_FILE),
            r#"{"projects":[
                {"packageName":"a","projectFolder":"a"},
                {"packageName":"a","projectFolder":"a"}
            ]}"#,
        )
        .unwrap();

        let err = WorkspaceConfig::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_self_cyclic_rejected() {
        let dir = tempdir().unwrap();
        write_project(dir.path(), "a", r#"{"name":"a","version":"1.0.0"}"#);
        fs::write(
            dir.path().join(WORKSPACE_CONFIG_FILE),
            r#"{"projects":[{"packageName":"a","projectFolder":"a","cyclicDependencyProjects":["a"]}]}"#,
        )
        .unwrap();

        let err = WorkspaceConfig::load(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            LinkError::AmbiguousCyclicConfiguration { ref project } if project == "a"
        ));
    }

    #[test]
    fn test_unknown_cyclic_project_is_warning() {
        let dir = tempdir().unwrap();
        write_project(dir.path(), "a", r#"{"name":"a","version":"1.0.0"}"#);
        fs::write(
            dir.path().join(WORKSPACE_CONFIG_FILE),
            r#"{"projects":[{"packageName":"a","projectFolder":"a","cyclicDependencyProjects":["ghost"]}]}"#,
        )
        .unwrap();

        let ws = WorkspaceConfig::load(dir.path()).unwrap();
        let warnings = ws.validate_cyclic().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].to_string().contains("ghost"));
    }

    #[test]
    fn test_temp_names_are_unique() {
        let dir = tempdir().unwrap();
        write_project(dir.path(), "x", r#"{"name":"@x/util","version":"1.0.0"}"#);
        write_project(dir.path(), "y", r#"{"name":"@y/util","version":"1.0.0"}"#);
        write_project(dir.path(), "z", r#"{"name":"util","version":"1.0.0"}"#);
        fs::write(
            dir.path().join(WORKSPACE_CONFIG_FILE),
            r#"{"projects":[
                {"packageName":"@x/util","projectFolder":"x"},
                {"packageName":"@y/util","projectFolder":"y"},
                {"packageName":"util","projectFolder":"z"}
            ]}"#,
        )
        .unwrap();

        let ws = WorkspaceConfig::load(dir.path()).unwrap();
        let temp_names: Vec<String> = ws
            .projects
            .iter()
            .map(WorkspaceProject::temp_project_name)
            .collect();
        assert_eq!(
            temp_names,
            vec![
                "@monolink-temp/util",
                "@monolink-temp/util-1",
                "@monolink-temp/util-2"
            ]
        );
        assert_eq!(ws.project("@y/util").unwrap().unscoped_temp_name(), "util-1");
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(WORKSPACE_CONFIG_FILE), "{ not json").unwrap();

        let err = WorkspaceConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, LinkError::ConfigParse { .. }));
    }
}
