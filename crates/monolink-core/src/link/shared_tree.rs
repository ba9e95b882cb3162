//! Loading the shared install (`<commonTemp>/node_modules`) into a [`PackageTree`].

use super::package::{NodeId, PackageJson, PackageNode, PackageTree};
use crate::error::LinkError;
use crate::paths::{self, NODE_MODULES};
use crate::semver_range::version_satisfies;
use crate::workspace::{WorkspaceConfig, WorkspaceProject};
use flate2::read::GzDecoder;
use std::collections::VecDeque;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::debug;

/// Folder under the common temp folder holding per-project temp manifests and tarballs.
pub const TEMP_PROJECTS_FOLDER: &str = "projects";

/// Read the shared install rooted at `common_temp` into a tree.
///
/// Every package folder under `node_modules` becomes a node, recursively.
/// Node folder paths are link paths, not real paths: after a stale relink a
/// broken link is preferable to a link to the wrong package.
pub fn load_shared_tree(common_temp: &Path) -> Result<PackageTree, LinkError> {
    let root_manifest = common_temp.join("package.json");
    let root = if root_manifest.is_file() {
        PackageNode::from_manifest(&PackageJson::read(&root_manifest)?, common_temp)
    } else {
        PackageNode::new("", "", common_temp, Vec::new())
    };

    let mut tree = PackageTree::new(root);
    // Real path per node id, for symlink loop detection
    let mut real_paths: Vec<Option<PathBuf>> = vec![dunce::canonicalize(common_temp).ok()];
    let mut queue = VecDeque::from([tree.root()]);

    while let Some(parent) = queue.pop_front() {
        let node_modules = tree.get(parent).folder_path.join(NODE_MODULES);
        for (name, folder) in list_package_folders(&node_modules)? {
            let real_path = dunce::canonicalize(&folder).ok();
            if let Some(real) = &real_path {
                if is_ancestor_real_path(&tree, &real_paths, parent, real) {
                    debug!(folder = %folder.display(), "skipping symlink loop in shared install");
                    continue;
                }
            }

            let manifest_path = folder.join("package.json");
            if !manifest_path.is_file() {
                debug!(folder = %folder.display(), "skipping folder without package.json");
                continue;
            }

            let manifest = PackageJson::read(&manifest_path)?;
            if manifest.name.as_deref().is_some_and(|n| n != name) {
                debug!(
                    folder = %folder.display(),
                    declared = manifest.name.as_deref().unwrap_or_default(),
                    "package name differs from its folder name; using the folder name"
                );
            }

            let mut node = PackageNode::from_manifest(&manifest, folder);
            node.name = name;
            let id = tree.push_child(parent, node)?;
            real_paths.push(real_path);
            queue.push_back(id);
        }
    }

    Ok(tree)
}

/// Package folders directly inside a `node_modules` folder, sorted by package name.
///
/// Scope folders are expanded; dot-prefixed housekeeping folders are skipped.
fn list_package_folders(node_modules: &Path) -> Result<Vec<(String, PathBuf)>, LinkError> {
    let mut found = Vec::new();

    for (name, path) in read_dir_names(node_modules)? {
        if name.starts_with('.') || !path.is_dir() {
            continue;
        }

        if name.starts_with('@') {
            for (scoped, scoped_path) in read_dir_names(&path)? {
                if !scoped.starts_with('.') && scoped_path.is_dir() {
                    found.push((format!("{name}/{scoped}"), scoped_path));
                }
            }
        } else {
            found.push((name, path));
        }
    }

    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found)
}

fn read_dir_names(dir: &Path) -> Result<Vec<(String, PathBuf)>, LinkError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(LinkError::io("failed to read folder", dir, e)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| LinkError::io("failed to read folder", dir, e))?;
        names.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
    }
    Ok(names)
}

fn is_ancestor_real_path(
    tree: &PackageTree,
    real_paths: &[Option<PathBuf>],
    from: NodeId,
    real: &Path,
) -> bool {
    let mut current = Some(from);
    while let Some(id) = current {
        if real_paths[id.index()].as_deref() == Some(real) {
            return true;
        }
        current = tree.get(id).parent();
    }
    false
}

/// Add a virtual node for every workspace project missing from the shared root.
///
/// A project added after the last install has no folder under
/// `node_modules/@monolink-temp`. Its dependencies can still be resolved from
/// the root of the shared install, so a node is synthesized from the first
/// available manifest:
///
/// 1. `<commonTemp>/projects/<unscoped>.tgz` (`package/package.json`, read in memory)
/// 2. `<commonTemp>/projects/<unscoped>/package.json`
/// 3. the project's own `package.json`
///
/// Returns the temp names that were synthesized.
pub fn add_virtual_temp_packages(
    tree: &mut PackageTree,
    workspace: &WorkspaceConfig,
) -> Result<Vec<String>, LinkError> {
    let root = tree.root();
    let mut added = Vec::new();

    for project in &workspace.projects {
        let temp_name = project.temp_project_name();
        if tree.child_by_name(root, &temp_name).is_some() {
            continue;
        }

        let manifest = find_temp_manifest(project, workspace)?;
        let install_folder = paths::node_modules_dir(&workspace.common_temp_folder)
            .join(paths::TEMP_SCOPE)
            .join(project.unscoped_temp_name());

        let mut node = PackageNode::from_manifest(&manifest, install_folder);
        node.name.clone_from(&temp_name);
        if node.version.is_empty() {
            node.version.clone_from(&project.version);
        }

        debug!(project = %project.package_name, temp = %temp_name, "using virtual temp package");
        tree.push_child(root, node)?;
        added.push(temp_name);
    }

    Ok(added)
}

fn find_temp_manifest(
    project: &WorkspaceProject,
    workspace: &WorkspaceConfig,
) -> Result<PackageJson, LinkError> {
    let projects_folder = workspace.common_temp_folder.join(TEMP_PROJECTS_FOLDER);
    let unscoped = project.unscoped_temp_name();

    let tarball = projects_folder.join(format!("{unscoped}.tgz"));
    if tarball.is_file() {
        if let Some(manifest) = read_packed_manifest(&tarball)? {
            return Ok(manifest);
        }
    }

    let extracted = projects_folder.join(unscoped).join("package.json");
    if extracted.is_file() {
        return PackageJson::read(&extracted);
    }

    let own = project.project_folder.join("package.json");
    if own.is_file() {
        let manifest = PackageJson::read(&own)?;
        return Ok(temp_manifest(project, &manifest, workspace));
    }

    Err(LinkError::TempProjectMissing {
        project: project.package_name.clone(),
        temp_name: project.temp_project_name(),
        searched: format!(
            "{}, {}, {}",
            tarball.display(),
            extracted.display(),
            own.display()
        ),
    })
}

/// Read `package/package.json` out of a packed `.tgz` without extracting it.
fn read_packed_manifest(tarball: &Path) -> Result<Option<PackageJson>, LinkError> {
    let file = fs::File::open(tarball)
        .map_err(|e| LinkError::io("failed to open temp project tarball", tarball, e))?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let entries = archive
        .entries()
        .map_err(|e| LinkError::io("failed to read tarball entries", tarball, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| LinkError::io("failed to read tarball entry", tarball, e))?;
        let is_manifest = entry
            .path()
            .map(|p| p == Path::new("package/package.json"))
            .unwrap_or(false);
        if !is_manifest {
            continue;
        }

        let mut content = String::new();
        entry
            .read_to_string(&mut content)
            .map_err(|e| LinkError::io("failed to read tarball entry", tarball, e))?;
        return PackageJson::parse(&content, &tarball.join("package/package.json")).map(Some);
    }

    Ok(None)
}

/// The manifest the installer would have written for a project's temp package.
///
/// `dependencies` and `devDependencies` are both installable. Entries naming
/// a sibling project whose version satisfies the range, and that are not
/// listed as cyclic, move to `workspaceDependencies`.
#[must_use]
pub fn temp_manifest(
    project: &WorkspaceProject,
    manifest: &PackageJson,
    workspace: &WorkspaceConfig,
) -> PackageJson {
    let mut temp = PackageJson {
        name: Some(project.temp_project_name()),
        version: Some(project.version.clone()),
        optional_dependencies: manifest.optional_dependencies.clone(),
        ..PackageJson::default()
    };

    let installable = manifest
        .dev_dependencies
        .iter()
        .filter(|(name, _)| !manifest.dependencies.contains_key(*name))
        .chain(&manifest.dependencies);

    for (name, range) in installable {
        let local = workspace
            .project(name)
            .filter(|_| !project.cyclic_dependency_projects.contains(name))
            .filter(|local| version_satisfies(&local.version, range));

        if local.is_some() {
            temp.workspace_dependencies.insert(name.clone(), range.clone());
        } else {
            temp.dependencies.insert(name.clone(), range.clone());
        }
    }

    temp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::package::DependencyKind;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn write_pkg(folder: &Path, json: &str) {
        fs::create_dir_all(folder).unwrap();
        fs::write(folder.join("package.json"), json).unwrap();
    }

    #[test]
    fn test_load_shared_tree_nested_and_scoped() {
        let dir = tempdir().unwrap();
        let temp = dir.path();
        let nm = temp.join("node_modules");
        write_pkg(&nm.join("lib-b"), r#"{"name":"lib-b","version":"1.0.0"}"#);
        write_pkg(
            &nm.join("@monolink-temp").join("app"),
            r#"{"name":"@monolink-temp/app","version":"0.0.0","dependencies":{"lib-b":"~2.0.0"}}"#,
        );
        write_pkg(
            &nm.join("@monolink-temp").join("app").join("node_modules").join("lib-b"),
            r#"{"name":"lib-b","version":"2.0.0"}"#,
        );
        fs::create_dir_all(nm.join(".bin")).unwrap();
        fs::create_dir_all(nm.join("no-manifest")).unwrap();

        let tree = load_shared_tree(temp).unwrap();
        let root = tree.root();
        assert_eq!(tree.get(root).children().len(), 2);

        let app = tree.child_by_name(root, "@monolink-temp/app").unwrap();
        assert_eq!(tree.get(app).dependencies[0].kind, DependencyKind::Normal);

        let nested = tree.child_by_name(app, "lib-b").unwrap();
        assert_eq!(tree.get(nested).version, "2.0.0");

        let shallow = tree.child_by_name(root, "lib-b").unwrap();
        assert_eq!(tree.get(shallow).version, "1.0.0");
        assert!(tree.child_by_name(root, "no-manifest").is_none());
    }

    #[test]
    fn test_load_shared_tree_missing_node_modules() {
        let dir = tempdir().unwrap();
        let tree = load_shared_tree(dir.path()).unwrap();
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_load_shared_tree_invalid_manifest() {
        let dir = tempdir().unwrap();
        write_pkg(&dir.path().join("node_modules").join("bad"), "{ nope");

        let err = load_shared_tree(dir.path()).unwrap_err();
        assert!(matches!(err, LinkError::ManifestParse { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_load_shared_tree_stops_at_symlink_loop() {
        let dir = tempdir().unwrap();
        let nm = dir.path().join("node_modules");
        let a = nm.join("a");
        write_pkg(&a, r#"{"name":"a","version":"1.0.0"}"#);
        fs::create_dir_all(a.join("node_modules")).unwrap();
        std::os::unix::fs::symlink(&a, a.join("node_modules").join("a")).unwrap();

        let tree = load_shared_tree(dir.path()).unwrap();
        let a_id = tree.child_by_name(tree.root(), "a").unwrap();
        assert!(tree.child_by_name(a_id, "a").is_none());
    }

    fn workspace_with(dir: &Path, projects: &[(&str, &str, &str)]) -> WorkspaceConfig {
        let mut loaded = Vec::new();
        for (name, version, deps) in projects {
            let folder = dir.join(name);
            write_pkg(
                &folder,
                &format!(r#"{{"name":"{name}","version":"{version}","dependencies":{deps}}}"#),
            );
            loaded.push(WorkspaceProject::from_folder(folder, BTreeSet::new()).unwrap());
        }
        WorkspaceConfig::new(dir.to_path_buf(), dir.join("common/temp"), loaded).unwrap()
    }

    #[test]
    fn test_virtual_temp_package_from_project_manifest() {
        let dir = tempdir().unwrap();
        let ws = workspace_with(
            dir.path(),
            &[
                ("a", "1.2.0", "{}"),
                ("b", "1.0.0", r#"{"a":">=1.0.0 <2.0.0","lodash":"^4.0.0"}"#),
            ],
        );
        let mut tree = PackageTree::new(PackageNode::new("", "", &ws.common_temp_folder, Vec::new()));

        let added = add_virtual_temp_packages(&mut tree, &ws).unwrap();
        assert_eq!(added, vec!["@monolink-temp/a", "@monolink-temp/b"]);

        let b = tree.child_by_name(tree.root(), "@monolink-temp/b").unwrap();
        let node = tree.get(b);
        assert!(node.folder_path.ends_with("node_modules/@monolink-temp/b"));
        let kinds: Vec<(&str, DependencyKind)> = node
            .dependencies
            .iter()
            .map(|d| (d.name.as_str(), d.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![("a", DependencyKind::LocalLink), ("lodash", DependencyKind::Normal)]
        );
    }

    #[test]
    fn test_virtual_temp_package_prefers_extracted_manifest() {
        let dir = tempdir().unwrap();
        let ws = workspace_with(dir.path(), &[("a", "1.0.0", r#"{"left-pad":"^1.0.0"}"#)]);
        write_pkg(
            &ws.common_temp_folder.join("projects").join("a"),
            r#"{"name":"@monolink-temp/a","version":"0.0.0","dependencies":{"right-pad":"^1.0.0"}}"#,
        );
        let mut tree = PackageTree::new(PackageNode::new("", "", &ws.common_temp_folder, Vec::new()));

        add_virtual_temp_packages(&mut tree, &ws).unwrap();
        let a = tree.child_by_name(tree.root(), "@monolink-temp/a").unwrap();
        assert_eq!(tree.get(a).dependencies[0].name, "right-pad");
    }

    #[test]
    fn test_virtual_temp_package_from_tarball() {
        let dir = tempdir().unwrap();
        let ws = workspace_with(dir.path(), &[("a", "1.0.0", "{}")]);
        let projects = ws.common_temp_folder.join("projects");
        fs::create_dir_all(&projects).unwrap();

        let manifest = br#"{"name":"@monolink-temp/a","version":"0.0.0","dependencies":{"packed":"^1.0.0"}}"#;
        let file = fs::File::create(projects.join("a.tgz")).unwrap();
        let gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(gz);
        let mut header = tar::Header::new_gnu();
        header.set_size(manifest.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "package/package.json", &manifest[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let mut tree = PackageTree::new(PackageNode::new("", "", &ws.common_temp_folder, Vec::new()));
        add_virtual_temp_packages(&mut tree, &ws).unwrap();

        let a = tree.child_by_name(tree.root(), "@monolink-temp/a").unwrap();
        assert_eq!(tree.get(a).dependencies[0].name, "packed");
        assert!(!projects.join("a").exists());
    }

    #[test]
    fn test_virtual_temp_package_missing() {
        let dir = tempdir().unwrap();
        let ws = workspace_with(dir.path(), &[("a", "1.0.0", "{}")]);
        fs::remove_file(dir.path().join("a").join("package.json")).unwrap();

        let mut tree = PackageTree::new(PackageNode::new("", "", &ws.common_temp_folder, Vec::new()));
        let err = add_virtual_temp_packages(&mut tree, &ws).unwrap_err();
        assert!(matches!(err, LinkError::TempProjectMissing { .. }));
    }

    #[test]
    fn test_temp_manifest_keeps_incompatible_sibling_shared() {
        let dir = tempdir().unwrap();
        let ws = workspace_with(
            dir.path(),
            &[("a", "2.0.0", "{}"), ("b", "1.0.0", r#"{"a":">=1.0.0 <2.0.0"}"#)],
        );
        let b = ws.project("b").unwrap();

        let temp = temp_manifest(b, &b.manifest, &ws);
        assert!(temp.workspace_dependencies.is_empty());
        assert_eq!(temp.dependencies.get("a").unwrap(), ">=1.0.0 <2.0.0");
        assert_eq!(temp.name.as_deref(), Some("@monolink-temp/b"));
    }
}
