use std::path::{Path, PathBuf};

/// Workspace configuration file name.
pub const WORKSPACE_CONFIG_FILE: &str = "monolink.json";

/// Link manifest file name, stored in the common temp folder.
pub const LINK_MANIFEST_FILE: &str = "link-manifest.json";

/// Shrinkwrap file name, stored in the common temp folder.
pub const SHRINKWRAP_FILE: &str = "npm-shrinkwrap.json";

/// pnpm lockfile name, stored in the common temp folder.
pub const PNPM_LOCKFILE: &str = "pnpm-lock.yaml";

/// Folder holding installed packages.
pub const NODE_MODULES: &str = "node_modules";

/// Scope under which workspace projects are installed into the shared tree.
pub const TEMP_SCOPE: &str = "@monolink-temp";

/// Find the workspace root by walking up from `cwd` looking for [`WORKSPACE_CONFIG_FILE`].
///
/// Returns the first directory containing it, or `None` if no ancestor does.
#[must_use]
pub fn find_workspace_root(cwd: &Path) -> Option<PathBuf> {
    let mut current = cwd.to_path_buf();

    loop {
        if current.join(WORKSPACE_CONFIG_FILE).is_file() {
            return Some(current);
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Path of the link manifest for a common temp folder.
#[must_use]
pub fn link_manifest_path(common_temp: &Path) -> PathBuf {
    common_temp.join(LINK_MANIFEST_FILE)
}

/// The `node_modules` folder of a project or package folder.
#[must_use]
pub fn node_modules_dir(folder: &Path) -> PathBuf {
    folder.join(NODE_MODULES)
}

/// Strip the `@scope/` prefix from a package name.
#[must_use]
pub fn unscoped_name(name: &str) -> &str {
    match name.strip_prefix('@') {
        Some(rest) => rest.split_once('/').map_or(name, |(_, n)| n),
        None => name,
    }
}
