use crate::workspace::PackageManagerKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable that forces absolute link targets when set to `1`.
pub const ABSOLUTE_SYMLINKS_ENV: &str = "MONOLINK_ABSOLUTE_SYMLINKS";

/// Runtime configuration for the monolink CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory.
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }
}

/// Options for a single `link` run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkOptions {
    /// Relink even if a link manifest from a previous run exists.
    pub force: bool,

    /// Resolve every dependency against the shared install, never a sibling project.
    pub no_local_links: bool,

    /// Use absolute symlink targets instead of relative ones.
    pub absolute_symlinks: bool,

    /// Number of projects linked concurrently.
    pub parallelism: usize,

    /// Overrides `packageManager` from the workspace config.
    pub package_manager: Option<PackageManagerKind>,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            force: false,
            no_local_links: false,
            absolute_symlinks: absolute_symlinks_from_env(),
            parallelism: default_parallelism(),
            package_manager: None,
        }
    }
}

impl LinkOptions {
    /// Set the force flag.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Disable linking to sibling workspace projects.
    #[must_use]
    pub fn with_no_local_links(mut self, no_local_links: bool) -> Self {
        self.no_local_links = no_local_links;
        self
    }

    /// Force absolute symlink targets. The environment override still applies when `false`.
    #[must_use]
    pub fn with_absolute_symlinks(mut self, absolute: bool) -> Self {
        self.absolute_symlinks = absolute || absolute_symlinks_from_env();
        self
    }

    /// Set the worker count; zero falls back to the default.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = if parallelism == 0 {
            default_parallelism()
        } else {
            parallelism
        };
        self
    }

    /// Override the package manager flavour.
    #[must_use]
    pub fn with_package_manager(mut self, kind: PackageManagerKind) -> Self {
        self.package_manager = Some(kind);
        self
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

fn absolute_symlinks_from_env() -> bool {
    std::env::var(ABSOLUTE_SYMLINKS_ENV).is_ok_and(|v| v == "1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = Config::new(PathBuf::from("/repo"))
            .with_verbosity(2)
            .with_json_logs(true);
        assert_eq!(config.cwd, PathBuf::from("/repo"));
        assert_eq!(config.verbosity, 2);
        assert!(config.json_logs);
    }

    #[test]
    fn test_link_options_defaults() {
        let options = LinkOptions::default();
        assert!(!options.force);
        assert!(!options.no_local_links);
        assert!(options.parallelism >= 1);
        assert!(options.package_manager.is_none());
    }

    #[test]
    fn test_zero_parallelism_uses_default() {
        let options = LinkOptions::default().with_parallelism(0);
        assert!(options.parallelism >= 1);

        let options = LinkOptions::default().with_parallelism(3);
        assert_eq!(options.parallelism, 3);
    }

    #[test]
    fn test_package_manager_override() {
        let options = LinkOptions::default()
            .with_force(true)
            .with_package_manager(PackageManagerKind::Pnpm);
        assert!(options.force);
        assert_eq!(options.package_manager, Some(PackageManagerKind::Pnpm));
    }
}
