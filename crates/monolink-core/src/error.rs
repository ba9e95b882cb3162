use std::path::PathBuf;
use thiserror::Error;

/// Stable error codes, one per [`LinkError`] variant.
pub mod codes {
    pub const LINK_MISSING_SHARED_DEPENDENCY: &str = "LINK_MISSING_SHARED_DEPENDENCY";
    pub const LINK_CYCLIC_CONFIG_AMBIGUOUS: &str = "LINK_CYCLIC_CONFIG_AMBIGUOUS";
    pub const LINK_UNKNOWN_WORKSPACE_DEPENDENCY: &str = "LINK_UNKNOWN_WORKSPACE_DEPENDENCY";
    pub const LINK_TEMP_PROJECT_MISSING: &str = "LINK_TEMP_PROJECT_MISSING";
    pub const LINK_DUPLICATE_CHILD: &str = "LINK_DUPLICATE_CHILD";
    pub const LINK_ALREADY_HAS_PARENT: &str = "LINK_ALREADY_HAS_PARENT";
    pub const LINK_PROGRAM_INVARIANT: &str = "LINK_PROGRAM_INVARIANT";
    pub const LINK_MANIFEST_READ: &str = "LINK_MANIFEST_READ";
    pub const LINK_MANIFEST_PARSE: &str = "LINK_MANIFEST_PARSE";
    pub const LINK_LOCKFILE_PARSE: &str = "LINK_LOCKFILE_PARSE";
    pub const LINK_CONFIG_READ: &str = "LINK_CONFIG_READ";
    pub const LINK_CONFIG_PARSE: &str = "LINK_CONFIG_PARSE";
    pub const LINK_CONFIG_INVALID: &str = "LINK_CONFIG_INVALID";
    pub const LINK_WORKSPACE_NOT_FOUND: &str = "LINK_WORKSPACE_NOT_FOUND";
    pub const LINK_IO_ERROR: &str = "LINK_IO_ERROR";
    pub const LINK_THREAD_POOL: &str = "LINK_THREAD_POOL";
}

/// Error type for workspace linking.
///
/// Configuration errors and program invariants abort the whole run. Every
/// variant carries enough project, dependency, or path context to diagnose
/// the failure without re-running in verbose mode.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error(
        "the dependency \"{dependency}\" needed by \"{package}\" (project {project}) was not found \
         in the shared install -- does the shared install need to be refreshed?"
    )]
    MissingSharedDependency {
        project: String,
        package: String,
        dependency: String,
    },

    #[error("project \"{project}\" lists itself in cyclicDependencyProjects")]
    AmbiguousCyclicConfiguration { project: String },

    #[error("project \"{project}\" depends on \"{dependency}\", which is not a workspace project")]
    UnknownWorkspaceDependency { project: String, dependency: String },

    #[error(
        "unable to find an installed or packed copy of {temp_name} for project \"{project}\" \
         (looked in {searched})"
    )]
    TempProjectMissing {
        project: String,
        temp_name: String,
        searched: String,
    },

    #[error("\"{parent}\" already has a child named \"{child}\"")]
    DuplicateChild { parent: String, child: String },

    #[error("\"{child}\" already has a parent")]
    AlreadyHasParent { child: String },

    #[error("program invariant violated: {0}")]
    ProgramInvariant(String),

    #[error("failed to read package manifest {path}: {source}")]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse package manifest {path}: {source}")]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse lockfile {path}: {source}")]
    LockfileParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to read workspace config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse workspace config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid workspace config: {0}")]
    ConfigInvalid(String),

    #[error("no {file} found in {start} or any parent folder")]
    WorkspaceNotFound { start: PathBuf, file: &'static str },

    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start link workers: {0}")]
    ThreadPool(String),
}

impl LinkError {
    /// Build an [`LinkError::Io`] with the path that failed.
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// Build a [`LinkError::ProgramInvariant`].
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::ProgramInvariant(msg.into())
    }

    /// Get the stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingSharedDependency { .. } => codes::LINK_MISSING_SHARED_DEPENDENCY,
            Self::AmbiguousCyclicConfiguration { .. } => codes::LINK_CYCLIC_CONFIG_AMBIGUOUS,
            Self::UnknownWorkspaceDependency { .. } => codes::LINK_UNKNOWN_WORKSPACE_DEPENDENCY,
            Self::TempProjectMissing { .. } => codes::LINK_TEMP_PROJECT_MISSING,
            Self::DuplicateChild { .. } => codes::LINK_DUPLICATE_CHILD,
            Self::AlreadyHasParent { .. } => codes::LINK_ALREADY_HAS_PARENT,
            Self::ProgramInvariant(_) => codes::LINK_PROGRAM_INVARIANT,
            Self::ManifestRead { .. } => codes::LINK_MANIFEST_READ,
            Self::ManifestParse { .. } => codes::LINK_MANIFEST_PARSE,
            Self::LockfileParse { .. } => codes::LINK_LOCKFILE_PARSE,
            Self::ConfigRead { .. } => codes::LINK_CONFIG_READ,
            Self::ConfigParse { .. } => codes::LINK_CONFIG_PARSE,
            Self::ConfigInvalid(_) => codes::LINK_CONFIG_INVALID,
            Self::WorkspaceNotFound { .. } => codes::LINK_WORKSPACE_NOT_FOUND,
            Self::Io { .. } => codes::LINK_IO_ERROR,
            Self::ThreadPool(_) => codes::LINK_THREAD_POOL,
        }
    }

    /// True for errors caused by user configuration rather than a bug or the environment.
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::MissingSharedDependency { .. }
                | Self::AmbiguousCyclicConfiguration { .. }
                | Self::UnknownWorkspaceDependency { .. }
                | Self::TempProjectMissing { .. }
                | Self::ConfigInvalid(_)
        )
    }
}
