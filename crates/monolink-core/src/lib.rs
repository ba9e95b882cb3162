#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod config;
pub mod error;
pub mod link;
pub mod paths;
pub mod semver_range;
pub mod version;
pub mod workspace;

pub use config::{Config, LinkOptions};
pub use error::{codes as error_codes, LinkError};
pub use link::{
    link_workspace, unlink_workspace, verify_workspace, DanglingLink, LinkManifest, LinkReport,
    LinkWarning, PackageManagerKind, ProjectReport,
};
pub use semver_range::version_satisfies;
pub use version::VERSION;
pub use workspace::{WorkspaceConfig, WorkspaceProject};
