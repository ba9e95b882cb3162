pub mod check;
pub mod link;
pub mod unlink;
pub mod version;

use miette::{MietteDiagnostic, Report, Result};
use monolink_core::{Config, LinkError, WorkspaceConfig};

/// Load the workspace around the configured working directory.
pub fn load_workspace(config: &Config, json: bool) -> Result<WorkspaceConfig> {
    WorkspaceConfig::discover(&config.cwd).or_else(|e| fail(e, json))
}

/// Report a fatal error.
///
/// In JSON mode the error object is printed to stdout and the process exits
/// with status 1; otherwise it becomes a diagnostic for `main` to render.
pub fn fail<T>(err: LinkError, json: bool) -> Result<T> {
    if json {
        println!(
            "{}",
            serde_json::json!({
                "ok": false,
                "error": {
                    "code": err.code(),
                    "message": err.to_string(),
                }
            })
        );
        std::process::exit(1);
    }

    let mut diagnostic = MietteDiagnostic::new(err.to_string()).with_code(err.code());
    if err.is_configuration_error() {
        diagnostic = diagnostic
            .with_help("check monolink.json and make sure the shared install is up to date");
    }
    Err(Report::new(diagnostic))
}
