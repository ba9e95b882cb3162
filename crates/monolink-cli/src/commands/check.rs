//! `monolink check` command implementation.
//!
//! Exits non-zero when any project has a dangling link, which usually means
//! the shared install changed since the last `monolink link`.

use super::{fail, load_workspace};
use miette::{MietteDiagnostic, Report, Result};
use monolink_core::{verify_workspace, Config};

pub fn run(config: &Config, json: bool) -> Result<()> {
    let workspace = load_workspace(config, json)?;
    let dangling = match verify_workspace(&workspace) {
        Ok(d) => d,
        Err(e) => return fail(e, json),
    };

    if json {
        println!(
            "{}",
            serde_json::json!({
                "ok": dangling.is_empty(),
                "projects": workspace.projects.len(),
                "dangling": dangling,
            })
        );
        if !dangling.is_empty() {
            std::process::exit(1);
        }
        return Ok(());
    }

    if dangling.is_empty() {
        println!(
            "No dangling links in {} project(s).",
            workspace.projects.len()
        );
        return Ok(());
    }

    for link in &dangling {
        match &link.target {
            Some(target) => println!("{} -> {}", link.link.display(), target.display()),
            None => println!("{}", link.link.display()),
        }
    }
    Err(Report::new(
        MietteDiagnostic::new(format!("{} dangling link(s) found", dangling.len()))
            .with_code("LINK_DANGLING")
            .with_help("run `monolink link --force` to rebuild the links"),
    ))
}
