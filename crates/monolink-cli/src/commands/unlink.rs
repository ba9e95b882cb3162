//! `monolink unlink` command implementation.

use super::{fail, load_workspace};
use miette::Result;
use monolink_core::{unlink_workspace, Config};

pub fn run(config: &Config, json: bool) -> Result<()> {
    let workspace = load_workspace(config, json)?;
    let removed = match unlink_workspace(&workspace) {
        Ok(r) => r,
        Err(e) => return fail(e, json),
    };

    if json {
        let removed: Vec<_> = removed.iter().map(|p| p.to_string_lossy()).collect();
        println!(
            "{}",
            serde_json::json!({
                "ok": true,
                "removed": removed,
            })
        );
    } else if removed.is_empty() {
        println!("Nothing to unlink.");
    } else {
        for path in &removed {
            println!("Removed {}", path.display());
        }
    }

    Ok(())
}
