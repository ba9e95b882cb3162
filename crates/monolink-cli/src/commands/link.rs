//! `monolink link` command implementation.

use super::{fail, load_workspace};
use miette::Result;
use monolink_core::{link_workspace, Config, LinkOptions, LinkReport};
use serde::Serialize;

#[derive(Serialize)]
struct LinkOutput<'a> {
    ok: bool,
    #[serde(flatten)]
    report: &'a LinkReport,
}

/// Run the link command.
pub fn run(config: &Config, options: &LinkOptions, json: bool) -> Result<()> {
    let workspace = load_workspace(config, json)?;
    let report = match link_workspace(&workspace, options) {
        Ok(r) => r,
        Err(e) => return fail(e, json),
    };

    if json {
        let output = LinkOutput {
            ok: true,
            report: &report,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string())
        );
        return Ok(());
    }

    if report.skipped {
        println!("Links are already up to date.");
        println!("hint: run with --force to relink");
        return Ok(());
    }

    println!(
        "Linked {} project(s) using the {} resolver",
        report.projects.len(),
        report.resolver
    );
    for project in &report.projects {
        print!("  {} ({} links", project.project, project.links);
        if !project.local_links.is_empty() {
            let local: Vec<&str> = project.local_links.iter().map(String::as_str).collect();
            print!(", local: {}", local.join(", "));
        }
        println!(")");
    }

    let warnings: Vec<_> = report.all_warnings().collect();
    if !warnings.is_empty() {
        println!();
        println!("{} warning(s):", warnings.len());
        for warning in warnings {
            println!("  - {warning}");
        }
    }
    println!();
    println!("Link manifest: {}", report.manifest_path.display());

    Ok(())
}
