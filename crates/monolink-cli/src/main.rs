#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod logging;

use clap::Parser;
use monolink_core::{Config, LinkOptions, PackageManagerKind};
use miette::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "monolink")]
#[command(author, version, about = "Link monorepo workspace projects against a shared install", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Create node_modules links for every workspace project
    Link {
        /// Relink even if the links are already up to date
        #[arg(long)]
        force: bool,

        /// Resolve every dependency from the shared install, never a sibling project
        #[arg(long)]
        no_local_links: bool,

        /// Number of projects to link concurrently (default: available CPUs)
        #[arg(long, short = 'j', value_name = "N")]
        jobs: Option<usize>,

        /// Use absolute symlink targets
        #[arg(long)]
        absolute_symlinks: bool,

        /// Override the package manager from monolink.json
        #[arg(long, value_name = "NAME", value_parser = ["npm", "pnpm"])]
        package_manager: Option<String>,
    },

    /// Delete every project's node_modules and the link manifest
    Unlink,

    /// Report links whose targets no longer exist
    Check,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let config = Config::new(cwd.clone())
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json);

    logging::init(config.verbosity, config.json_logs);

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(cli.json),
        Some(Commands::Link {
            force,
            no_local_links,
            jobs,
            absolute_symlinks,
            package_manager,
        }) => {
            let span = tracing::info_span!("link", cmd = "link", cwd = %cwd.display());
            let _guard = span.enter();

            let mut options = LinkOptions::default()
                .with_force(force)
                .with_no_local_links(no_local_links)
                .with_absolute_symlinks(absolute_symlinks)
                .with_parallelism(jobs.unwrap_or(0));
            match package_manager.as_deref() {
                Some("pnpm") => options = options.with_package_manager(PackageManagerKind::Pnpm),
                Some("npm") => options = options.with_package_manager(PackageManagerKind::Npm),
                _ => {}
            }
            commands::link::run(&config, &options, cli.json)
        }
        Some(Commands::Unlink) => {
            let span = tracing::info_span!("unlink", cmd = "unlink", cwd = %cwd.display());
            let _guard = span.enter();
            commands::unlink::run(&config, cli.json)
        }
        Some(Commands::Check) => {
            let span = tracing::info_span!("check", cmd = "check", cwd = %cwd.display());
            let _guard = span.enter();
            commands::check::run(&config, cli.json)
        }
    }
}
