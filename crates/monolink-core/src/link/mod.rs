//! Workspace linking.
//!
//! One run loads the shared install, resolves a private link tree for every
//! workspace project, materializes those trees as real folders and links,
//! and records project-to-project links in the [`LinkManifest`].
//!
//! The shared tree, [`index::PackageIndex`] and shrinkwrap are built once
//! and read-only afterwards. Each project's link root is disjoint from every
//! other, so projects are resolved and materialized on a worker pool and
//! their results merged once all of them succeed.

pub mod index;
pub mod manifest;
pub mod materialize;
pub mod package;
pub mod resolver;
pub mod shared_tree;
pub mod shrinkwrap;

pub use crate::workspace::PackageManagerKind;
pub use manifest::LinkManifest;

use crate::config::LinkOptions;
use crate::error::LinkError;
use crate::paths::{self, PNPM_LOCKFILE, SHRINKWRAP_FILE};
use crate::workspace::{WorkspaceConfig, WorkspaceProject};
use index::PackageIndex;
use materialize::LinkMaterializer;
use rayon::prelude::*;
use resolver::{resolver_for, LinkContext, Resolver};
use serde::Serialize;
use shrinkwrap::{NoShrinkwrap, PnpmLockfile, ShrinkwrapFile, ShrinkwrapQuery};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A recoverable condition observed while linking.
///
/// Every warning is logged when it is raised and also returned in the
/// [`LinkReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkWarning {
    /// An optional dependency has no copy in the shared install.
    OptionalSkipped {
        project: String,
        package: String,
        dependency: String,
    },
    /// A sibling project's version does not satisfy the requested range, so
    /// the shared copy is used instead.
    IncompatibleLocalVersion {
        project: String,
        package: String,
        dependency: String,
        range: String,
        local_version: String,
        shrinkwrap_compatible: bool,
    },
    /// A shallower copy of a different version occupies the slot the
    /// dependency would need.
    VersionShadowed {
        project: String,
        package: String,
        dependency: String,
        wanted: String,
        found: String,
    },
    /// The installed version differs from the one the lockfile chose.
    ShrinkwrapDrift {
        project: String,
        dependency: String,
        locked: String,
        installed: String,
    },
    /// `cyclicDependencyProjects` names something that is not a project.
    UnknownCyclicProject { project: String, cyclic: String },
}

impl LinkWarning {
    /// Log the warning. Version shadowing is expected hoisting behavior and
    /// only shows up at debug level.
    pub fn emit(&self) {
        match self {
            Self::VersionShadowed { .. } => debug!("{self}"),
            _ => warn!("{self}"),
        }
    }
}

impl fmt::Display for LinkWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OptionalSkipped {
                project,
                package,
                dependency,
            } => write!(
                f,
                "optional dependency \"{dependency}\" of \"{package}\" (project {project}) is not \
                 installed; skipping"
            ),
            Self::IncompatibleLocalVersion {
                project,
                package,
                dependency,
                range,
                local_version,
                shrinkwrap_compatible,
            } => {
                write!(
                    f,
                    "\"{package}\" (project {project}) requires {dependency}@\"{range}\", but the \
                     local version is {local_version}; linking the shared copy instead"
                )?;
                if !shrinkwrap_compatible {
                    write!(f, " (the shrinkwrap has no compatible version either)")?;
                }
                Ok(())
            }
            Self::VersionShadowed {
                project,
                package,
                dependency,
                wanted,
                found,
            } => write!(
                f,
                "\"{package}\" (project {project}) needs {dependency}@{wanted}, but {found} is \
                 already visible and shadows it"
            ),
            Self::ShrinkwrapDrift {
                project,
                dependency,
                locked,
                installed,
            } => write!(
                f,
                "{dependency} is locked at {locked} but {installed} is installed (project \
                 {project}); the shared install may be stale"
            ),
            Self::UnknownCyclicProject { project, cyclic } => write!(
                f,
                "project \"{project}\" lists \"{cyclic}\" in cyclicDependencyProjects, which is \
                 not a workspace project"
            ),
        }
    }
}

/// Outcome of linking one project.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectReport {
    pub project: String,
    /// Links created under the project's `node_modules`.
    pub links: usize,
    /// Sibling projects linked directly.
    pub local_links: BTreeSet<String>,
    pub warnings: Vec<LinkWarning>,
}

/// Outcome of a `link` run.
#[derive(Debug, Clone, Serialize)]
pub struct LinkReport {
    /// True when an existing manifest made the run a no-op.
    pub skipped: bool,
    /// Name of the resolver used.
    pub resolver: &'static str,
    pub projects: Vec<ProjectReport>,
    /// Workspace-level warnings not tied to one project's resolution.
    pub warnings: Vec<LinkWarning>,
    pub manifest_path: PathBuf,
}

impl LinkReport {
    /// Every warning of the run, workspace-level first.
    pub fn all_warnings(&self) -> impl Iterator<Item = &LinkWarning> {
        self.warnings
            .iter()
            .chain(self.projects.iter().flat_map(|p| p.warnings.iter()))
    }
}

/// Link every project of `workspace`.
///
/// Unless `options.force` is set, a manifest left by a previous successful
/// run means the links are current and nothing is done. Otherwise the
/// manifest is deleted first, so an interrupted run forces a full relink
/// next time, and written again only after every project succeeded.
pub fn link_workspace(
    workspace: &WorkspaceConfig,
    options: &LinkOptions,
) -> Result<LinkReport, LinkError> {
    let manifest_path = paths::link_manifest_path(&workspace.common_temp_folder);
    let kind = options.package_manager.unwrap_or(workspace.package_manager);
    let resolver = resolver_for(kind);

    if !options.force && manifest_path.is_file() {
        info!(
            manifest = %manifest_path.display(),
            "links are up to date; use --force to relink"
        );
        return Ok(LinkReport {
            skipped: true,
            resolver: resolver.name(),
            projects: Vec::new(),
            warnings: Vec::new(),
            manifest_path,
        });
    }
    LinkManifest::delete(&manifest_path)?;

    let warnings = workspace.validate_cyclic()?;
    for warning in &warnings {
        warning.emit();
    }

    let mut shared = shared_tree::load_shared_tree(&workspace.common_temp_folder)?;
    let synthesized = shared_tree::add_virtual_temp_packages(&mut shared, workspace)?;
    if !synthesized.is_empty() {
        debug!(packages = ?synthesized, "synthesized virtual temp packages");
    }
    let index = PackageIndex::build(&shared);
    debug!(nodes = shared.len(), indexed = index.len(), "loaded shared install");

    let shrinkwrap = load_lockfile(&workspace.common_temp_folder, kind)?;

    let ctx = LinkContext {
        workspace,
        shared: &shared,
        index: &index,
        shrinkwrap: shrinkwrap.as_ref(),
        options,
    };
    let materializer = LinkMaterializer::new(options.absolute_symlinks);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.parallelism.max(1))
        .build()
        .map_err(|e| LinkError::ThreadPool(e.to_string()))?;

    info!(
        projects = workspace.projects.len(),
        resolver = resolver.name(),
        jobs = options.parallelism,
        "linking workspace projects"
    );

    let projects: Vec<ProjectReport> = pool.install(|| {
        workspace
            .projects
            .par_iter()
            .map(|project| link_project(&ctx, resolver.as_ref(), &materializer, project))
            .collect::<Result<Vec<_>, _>>()
    })?;

    let mut manifest = LinkManifest::new();
    for report in &projects {
        manifest.extend_project(&report.project, &report.local_links);
    }
    manifest.save(&manifest_path)?;
    info!(manifest = %manifest_path.display(), "linking finished");

    Ok(LinkReport {
        skipped: false,
        resolver: resolver.name(),
        projects,
        warnings,
        manifest_path,
    })
}

/// The committed lockfile for `kind`, or [`NoShrinkwrap`] when there is none.
fn load_lockfile(
    common_temp_folder: &Path,
    kind: PackageManagerKind,
) -> Result<Box<dyn ShrinkwrapQuery>, LinkError> {
    let loaded: Option<Box<dyn ShrinkwrapQuery>> = match kind {
        PackageManagerKind::Npm => {
            ShrinkwrapFile::load(&common_temp_folder.join(SHRINKWRAP_FILE))?
                .map(|file| Box::new(file) as Box<dyn ShrinkwrapQuery>)
        }
        PackageManagerKind::Pnpm => {
            PnpmLockfile::load(&common_temp_folder.join(PNPM_LOCKFILE))?
                .map(|file| Box::new(file) as Box<dyn ShrinkwrapQuery>)
        }
    };
    Ok(loaded.unwrap_or_else(|| {
        debug!(package_manager = %kind, "no lockfile found");
        Box::new(NoShrinkwrap)
    }))
}

fn link_project(
    ctx: &LinkContext<'_>,
    resolver: &dyn Resolver,
    materializer: &LinkMaterializer,
    project: &WorkspaceProject,
) -> Result<ProjectReport, LinkError> {
    let resolved = resolver.resolve_project(ctx, project)?;
    let stats = materializer.relink_project(&resolved.tree)?;
    let bin = materializer.link_bin_folder(&ctx.workspace.common_temp_folder, &resolved.tree)?;

    let links = stats.links + usize::from(bin);
    info!(
        project = %project.package_name,
        links,
        local = resolved.local_links.len(),
        "linked project"
    );

    Ok(ProjectReport {
        project: resolved.project,
        links,
        local_links: resolved.local_links,
        warnings: resolved.warnings,
    })
}

/// Delete every project's link root and the link manifest.
///
/// Returns the link roots that existed and were removed.
pub fn unlink_workspace(workspace: &WorkspaceConfig) -> Result<Vec<PathBuf>, LinkError> {
    let mut removed = Vec::new();
    for project in &workspace.projects {
        let link_root = project.node_modules();
        if !monolink_util::fs::path_occupied(&link_root) {
            continue;
        }
        info!(path = %link_root.display(), "deleting link root");
        monolink_util::retry::remove_path_with_retry(&link_root)
            .map_err(|e| LinkError::io("failed to delete", &link_root, e))?;
        removed.push(link_root);
    }

    LinkManifest::delete(&paths::link_manifest_path(&workspace.common_temp_folder))?;
    Ok(removed)
}

/// A link whose target does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DanglingLink {
    pub link: PathBuf,
    /// Raw link contents, when readable.
    pub target: Option<PathBuf>,
}

/// Walk every project's link root, without following links, and report
/// each link whose target is missing.
pub fn verify_workspace(workspace: &WorkspaceConfig) -> Result<Vec<DanglingLink>, LinkError> {
    let mut dangling = Vec::new();

    for project in &workspace.projects {
        let link_root = project.node_modules();
        if !link_root.is_dir() {
            continue;
        }

        for entry in WalkDir::new(&link_root).follow_links(false) {
            let entry = entry.map_err(|e| {
                let path = e.path().map_or_else(|| link_root.clone(), PathBuf::from);
                LinkError::io("failed to walk", path, e.into())
            })?;
            if !entry.path_is_symlink() || entry.path().exists() {
                continue;
            }
            dangling.push(DanglingLink {
                link: entry.path().to_path_buf(),
                target: std::fs::read_link(entry.path()).ok(),
            });
        }
    }

    dangling.sort_by(|a, b| a.link.cmp(&b.link));
    Ok(dangling)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_serializes_with_kind_tag() {
        let warning = LinkWarning::OptionalSkipped {
            project: "app".into(),
            package: "app".into(),
            dependency: "fsevents".into(),
        };
        let value = serde_json::to_value(&warning).unwrap();
        assert_eq!(value["kind"], "optional_skipped");
        assert_eq!(value["dependency"], "fsevents");
    }

    #[test]
    fn test_incompatible_warning_mentions_shrinkwrap() {
        let mut warning = LinkWarning::IncompatibleLocalVersion {
            project: "app".into(),
            package: "app".into(),
            dependency: "lib".into(),
            range: "^1.0.0".into(),
            local_version: "2.0.0".into(),
            shrinkwrap_compatible: false,
        };
        assert!(warning.to_string().contains("shrinkwrap"));

        if let LinkWarning::IncompatibleLocalVersion {
            shrinkwrap_compatible,
            ..
        } = &mut warning
        {
            *shrinkwrap_compatible = true;
        }
        assert!(!warning.to_string().contains("shrinkwrap"));
        assert!(warning.to_string().contains("2.0.0"));
    }

    #[test]
    fn test_all_warnings_order() {
        let report = LinkReport {
            skipped: false,
            resolver: "npm",
            projects: vec![ProjectReport {
                project: "app".into(),
                links: 0,
                local_links: BTreeSet::new(),
                warnings: vec![LinkWarning::ShrinkwrapDrift {
                    project: "app".into(),
                    dependency: "x".into(),
                    locked: "1.0.0".into(),
                    installed: "1.0.1".into(),
                }],
            }],
            warnings: vec![LinkWarning::UnknownCyclicProject {
                project: "app".into(),
                cyclic: "ghost".into(),
            }],
            manifest_path: PathBuf::from("link-manifest.json"),
        };

        let kinds: Vec<_> = report
            .all_warnings()
            .map(|w| serde_json::to_value(w).unwrap()["kind"].clone())
            .collect();
        assert_eq!(kinds, ["unknown_cyclic_project", "shrinkwrap_drift"]);
    }
}
