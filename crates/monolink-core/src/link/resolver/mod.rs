//! Per-project resolution of a private link tree.
//!
//! A [`Resolver`] turns one workspace project plus the shared install into a
//! [`ResolvedProject`]: a tree of link placeholders ready for the
//! materializer. The implementation is chosen by [`PackageManagerKind`],
//! because installers shape the shared tree differently.

mod npm;
mod pnpm;

pub use npm::NpmResolver;
pub use pnpm::PnpmResolver;

use super::index::PackageIndex;
use super::package::{Dependency, DependencyKind, PackageTree};
use super::shrinkwrap::ShrinkwrapQuery;
use super::LinkWarning;
use crate::config::LinkOptions;
use crate::error::LinkError;
use crate::semver_range::version_satisfies;
use crate::workspace::{PackageManagerKind, WorkspaceConfig, WorkspaceProject};
use std::collections::BTreeSet;

/// Read-only state shared by every resolver worker for one run.
#[derive(Debug, Clone, Copy)]
pub struct LinkContext<'a> {
    pub workspace: &'a WorkspaceConfig,
    pub shared: &'a PackageTree,
    pub index: &'a PackageIndex,
    pub shrinkwrap: &'a dyn ShrinkwrapQuery,
    pub options: &'a LinkOptions,
}

/// Output of resolving one project.
#[derive(Debug)]
pub struct ResolvedProject {
    /// Package name of the project.
    pub project: String,
    /// Private tree rooted at the project folder.
    pub tree: PackageTree,
    /// Sibling projects linked directly from the project's own `node_modules`.
    pub local_links: BTreeSet<String>,
    pub warnings: Vec<LinkWarning>,
}

/// Resolution strategy for one installer flavour.
pub trait Resolver: Send + Sync {
    fn name(&self) -> &'static str;

    fn resolve_project(
        &self,
        ctx: &LinkContext<'_>,
        project: &WorkspaceProject,
    ) -> Result<ResolvedProject, LinkError>;
}

/// Select the resolver for an installer flavour.
#[must_use]
pub fn resolver_for(kind: PackageManagerKind) -> Box<dyn Resolver> {
    match kind {
        PackageManagerKind::Npm => Box::new(NpmResolver),
        PackageManagerKind::Pnpm => Box::new(PnpmResolver),
    }
}

/// Outcome of the workspace-project check for one dependency edge.
#[derive(Debug, Clone, Copy)]
pub(crate) enum LocalDecision<'a> {
    /// Link to the sibling project's own folder.
    Link(&'a WorkspaceProject),
    /// Resolve from the shared tree and isolate the result in a new cyclic subtree.
    StartCyclic,
    /// Resolve from the shared tree.
    Shared,
}

/// Decide whether `dependency` of `package` binds to a sibling project.
///
/// `at_top_level` is true when the dependency is declared by the project
/// itself. Such edges, when the installer already recorded them as local
/// links, link to the sibling regardless of its version so local development
/// always runs against the newest local code.
pub(crate) fn decide_local_link<'a>(
    ctx: &LinkContext<'a>,
    project: &WorkspaceProject,
    package: &str,
    dependency: &Dependency,
    at_top_level: bool,
    in_cyclic_subtree: bool,
    warnings: &mut Vec<LinkWarning>,
) -> LocalDecision<'a> {
    if ctx.options.no_local_links {
        return LocalDecision::Shared;
    }
    let Some(local) = ctx.workspace.project(&dependency.name) else {
        return LocalDecision::Shared;
    };

    if in_cyclic_subtree {
        return LocalDecision::Shared;
    }
    if project.cyclic_dependency_projects.contains(&dependency.name) {
        return LocalDecision::StartCyclic;
    }

    let immediate = at_top_level && dependency.kind == DependencyKind::LocalLink;
    if !immediate && !version_satisfies(&local.version, &dependency.version_range) {
        let warning = LinkWarning::IncompatibleLocalVersion {
            project: project.package_name.clone(),
            package: package.to_string(),
            dependency: dependency.name.clone(),
            range: dependency.version_range.clone(),
            local_version: local.version.clone(),
            shrinkwrap_compatible: ctx
                .shrinkwrap
                .has_compatible_top_level_dependency(&dependency.name, &dependency.version_range),
        };
        warning.emit();
        warnings.push(warning);
        return LocalDecision::Shared;
    }

    LocalDecision::Link(local)
}

/// The shared-tree node for a project's temp package.
pub(crate) fn temp_package_node(
    ctx: &LinkContext<'_>,
    project: &WorkspaceProject,
) -> Result<super::package::NodeId, LinkError> {
    let temp_name = project.temp_project_name();
    ctx.shared
        .child_by_name(ctx.shared.root(), &temp_name)
        .ok_or_else(|| {
            LinkError::invariant(format!(
                "{temp_name} for project \"{}\" is missing from the shared tree",
                project.package_name
            ))
        })
}
