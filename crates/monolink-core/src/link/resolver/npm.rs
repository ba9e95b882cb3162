//! Resolver for npm-style shared installs.
//!
//! npm may install the same version of a package twice with different
//! secondary dependencies, so the private tree is rebuilt node by node with
//! nested-resolution semantics instead of linking only direct dependencies.

use super::{
    decide_local_link, temp_package_node, LinkContext, LocalDecision, ResolvedProject, Resolver,
};
use crate::error::LinkError;
use crate::link::package::{Dependency, DependencyKind, NodeId, PackageNode, PackageTree};
use crate::link::LinkWarning;
use crate::paths::NODE_MODULES;
use crate::semver_range::{parse_version, VersionRange};
use crate::workspace::WorkspaceProject;
use std::collections::{BTreeSet, HashSet, VecDeque};
use tracing::{debug, trace};

/// Full nearest-ancestor resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct NpmResolver;

struct WorkItem {
    /// Node in the shared tree whose dependencies are being linked.
    shared: NodeId,
    /// Matching node in the private tree.
    private: NodeId,
    /// Root of the cyclic subtree this branch belongs to, if any.
    cyclic_root: Option<NodeId>,
}

/// Mutable state of one project's walk.
struct ProjectWalk<'p> {
    project: &'p WorkspaceProject,
    tree: PackageTree,
    local_links: BTreeSet<String>,
    local_placeholders: HashSet<NodeId>,
    warnings: Vec<LinkWarning>,
}

impl Resolver for NpmResolver {
    fn name(&self) -> &'static str {
        "npm"
    }

    fn resolve_project(
        &self,
        ctx: &LinkContext<'_>,
        project: &WorkspaceProject,
    ) -> Result<ResolvedProject, LinkError> {
        let temp_id = temp_package_node(ctx, project)?;
        let temp = ctx.shared.get(temp_id);

        let root = PackageNode::new(
            project.package_name.clone(),
            temp.version.clone(),
            project.project_folder.clone(),
            temp.dependencies.clone(),
        );
        let mut walk = ProjectWalk {
            project,
            tree: PackageTree::new(root),
            local_links: BTreeSet::new(),
            local_placeholders: HashSet::new(),
            warnings: Vec::new(),
        };

        let mut queue = VecDeque::from([WorkItem {
            shared: temp_id,
            private: walk.tree.root(),
            cyclic_root: None,
        }]);

        while let Some(item) = queue.pop_front() {
            for dependency in &ctx.shared.get(item.shared).dependencies {
                if let Some(next) = walk.link_dependency(ctx, &item, dependency)? {
                    queue.push_back(next);
                }
            }
        }

        trace!(project = %project.package_name, tree = %walk.tree.render(), "resolved private tree");

        Ok(ResolvedProject {
            project: project.package_name.clone(),
            tree: walk.tree,
            local_links: walk.local_links,
            warnings: walk.warnings,
        })
    }
}

impl ProjectWalk<'_> {
    /// Link one dependency edge of `item`, returning a new work item if the
    /// created node's own dependencies still need linking.
    fn link_dependency(
        &mut self,
        ctx: &LinkContext<'_>,
        item: &WorkItem,
        dependency: &Dependency,
    ) -> Result<Option<WorkItem>, LinkError> {
        let root = self.tree.root();
        let package = self.tree.get(item.private).name.clone();

        let decision = decide_local_link(
            ctx,
            self.project,
            &package,
            dependency,
            item.private == root,
            item.cyclic_root.is_some(),
            &mut self.warnings,
        );
        let starting_cyclic = match decision {
            LocalDecision::Link(local) => {
                self.link_local(item.private, &package, dependency, local)?;
                if item.private == root {
                    self.local_links.insert(dependency.name.clone());
                }
                return Ok(None);
            }
            LocalDecision::StartCyclic => true,
            LocalDecision::Shared => false,
        };

        let Some(shared_dep) = ctx.shared.resolve(item.shared, &dependency.name) else {
            if dependency.kind == DependencyKind::Optional {
                let warning = LinkWarning::OptionalSkipped {
                    project: self.project.package_name.clone(),
                    package,
                    dependency: dependency.name.clone(),
                };
                warning.emit();
                self.warnings.push(warning);
                return Ok(None);
            }
            return Err(LinkError::MissingSharedDependency {
                project: self.project.package_name.clone(),
                package,
                dependency: dependency.name.clone(),
            });
        };
        let shared_node = ctx.shared.get(shared_dep);
        if out_of_range(&shared_node.version, &dependency.version_range) {
            // The nearest installed copy wins even when it misses the range
            self.warn_shadowed(
                &package,
                dependency,
                &dependency.version_range,
                shared_node.version.clone(),
            );
        }

        // Workspace packages inside a cyclic subtree stay below its root
        let climb_limit = item
            .cyclic_root
            .filter(|_| ctx.workspace.is_project(&dependency.name));
        let resolution = self
            .tree
            .resolve_or_create(item.private, &dependency.name, climb_limit);

        if let Some(found) = resolution.found {
            if self.tree.get(found).version == shared_node.version {
                return Ok(None);
            }
        }

        let Some(parent) = resolution.parent_for_create else {
            // An immediate child of a different version already occupies the slot
            let found = resolution
                .found
                .map(|id| self.tree.get(id).version.clone())
                .unwrap_or_default();
            self.warn_shadowed(&package, dependency, &shared_node.version, found);
            return Ok(None);
        };
        if self.local_placeholders.contains(&parent) {
            return Err(LinkError::invariant(format!(
                "cannot place {} under {}, which links to a workspace project",
                shared_node.name_and_version(),
                self.tree.get(parent).folder_path.display()
            )));
        }

        let target = ctx
            .index
            .lookup(&shared_node.name, &shared_node.version)
            .ok_or_else(|| {
                LinkError::invariant(format!(
                    "{} needed by \"{package}\" is not in the package index",
                    shared_node.name_and_version()
                ))
            })?;

        if let Some(found) = resolution.found {
            debug!(
                project = %self.project.package_name,
                dependency = %dependency.name,
                shadowed = %self.tree.get(found).version,
                nested = %shared_node.version,
                "placing nested copy to shadow a shallower version"
            );
        }

        let folder = self
            .tree
            .get(parent)
            .folder_path
            .join(NODE_MODULES)
            .join(&shared_node.name);
        let node = PackageNode::link(
            shared_node.name.clone(),
            shared_node.version.clone(),
            folder,
            shared_node.dependencies.clone(),
            ctx.shared.get(target).folder_path.clone(),
        );
        let created = self.tree.push_child(parent, node)?;

        let cyclic_root = if starting_cyclic {
            Some(created)
        } else {
            item.cyclic_root
        };
        Ok(Some(WorkItem {
            shared: shared_dep,
            private: created,
            cyclic_root,
        }))
    }

    /// Place a placeholder linking to a sibling project's own folder.
    ///
    /// The sibling's dependencies are already resolved inside its folder, so
    /// the placeholder has none and is never walked.
    fn link_local(
        &mut self,
        from: NodeId,
        package: &str,
        dependency: &Dependency,
        local: &WorkspaceProject,
    ) -> Result<(), LinkError> {
        let resolution = self.tree.resolve_or_create(from, &dependency.name, None);

        if let Some(found) = resolution.found {
            if self.tree.get(found).version == local.version {
                return Ok(());
            }
        }

        let Some(parent) = resolution.parent_for_create else {
            let found = resolution
                .found
                .map(|id| self.tree.get(id).version.clone())
                .unwrap_or_default();
            self.warn_shadowed(package, dependency, &local.version, found);
            return Ok(());
        };

        let folder = self
            .tree
            .get(parent)
            .folder_path
            .join(NODE_MODULES)
            .join(&dependency.name);
        let node = PackageNode::link(
            dependency.name.clone(),
            local.version.clone(),
            folder,
            Vec::new(),
            local.project_folder.clone(),
        );
        let created = self.tree.push_child(parent, node)?;
        self.local_placeholders.insert(created);
        Ok(())
    }

    fn warn_shadowed(&mut self, package: &str, dependency: &Dependency, wanted: &str, found: String) {
        let warning = LinkWarning::VersionShadowed {
            project: self.project.package_name.clone(),
            package: package.to_string(),
            dependency: dependency.name.clone(),
            wanted: wanted.to_string(),
            found,
        };
        warning.emit();
        self.warnings.push(warning);
    }
}

/// True if `range` is a semver range that `version` does not satisfy.
///
/// Tags, URLs and other non-semver specifiers are never out of range.
fn out_of_range(version: &str, range: &str) -> bool {
    match (parse_version(version), VersionRange::parse(range)) {
        (Ok(version), Ok(range)) => !range.matches(&version),
        _ => false,
    }
}
