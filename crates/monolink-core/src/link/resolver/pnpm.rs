//! Resolver for pnpm-style shared installs.
//!
//! pnpm keeps exactly one physical folder per package version, each with a
//! consistent set of secondary dependencies, so only a project's direct
//! dependencies need linking.

use super::{
    decide_local_link, temp_package_node, LinkContext, LocalDecision, ResolvedProject, Resolver,
};
use crate::error::LinkError;
use crate::link::package::{DependencyKind, PackageNode, PackageTree};
use crate::link::LinkWarning;
use crate::paths::NODE_MODULES;
use crate::workspace::WorkspaceProject;
use std::collections::BTreeSet;
use tracing::trace;

/// Direct-dependency resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct PnpmResolver;

impl Resolver for PnpmResolver {
    fn name(&self) -> &'static str {
        "pnpm"
    }

    fn resolve_project(
        &self,
        ctx: &LinkContext<'_>,
        project: &WorkspaceProject,
    ) -> Result<ResolvedProject, LinkError> {
        let temp_id = temp_package_node(ctx, project)?;
        let temp = ctx.shared.get(temp_id);
        let temp_name = project.temp_project_name();

        let mut tree = PackageTree::new(PackageNode::new(
            project.package_name.clone(),
            temp.version.clone(),
            project.project_folder.clone(),
            temp.dependencies.clone(),
        ));
        let root = tree.root();
        let project_node_modules = project.project_folder.join(NODE_MODULES);
        let mut local_links = BTreeSet::new();
        let mut warnings = Vec::new();

        for dependency in &temp.dependencies {
            if dependency.kind == DependencyKind::LocalLink
                && !ctx.options.no_local_links
                && !ctx.workspace.is_project(&dependency.name)
            {
                return Err(LinkError::UnknownWorkspaceDependency {
                    project: project.package_name.clone(),
                    dependency: dependency.name.clone(),
                });
            }

            let decision = decide_local_link(
                ctx,
                project,
                &project.package_name,
                dependency,
                true,
                false,
                &mut warnings,
            );
            if let LocalDecision::Link(local) = decision {
                tree.push_child(
                    root,
                    PackageNode::link(
                        dependency.name.clone(),
                        local.version.clone(),
                        project_node_modules.join(&dependency.name),
                        Vec::new(),
                        local.project_folder.clone(),
                    ),
                )?;
                local_links.insert(dependency.name.clone());
                continue;
            }

            // The temp package's own node_modules holds links into the store
            let Some(installed) = ctx.shared.resolve(temp_id, &dependency.name) else {
                if dependency.kind == DependencyKind::Optional {
                    let warning = LinkWarning::OptionalSkipped {
                        project: project.package_name.clone(),
                        package: project.package_name.clone(),
                        dependency: dependency.name.clone(),
                    };
                    warning.emit();
                    warnings.push(warning);
                    continue;
                }
                return Err(LinkError::MissingSharedDependency {
                    project: project.package_name.clone(),
                    package: project.package_name.clone(),
                    dependency: dependency.name.clone(),
                });
            };
            let installed = ctx.shared.get(installed);

            // Link to where the store link points, never to the link itself
            let real = dunce::canonicalize(&installed.folder_path).map_err(|e| {
                LinkError::io("failed to resolve installed package", &installed.folder_path, e)
            })?;

            if let Some(locked) = ctx.shrinkwrap.try_ensure_compatible_dependency(
                &dependency.name,
                &dependency.version_range,
                &temp_name,
            ) {
                if locked != installed.version {
                    let warning = LinkWarning::ShrinkwrapDrift {
                        project: project.package_name.clone(),
                        dependency: dependency.name.clone(),
                        locked,
                        installed: installed.version.clone(),
                    };
                    warning.emit();
                    warnings.push(warning);
                }
            }

            tree.push_child(
                root,
                PackageNode::link(
                    dependency.name.clone(),
                    installed.version.clone(),
                    project_node_modules.join(&dependency.name),
                    Vec::new(),
                    real,
                ),
            )?;
        }

        trace!(project = %project.package_name, tree = %tree.render(), "resolved private tree");

        Ok(ResolvedProject {
            project: project.package_name.clone(),
            tree,
            local_links,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkOptions;
    use crate::link::index::PackageIndex;
    use crate::link::package::Dependency;
    use crate::link::resolver::test_support::{project, Fixture};
    use crate::link::shrinkwrap::PnpmLockfile;
    use crate::workspace::WorkspaceConfig;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    /// A shared tree whose only package is the temp package of `app`, with
    /// `installed` packages present under its own node_modules.
    fn fixture(
        temp: &Path,
        deps: Vec<Dependency>,
        installed: &[(&str, &str)],
        projects: Vec<WorkspaceProject>,
    ) -> Fixture {
        let temp_folder = temp.join("node_modules").join("@monolink-temp").join("app");
        let mut shared = PackageTree::new(PackageNode::new("", "", temp, Vec::new()));
        let root = shared.root();
        let temp_id = shared
            .push_child(
                root,
                PackageNode::new("@monolink-temp/app", "0.0.0", &temp_folder, deps),
            )
            .unwrap();

        for (name, version) in installed {
            let store = temp.join("node_modules").join(".pnpm").join(format!("{name}@{version}"));
            fs::create_dir_all(&store).unwrap();
            let link = temp_folder.join("node_modules").join(name);
            fs::create_dir_all(link.parent().unwrap()).unwrap();
            #[cfg(unix)]
            std::os::unix::fs::symlink(&store, &link).unwrap();
            #[cfg(not(unix))]
            fs::create_dir_all(&link).unwrap();
            shared
                .push_child(temp_id, PackageNode::new(*name, *version, link, Vec::new()))
                .unwrap();
        }

        let index = PackageIndex::build(&shared);
        let workspace = WorkspaceConfig::new(temp.to_path_buf(), temp.to_path_buf(), projects).unwrap();
        Fixture {
            workspace,
            shared,
            index,
            options: LinkOptions::default(),
        }
    }

    #[test]
    fn test_direct_dependencies_link_to_store() {
        let dir = tempdir().unwrap();
        let temp = dunce::canonicalize(dir.path()).unwrap();
        let f = fixture(
            &temp,
            vec![Dependency::new("left-pad", "^1.0.0", DependencyKind::Normal)],
            &[("left-pad", "1.3.0")],
            vec![project("app", "1.0.0", &[])],
        );

        let resolved = PnpmResolver
            .resolve_project(&f.ctx(), f.workspace.project("app").unwrap())
            .unwrap();
        let tree = &resolved.tree;
        let pad = tree.child_by_name(tree.root(), "left-pad").unwrap();
        assert_eq!(tree.get(pad).version, "1.3.0");

        #[cfg(unix)]
        assert_eq!(
            tree.get(pad).symlink_target.as_deref(),
            Some(temp.join("node_modules/.pnpm/left-pad@1.3.0").as_path())
        );
        assert!(!tree.get(pad).has_children());
    }

    #[test]
    fn test_local_link_dependency_links_sibling() {
        let dir = tempdir().unwrap();
        let f = fixture(
            dir.path(),
            vec![Dependency::new("lib", "^1.0.0", DependencyKind::LocalLink)],
            &[],
            vec![project("app", "1.0.0", &[]), project("lib", "1.5.0", &[])],
        );

        let resolved = PnpmResolver
            .resolve_project(&f.ctx(), f.workspace.project("app").unwrap())
            .unwrap();
        let lib = resolved.tree.child_by_name(resolved.tree.root(), "lib").unwrap();
        assert_eq!(
            resolved.tree.get(lib).symlink_target.as_deref(),
            Some(Path::new("/repo/lib"))
        );
        assert!(resolved.local_links.contains("lib"));
    }

    #[test]
    fn test_unknown_workspace_dependency() {
        let dir = tempdir().unwrap();
        let f = fixture(
            dir.path(),
            vec![Dependency::new("ghost", "^1.0.0", DependencyKind::LocalLink)],
            &[],
            vec![project("app", "1.0.0", &[])],
        );

        let err = PnpmResolver
            .resolve_project(&f.ctx(), f.workspace.project("app").unwrap())
            .unwrap_err();
        assert!(matches!(err, LinkError::UnknownWorkspaceDependency { .. }));
    }

    #[test]
    fn test_missing_and_optional_dependencies() {
        let dir = tempdir().unwrap();
        let f = fixture(
            dir.path(),
            vec![Dependency::new("fsevents", "^2.0.0", DependencyKind::Optional)],
            &[],
            vec![project("app", "1.0.0", &[])],
        );
        let resolved = PnpmResolver
            .resolve_project(&f.ctx(), f.workspace.project("app").unwrap())
            .unwrap();
        assert_eq!(resolved.warnings.len(), 1);

        let f = fixture(
            dir.path(),
            vec![Dependency::new("react", "^18.0.0", DependencyKind::Normal)],
            &[],
            vec![project("app", "1.0.0", &[])],
        );
        let err = PnpmResolver
            .resolve_project(&f.ctx(), f.workspace.project("app").unwrap())
            .unwrap_err();
        assert_eq!(err.code(), crate::error::codes::LINK_MISSING_SHARED_DEPENDENCY);
    }

    #[test]
    fn test_lockfile_drift_is_reported() {
        let dir = tempdir().unwrap();
        let temp = dunce::canonicalize(dir.path()).unwrap();
        let f = fixture(
            &temp,
            vec![
                Dependency::new("left-pad", "^1.0.0", DependencyKind::Normal),
                Dependency::new("right-pad", "^1.0.0", DependencyKind::Normal),
            ],
            &[("left-pad", "1.3.0"), ("right-pad", "1.0.1")],
            vec![project("app", "1.0.0", &[])],
        );
        let lockfile = PnpmLockfile::parse(
            r#"
dependencies:
  '@monolink-temp/app': 'file:projects/app.tgz'
packages:
  file:projects/app.tgz:
    dependencies:
      left-pad: 1.2.0
      right-pad: 1.0.1
"#,
            Path::new("pnpm-lock.yaml"),
        )
        .unwrap();

        let resolved = PnpmResolver
            .resolve_project(&f.ctx_with(&lockfile), f.workspace.project("app").unwrap())
            .unwrap();
        assert_eq!(
            resolved.warnings,
            vec![LinkWarning::ShrinkwrapDrift {
                project: "app".to_string(),
                dependency: "left-pad".to_string(),
                locked: "1.2.0".to_string(),
                installed: "1.3.0".to_string(),
            }]
        );
        // The installed copy is linked regardless
        let pad = resolved.tree.child_by_name(resolved.tree.root(), "left-pad").unwrap();
        assert_eq!(resolved.tree.get(pad).version, "1.3.0");
    }
}
