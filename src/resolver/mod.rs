// src/resolver/mod.rs

//! Dependency tree construction
//!
//! A [`DependencyTree`] starts from a root package and its declared edges,
//! negotiates every edge that applies to the tree's platform, reads the
//! resolved package's own descriptor and recurses. The build is fail-fast:
//! the first missing package, conflict or cycle aborts it and leaves the
//! tree empty.
//!
//! The first resolution of a package name wins. A later edge on the same
//! name shares that resolution when its range admits the selected version
//! and is reported as [`Conflict::ConflictingConstraints`] when it does not.

mod conflict;
mod info;

pub use conflict::Conflict;
pub use self::info::{
    DEPENDENCIES_INFO_FILE, DependencyInfo, format_dependencies, retrieve_dependencies,
};

use crate::context::ResolutionContext;
use crate::error::{Error, Result};
use crate::package::{DependencyEdge, PackageDescriptor, PackageIdentity, PackageState, Tier};
use crate::version::ComparableVersion;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A package resolved to a concrete version and location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInstance {
    pub identity: PackageIdentity,
    pub version: ComparableVersion,
    /// Where the package's contents are available
    pub location: PathBuf,
}

/// A dependency edge together with its resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyInstance {
    pub edge: DependencyEdge,
    pub package: PackageInstance,
    /// Edges the resolved package declared when it was resolved
    pub declared: Vec<DependencyEdge>,
    pub dependencies: Vec<DependencyInstance>,
    /// Reuses a resolution made elsewhere in the tree; has no children
    pub shared: bool,
}

/// Resolved dependencies of one root package on one platform
#[derive(Debug, Clone)]
pub struct DependencyTree {
    root: PackageInstance,
    edges: Vec<DependencyEdge>,
    dependencies: Vec<DependencyInstance>,
    built: bool,
}

impl DependencyTree {
    pub fn new(root: PackageInstance, edges: Vec<DependencyEdge>) -> Self {
        Self {
            root,
            edges,
            dependencies: Vec::new(),
            built: false,
        }
    }

    /// Tree for a package whose descriptor has already been read
    pub fn from_descriptor(
        descriptor: &PackageDescriptor,
        platform: &str,
        branch: &str,
        location: impl Into<PathBuf>,
    ) -> Self {
        let root = PackageInstance {
            identity: PackageIdentity::new(
                descriptor.name.clone(),
                descriptor.group.clone(),
                branch,
                platform,
            ),
            version: descriptor
                .version_for(platform, branch)
                .cloned()
                .unwrap_or_default(),
            location: location.into(),
        };
        Self::new(root, descriptor.dependencies.clone())
    }

    pub fn root(&self) -> &PackageInstance {
        &self.root
    }

    pub fn platform(&self) -> &str {
        &self.root.identity.platform
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn dependencies(&self) -> &[DependencyInstance] {
        &self.dependencies
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Resolve every applicable edge, recursively
    pub fn build(&mut self, ctx: &ResolutionContext) -> Result<()> {
        self.dependencies.clear();
        self.built = false;

        let mut builder = TreeBuilder {
            ctx,
            platform: self.root.identity.platform.clone(),
            path: vec![self.root.identity.name.clone()],
            selected: HashMap::new(),
        };
        let dependencies = builder.resolve(&self.root.identity.name, &self.edges)?;

        info!(
            "Resolved {} packages for {} on {}",
            builder.selected.len(),
            self.root.identity.name,
            self.root.identity.platform
        );
        self.dependencies = dependencies;
        self.built = true;
        Ok(())
    }

    /// Whether the resolved tree no longer matches what packages declare
    pub fn needs_rebuild(&self, ctx: &ResolutionContext) -> Result<bool> {
        if !self.built {
            return Ok(true);
        }
        stale_nodes(ctx, &self.dependencies)
    }

    /// Build if needed; returns whether a build happened
    ///
    /// The root's own descriptor is re-read from its location first, so
    /// edits to the root's dependency list are picked up.
    pub fn compile(&mut self, ctx: &ResolutionContext) -> Result<bool> {
        if let Some(descriptor) = ctx
            .descriptors()
            .load(&self.root.identity, &self.root.location)?
        {
            if descriptor.dependencies != self.edges {
                debug!("Dependencies of {} changed", self.root.identity.name);
                self.edges = descriptor.dependencies;
                self.built = false;
            }
        }

        if !self.needs_rebuild(ctx)? {
            debug!("Dependency tree of {} is current", self.root.identity.name);
            return Ok(false);
        }
        self.build(ctx)?;
        Ok(true)
    }

    /// Every resolved package once, dependencies before dependents
    pub fn all_packages(&self) -> Vec<PackageInstance> {
        let mut seen = HashSet::new();
        let mut packages = Vec::new();
        collect_post_order(&self.dependencies, &mut seen, &mut packages);
        packages
    }

    pub fn contains_dependency_for_platform(&self, name: &str, platform: &str) -> bool {
        self.platform().eq_ignore_ascii_case(platform)
            && self
                .all_packages()
                .iter()
                .any(|package| package.identity.name == name)
    }

    /// `dependencies.info` content for this tree
    pub fn info_string(&self) -> String {
        let dependencies: Vec<DependencyInfo> = self
            .all_packages()
            .into_iter()
            .map(|package| DependencyInfo {
                name: package.identity.name,
                version: package.version,
            })
            .collect();
        format_dependencies(
            &self.root.identity.name,
            &self.root.version,
            self.platform(),
            &dependencies,
        )
    }

    /// Write `dependencies.info` to `path`
    pub fn save_info(&self, path: &Path) -> Result<()> {
        fs::write(path, self.info_string()).map_err(|e| {
            Error::IoError(format!("Failed to write {}: {}", path.display(), e))
        })
    }

    /// Print the tree to stdout
    pub fn print(&self) {
        print!("{self}");
    }
}

impl fmt::Display for DependencyTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} {} [{}]",
            self.root.identity.name,
            self.root.version,
            self.platform()
        )?;
        render(f, &self.dependencies, "")
    }
}

fn render(f: &mut fmt::Formatter<'_>, nodes: &[DependencyInstance], prefix: &str) -> fmt::Result {
    for (i, node) in nodes.iter().enumerate() {
        let last = i + 1 == nodes.len();
        let (branch, indent) = if last {
            ("└── ", "    ")
        } else {
            ("├── ", "│   ")
        };
        let marker = if node.shared { " (*)" } else { "" };
        writeln!(
            f,
            "{prefix}{branch}{} {}{marker}",
            node.package.identity.name, node.package.version
        )?;
        render(f, &node.dependencies, &format!("{prefix}{indent}"))?;
    }
    Ok(())
}

fn collect_post_order(
    nodes: &[DependencyInstance],
    seen: &mut HashSet<String>,
    out: &mut Vec<PackageInstance>,
) {
    for node in nodes {
        collect_post_order(&node.dependencies, seen, out);
        if seen.insert(node.package.identity.name.clone()) {
            out.push(node.package.clone());
        }
    }
}

fn stale_nodes(ctx: &ResolutionContext, nodes: &[DependencyInstance]) -> Result<bool> {
    for node in nodes.iter().filter(|node| !node.shared) {
        let package = &node.package;
        if !package.location.exists() {
            debug!("{} is gone from {}", package.identity, package.location.display());
            return Ok(true);
        }
        let declared = ctx
            .descriptors()
            .load(&package.identity, &package.location)?
            .map(|descriptor| descriptor.dependencies)
            .unwrap_or_default();
        if declared != node.declared {
            debug!("Dependencies of {} changed", package.identity);
            return Ok(true);
        }
        if stale_nodes(ctx, &node.dependencies)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// A resolution already made during the current build
struct Selection {
    package: PackageInstance,
    declared: Vec<DependencyEdge>,
    constraints: Vec<(String, String)>,
}

/// Recursive state of one build
struct TreeBuilder<'a> {
    ctx: &'a ResolutionContext,
    platform: String,
    /// Names currently being resolved, root first
    path: Vec<String>,
    selected: HashMap<String, Selection>,
}

impl TreeBuilder<'_> {
    fn resolve(&mut self, requirer: &str, edges: &[DependencyEdge]) -> Result<Vec<DependencyInstance>> {
        let mut resolved = Vec::new();

        for edge in edges {
            if !edge.applies_to(&self.platform) {
                debug!(
                    "Skipping {} -> {}: not for {} ({})",
                    requirer, edge.name, self.platform, edge.platforms
                );
                continue;
            }

            if let Some(start) = self.path.iter().position(|name| *name == edge.name) {
                let mut cycle = self.path[start..].to_vec();
                cycle.push(edge.name.clone());
                return Err(Conflict::CircularDependency { cycle }.into());
            }

            if let Some(selection) = self.selected.get_mut(&edge.name) {
                selection
                    .constraints
                    .push((requirer.to_string(), edge.range.to_string()));
                if !edge.range.is_in_range(&selection.package.version) {
                    return Err(Conflict::ConflictingConstraints {
                        package: edge.name.clone(),
                        selected: selection.package.version.clone(),
                        constraints: selection.constraints.clone(),
                    }
                    .into());
                }
                debug!(
                    "{} -> {} shares {}",
                    requirer, edge.name, selection.package.version
                );
                resolved.push(DependencyInstance {
                    edge: edge.clone(),
                    package: selection.package.clone(),
                    declared: selection.declared.clone(),
                    dependencies: Vec::new(),
                    shared: true,
                });
                continue;
            }

            let (package, declared) = self.negotiate(edge)?;
            self.selected.insert(
                edge.name.clone(),
                Selection {
                    package: package.clone(),
                    declared: declared.clone(),
                    constraints: vec![(requirer.to_string(), edge.range.to_string())],
                },
            );

            self.path.push(edge.name.clone());
            let dependencies = self.resolve(&edge.name, &declared)?;
            self.path.pop();

            resolved.push(DependencyInstance {
                edge: edge.clone(),
                package,
                declared,
                dependencies,
                shared: false,
            });
        }

        Ok(resolved)
    }

    /// Bring one edge into Target and read what it declares
    fn negotiate(&self, edge: &DependencyEdge) -> Result<(PackageInstance, Vec<DependencyEdge>)> {
        let branch = edge
            .branch
            .clone()
            .unwrap_or_else(|| self.ctx.config().resolution.default_branch.clone());
        let identity = PackageIdentity::new(
            edge.name.clone(),
            edge.group.clone(),
            branch,
            self.platform.clone(),
        );

        let mut state = PackageState::new(identity.clone());
        let outcome = self.ctx.negotiator().update(&mut state, &edge.range)?;

        let location = self
            .ctx
            .tiers()
            .get(Tier::Target)
            .map(|target| target.link(&state))
            .transpose()?
            .flatten()
            .ok_or_else(|| {
                Error::NotFoundError(format!("{} has no location at target", identity))
            })?;

        let declared = self
            .ctx
            .descriptors()
            .load(&identity, &location)?
            .map(|descriptor| descriptor.dependencies)
            .unwrap_or_default();

        Ok((
            PackageInstance {
                identity,
                version: outcome.version,
                location,
            },
            declared,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::VersionRange;

    fn instance(name: &str, version: &str) -> PackageInstance {
        PackageInstance {
            identity: PackageIdentity::new(name, "acme", "default", "x64"),
            version: ComparableVersion::parse(version).unwrap(),
            location: PathBuf::from(format!("/deps/{name}")),
        }
    }

    fn node(name: &str, version: &str, children: Vec<DependencyInstance>) -> DependencyInstance {
        DependencyInstance {
            edge: DependencyEdge::new(name, "acme", VersionRange::default_query()),
            package: instance(name, version),
            declared: Vec::new(),
            dependencies: children,
            shared: false,
        }
    }

    fn built_tree() -> DependencyTree {
        let mut shared = node("zlib", "1.2", Vec::new());
        shared.shared = true;
        let mut tree = DependencyTree::new(instance("app", "2.0"), Vec::new());
        tree.dependencies = vec![
            node("libpng", "1.6", vec![node("zlib", "1.2", Vec::new())]),
            node("openssl", "3.0", vec![shared]),
        ];
        tree.built = true;
        tree
    }

    #[test]
    fn test_all_packages_post_order_dedup() {
        let names: Vec<String> = built_tree()
            .all_packages()
            .into_iter()
            .map(|p| p.identity.name)
            .collect();
        assert_eq!(names, vec!["zlib", "libpng", "openssl"]);
    }

    #[test]
    fn test_contains_dependency_for_platform() {
        let tree = built_tree();
        assert!(tree.contains_dependency_for_platform("zlib", "x64"));
        assert!(!tree.contains_dependency_for_platform("zlib", "arm"));
        assert!(!tree.contains_dependency_for_platform("curl", "x64"));
    }

    #[test]
    fn test_render() {
        let expected = "\
app 2.0 [x64]
├── libpng 1.6
│   └── zlib 1.2
└── openssl 3.0
    └── zlib 1.2 (*)
";
        assert_eq!(built_tree().to_string(), expected);
    }

    #[test]
    fn test_info_string() {
        assert_eq!(
            built_tree().info_string(),
            "app, version=2.0, platform=x64\nzlib, version=1.2\nlibpng, version=1.6\nopenssl, version=3.0\n"
        );
    }

    #[test]
    fn test_unbuilt_tree_is_empty() {
        let tree = DependencyTree::new(instance("app", "2.0"), Vec::new());
        assert!(!tree.is_built());
        assert!(tree.all_packages().is_empty());
        assert_eq!(tree.to_string(), "app 2.0 [x64]\n");
    }
}
