//! Package discovery and workspace dependency resolution.
//!
//! Packages are directories carrying a `package.json` with a unique
//! `name`; dependency entries whose version is a `workspace:` marker
//! reference other packages in the same workspace.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSetBuilder};
use serde::Deserialize;
use thiserror::Error;

const MANIFEST_NAME: &str = "package.json";
const WORKSPACE_MARKER: &str = "workspace:";

/// Directories never descended into during discovery.
const PRUNED_DIRS: &[&str] = &[".git", ".velocity", "node_modules"];

/// Index into the workspace's package arena.
pub type PackageId = usize;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid package glob {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("walk workspace: {0}")]
    Walk(#[source] walkdir::Error),

    #[error("parse manifest {path}: {message}")]
    Manifest { path: PathBuf, message: String },

    #[error("duplicate package {name:?} found at {first} and {second}")]
    DuplicatePackage {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("package {package:?} depends on unknown package {dependency:?}")]
    UnknownDependency { package: String, dependency: String },

    #[error("package {selector:?} not found. available: {available}")]
    UnknownSelector { selector: String, available: String },

    #[error("multiple candidate packages found ({candidates}). specify --package to choose one")]
    AmbiguousTarget { candidates: String },

    #[error("unable to determine target package. specify --package. available: {available}")]
    NoTarget { available: String },
}

/// A discovered package, immutable after discovery.
#[derive(Debug, Clone)]
pub struct Package {
    /// Stable symbolic name from the manifest.
    pub name: String,
    /// Directory path relative to the workspace root.
    pub path: PathBuf,
    /// Manifest path relative to the workspace root.
    pub manifest_path: PathBuf,
    /// Names of workspace-internal dependencies, sorted.
    pub internal_dep_names: Vec<String>,
    /// Resolved workspace-internal dependencies.
    pub internal_deps: Vec<PackageId>,
}

impl Package {
    /// Human-readable description for error messages.
    pub fn describe(&self) -> String {
        let path = self.path.display().to_string();
        if self.name == path {
            path
        } else {
            format!("{} ({})", self.name, path)
        }
    }
}

/// The discovered package set, with name lookup.
#[derive(Debug)]
pub struct Workspace {
    packages: Vec<Package>,
    by_name: HashMap<String, PackageId>,
}

impl Workspace {
    /// Discover packages under `root` for the given directory globs and
    /// resolve their workspace dependencies.
    ///
    /// No matching manifest means a single-package workspace rooted at
    /// `.`; discovery still succeeds.
    pub fn discover(root: &Path, patterns: &[String]) -> Result<Self, DiscoveryError> {
        let mut packages = find_manifests(root, patterns)?;

        if packages.is_empty() {
            packages.push(Package {
                name: "__workspace__".to_string(),
                path: PathBuf::from("."),
                manifest_path: PathBuf::new(),
                internal_dep_names: Vec::new(),
                internal_deps: Vec::new(),
            });
        }

        packages.sort_by(|a, b| a.path.cmp(&b.path));

        let mut by_name = HashMap::with_capacity(packages.len());
        for (id, pkg) in packages.iter().enumerate() {
            if let Some(&existing) = by_name.get(&pkg.name) {
                let first: &Package = &packages[existing];
                return Err(DiscoveryError::DuplicatePackage {
                    name: pkg.name.clone(),
                    first: first.manifest_path.clone(),
                    second: pkg.manifest_path.clone(),
                });
            }
            by_name.insert(pkg.name.clone(), id);
        }

        let mut workspace = Self { packages, by_name };
        workspace.resolve_deps()?;
        Ok(workspace)
    }

    fn resolve_deps(&mut self) -> Result<(), DiscoveryError> {
        let mut resolved = Vec::with_capacity(self.packages.len());
        for pkg in &self.packages {
            let mut deps = Vec::with_capacity(pkg.internal_dep_names.len());
            for dep_name in &pkg.internal_dep_names {
                let id = self.by_name.get(dep_name).copied().ok_or_else(|| {
                    DiscoveryError::UnknownDependency {
                        package: pkg.name.clone(),
                        dependency: dep_name.clone(),
                    }
                })?;
                deps.push(id);
            }
            resolved.push(deps);
        }
        for (pkg, deps) in self.packages.iter_mut().zip(resolved) {
            pkg.internal_deps = deps;
        }
        Ok(())
    }

    pub fn package(&self, id: PackageId) -> &Package {
        &self.packages[id]
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PackageId, &Package)> {
        self.packages.iter().enumerate()
    }

    /// Find a package by name, then by path.
    pub fn find(&self, selector: &str) -> Option<PackageId> {
        if let Some(&id) = self.by_name.get(selector) {
            return Some(id);
        }
        self.packages
            .iter()
            .position(|pkg| pkg.path == Path::new(selector))
    }

    /// Packages no other package depends on, ordered by path.
    pub fn root_packages(&self) -> Vec<PackageId> {
        let mut depended_on = BTreeSet::new();
        for pkg in &self.packages {
            depended_on.extend(pkg.internal_deps.iter().copied());
        }
        (0..self.packages.len())
            .filter(|id| !depended_on.contains(id))
            .collect()
    }

    /// Pick the target package for an invocation.
    ///
    /// An explicit selector wins; otherwise a single package, then a
    /// single root package; anything else is a configuration error that
    /// names the candidates.
    pub fn select_target(&self, selector: Option<&str>) -> Result<PackageId, DiscoveryError> {
        if let Some(selector) = selector.map(str::trim).filter(|s| !s.is_empty()) {
            return self
                .find(selector)
                .ok_or_else(|| DiscoveryError::UnknownSelector {
                    selector: selector.to_string(),
                    available: self.describe_all(),
                });
        }

        if self.packages.len() == 1 {
            return Ok(0);
        }

        let roots = self.root_packages();
        match roots.as_slice() {
            [single] => Ok(*single),
            [] => Err(DiscoveryError::NoTarget {
                available: self.describe_all(),
            }),
            _ => Err(DiscoveryError::AmbiguousTarget {
                candidates: roots
                    .iter()
                    .map(|&id| self.packages[id].describe())
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }

    fn describe_all(&self) -> String {
        let mut described: Vec<String> = self.packages.iter().map(Package::describe).collect();
        described.sort();
        described.join(", ")
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    name: String,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "devDependencies")]
    dev_dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "optionalDependencies")]
    optional_dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "peerDependencies")]
    peer_dependencies: BTreeMap<String, String>,
}

impl Manifest {
    fn workspace_deps(&self) -> Vec<String> {
        let mut deps = BTreeSet::new();
        for group in [
            &self.dependencies,
            &self.dev_dependencies,
            &self.optional_dependencies,
            &self.peer_dependencies,
        ] {
            for (name, version) in group {
                if version.starts_with(WORKSPACE_MARKER) {
                    deps.insert(name.clone());
                }
            }
        }
        deps.into_iter().collect()
    }
}

fn find_manifests(root: &Path, patterns: &[String]) -> Result<Vec<Package>, DiscoveryError> {
    let mut builder = GlobSetBuilder::new();
    let mut any = false;
    for pattern in patterns {
        let trimmed = pattern.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            continue;
        }
        let manifest_glob = if trimmed.ends_with(MANIFEST_NAME) {
            trimmed.to_string()
        } else {
            format!("{trimmed}/{MANIFEST_NAME}")
        };
        let glob = GlobBuilder::new(&manifest_glob)
            .literal_separator(true)
            .build()
            .map_err(|source| DiscoveryError::Pattern {
                pattern: pattern.clone(),
                source,
            })?;
        builder.add(glob);
        any = true;
    }
    if !any {
        return Ok(Vec::new());
    }
    let globs = builder.build().map_err(|source| DiscoveryError::Pattern {
        pattern: patterns.join(","),
        source,
    })?;

    let mut packages = Vec::new();
    let mut seen_paths = BTreeSet::new();

    let walker = walkdir::WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir()
                && PRUNED_DIRS.iter().any(|dir| entry.file_name() == *dir))
        });

    for entry in walker {
        let entry = entry.map_err(DiscoveryError::Walk)?;
        if !entry.file_type().is_file() || entry.file_name() != MANIFEST_NAME {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        if !globs.is_match(rel) {
            continue;
        }
        if !seen_paths.insert(rel.to_path_buf()) {
            continue;
        }

        let raw = std::fs::read(entry.path()).map_err(|err| DiscoveryError::Manifest {
            path: rel.to_path_buf(),
            message: err.to_string(),
        })?;
        let manifest: Manifest =
            serde_json::from_slice(&raw).map_err(|err| DiscoveryError::Manifest {
                path: rel.to_path_buf(),
                message: err.to_string(),
            })?;
        if manifest.name.trim().is_empty() {
            return Err(DiscoveryError::Manifest {
                path: rel.to_path_buf(),
                message: "missing name field".to_string(),
            });
        }

        let package_path = match rel.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        packages.push(Package {
            name: manifest.name.clone(),
            path: package_path,
            manifest_path: rel.to_path_buf(),
            internal_dep_names: manifest.workspace_deps(),
            internal_deps: Vec::new(),
        });
    }

    Ok(packages)
}
