//! Dependency resolution against the host's package database.

mod dpkg;

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};

use bolt_schema::{Constraint, Dependency, DependencySpec, PackageVersion};

use crate::error::RelationError;

pub use dpkg::DpkgDatabase;

/// Read access to the packages installed on the build host.
pub trait PackageDatabase: Send + Sync + Debug {
    /// Version of an installed package. Virtual packages have none.
    fn installed_version(&self, name: &str) -> Option<PackageVersion>;

    /// Whether `name` is installed or provided by an installed package.
    fn is_installed(&self, name: &str) -> bool;

    /// Name of the installed package owning `path`.
    fn owner_of(&self, path: &Path) -> Option<String>;
}

/// A database assembled in code.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatabase {
    packages: HashMap<String, Option<PackageVersion>>,
    owners: HashMap<PathBuf, String>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(mut self, name: &str, version: PackageVersion) -> Self {
        self.packages.insert(name.to_string(), Some(version));
        self
    }

    /// Register a name that is provided but has no version of its own.
    pub fn with_virtual(mut self, name: &str) -> Self {
        self.packages.entry(name.to_string()).or_insert(None);
        self
    }

    pub fn with_owner(mut self, path: impl Into<PathBuf>, package: &str) -> Self {
        self.owners.insert(path.into(), package.to_string());
        self
    }
}

impl PackageDatabase for InMemoryDatabase {
    fn installed_version(&self, name: &str) -> Option<PackageVersion> {
        self.packages.get(name).cloned().flatten()
    }

    fn is_installed(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    fn owner_of(&self, path: &Path) -> Option<String> {
        self.owners.get(path).cloned()
    }
}

/// Replace every current-version marker in `spec` with a concrete version.
///
/// A marker naming a package of the same build (`build_set`) gets
/// `own_version`; anything else gets the version installed on the host.
///
/// # Errors
///
/// Returns [`RelationError::NotInstalled`] if a marker names a foreign
/// package that is not installed.
pub fn resolve_current_versions<S: AsRef<str>>(
    spec: &mut DependencySpec,
    build_set: &[S],
    own_version: &PackageVersion,
    db: &dyn PackageDatabase,
) -> Result<(), RelationError> {
    for dep in spec.iter_mut() {
        let Constraint::Current(op) = dep.constraint else {
            continue;
        };
        let version = if build_set.iter().any(|n| n.as_ref() == dep.name) {
            own_version.clone()
        } else {
            db.installed_version(&dep.name)
                .ok_or_else(|| RelationError::NotInstalled(dep.name.clone()))?
        };
        dep.constraint = Constraint::Versioned(op, version);
    }
    Ok(())
}

fn is_fulfilled(dep: &Dependency, db: &dyn PackageDatabase) -> bool {
    match &dep.constraint {
        Constraint::Any | Constraint::Current(_) => db.is_installed(&dep.name),
        Constraint::Versioned(op, wanted) => db
            .installed_version(&dep.name)
            .is_some_and(|installed| installed.satisfies(*op, wanted)),
    }
}

/// The subset of `spec` not satisfied by the installed packages.
pub fn unfulfilled(spec: &DependencySpec, db: &dyn PackageDatabase) -> DependencySpec {
    spec.iter()
        .filter(|dep| !is_fulfilled(dep, db))
        .cloned()
        .collect()
}

/// Fail unless every build dependency is satisfied.
///
/// # Errors
///
/// Returns [`RelationError::MissingBuildDependency`] listing everything
/// that is missing.
pub fn check_build_dependencies(
    spec: &DependencySpec,
    db: &dyn PackageDatabase,
) -> Result<(), RelationError> {
    let missing = unfulfilled(spec, db);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(RelationError::MissingBuildDependency(missing))
    }
}
