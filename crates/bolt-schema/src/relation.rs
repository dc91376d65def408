//! Package relations: `requires`, `provides`, `conflicts` and `replaces`.
//!
//! Relations are written the way Debian control files write them:
//! `libc (>= 2.31), zlib, foo (==)`. The trailing-`=` form (`==`, `>==`)
//! is the *current version* marker: it stands for "the version this build
//! produces" and is substituted once, when a package descriptor is built.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::version::{Operator, PackageVersion, VersionError};

/// The four relation kinds a binary package may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    /// Runtime dependencies (`Depends:` in control metadata).
    Requires,
    /// Virtual packages this package provides.
    Provides,
    /// Packages that cannot be installed alongside this one.
    Conflicts,
    /// Packages whose files this package takes over.
    Replaces,
}

impl RelationKind {
    /// All kinds in control-field order.
    pub const ALL: [RelationKind; 4] = [
        RelationKind::Requires,
        RelationKind::Provides,
        RelationKind::Conflicts,
        RelationKind::Replaces,
    ];

    /// Name of the control field carrying this relation.
    pub fn control_field(self) -> &'static str {
        match self {
            Self::Requires => "Depends",
            Self::Provides => "Provides",
            Self::Conflicts => "Conflicts",
            Self::Replaces => "Replaces",
        }
    }
}

/// Errors from parsing relation text.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RelationParseError {
    /// A relation entry had no package name.
    #[error("empty package name in relation '{0}'")]
    EmptyName(String),

    /// The parenthesised constraint was not closed.
    #[error("unterminated version constraint in '{0}'")]
    Unterminated(String),

    /// The operator or version inside the constraint did not parse.
    #[error("invalid constraint in '{entry}': {source}")]
    Constraint {
        /// The offending relation entry.
        entry: String,
        /// Underlying version error.
        source: VersionError,
    },
}

/// Version constraint attached to a [`Dependency`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// Any version satisfies the dependency.
    Any,
    /// An explicit `<op> <version>` constraint.
    Versioned(Operator, PackageVersion),
    /// The current-version marker; the version is filled in later.
    Current(Operator),
}

impl Constraint {
    /// Whether `version` satisfies this constraint.
    ///
    /// An unresolved [`Constraint::Current`] never matches.
    pub fn matches(&self, version: &PackageVersion) -> bool {
        match self {
            Self::Any => true,
            Self::Versioned(op, wanted) => version.satisfies(*op, wanted),
            Self::Current(_) => false,
        }
    }
}

/// A single named dependency with an optional constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Target package name.
    pub name: String,
    /// Version constraint.
    pub constraint: Constraint,
}

impl Dependency {
    /// Unconstrained dependency on `name`.
    pub fn any(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: Constraint::Any,
        }
    }

    /// Dependency on `name` with `<op> <version>`.
    pub fn versioned(name: impl Into<String>, op: Operator, version: PackageVersion) -> Self {
        Self {
            name: name.into(),
            constraint: Constraint::Versioned(op, version),
        }
    }
}

impl FromStr for Dependency {
    type Err = RelationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let entry = s.trim();
        let (name, constraint) = match entry.split_once('(') {
            Some((name, rest)) => {
                let inner = rest
                    .strip_suffix(')')
                    .ok_or_else(|| RelationParseError::Unterminated(entry.to_string()))?;
                (name.trim(), parse_constraint(entry, inner.trim())?)
            }
            None => (entry, Constraint::Any),
        };

        if name.is_empty() {
            return Err(RelationParseError::EmptyName(entry.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            constraint,
        })
    }
}

fn parse_constraint(entry: &str, inner: &str) -> Result<Constraint, RelationParseError> {
    let op_len = inner
        .find(|c| !matches!(c, '<' | '>' | '='))
        .unwrap_or(inner.len());
    let (op, version) = inner.split_at(op_len);
    let version = version.trim();
    let wrap = |source| RelationParseError::Constraint {
        entry: entry.to_string(),
        source,
    };

    if version.is_empty() {
        // `==` means `=` with the current version, `>==` means `>=`, etc.
        let base = op
            .strip_suffix('=')
            .filter(|base| !base.is_empty())
            .ok_or_else(|| wrap(VersionError::Empty))?;
        return Ok(Constraint::Current(base.parse().map_err(wrap)?));
    }

    Ok(Constraint::Versioned(
        op.parse().map_err(wrap)?,
        version.parse().map_err(wrap)?,
    ))
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            Constraint::Any => write!(f, "{}", self.name),
            Constraint::Versioned(op, version) => write!(f, "{} ({op} {version})", self.name),
            Constraint::Current(op) => write!(f, "{} ({op}=)", self.name),
        }
    }
}

/// An ordered set of dependencies keyed by package name.
///
/// Inserting a dependency on a name that is already present replaces the
/// existing entry in place, keeping its position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySpec {
    entries: Vec<Dependency>,
}

impl DependencySpec {
    /// Empty relation set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the dependency for `dep.name`.
    pub fn insert(&mut self, dep: Dependency) {
        match self.entries.iter_mut().find(|d| d.name == dep.name) {
            Some(existing) => *existing = dep,
            None => self.entries.push(dep),
        }
    }

    /// Look up the dependency for `name`.
    pub fn get(&self, name: &str) -> Option<&Dependency> {
        self.entries.iter().find(|d| d.name == name)
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Dependency> {
        self.entries.iter()
    }

    /// Iterate mutably in insertion order.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Dependency> {
        self.entries.iter_mut()
    }

    /// Number of dependencies.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a DependencySpec {
    type Item = &'a Dependency;
    type IntoIter = std::slice::Iter<'a, Dependency>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl IntoIterator for DependencySpec {
    type Item = Dependency;
    type IntoIter = std::vec::IntoIter<Dependency>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<Dependency> for DependencySpec {
    fn from_iter<T: IntoIterator<Item = Dependency>>(iter: T) -> Self {
        let mut spec = Self::new();
        for dep in iter {
            spec.insert(dep);
        }
        spec
    }
}

impl FromStr for DependencySpec {
    type Err = RelationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, dep) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dep}")?;
        }
        Ok(())
    }
}

impl TryFrom<String> for DependencySpec {
    type Error = RelationParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DependencySpec> for String {
    fn from(value: DependencySpec) -> Self {
        value.to_string()
    }
}

impl Serialize for DependencySpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DependencySpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_and_versioned() {
        let spec: DependencySpec = "libc (>= 2.31), zlib ,foo (<< 1:2.0-1)".parse().unwrap();
        assert_eq!(spec.len(), 3);
        assert_eq!(spec.get("zlib").unwrap().constraint, Constraint::Any);
        match &spec.get("libc").unwrap().constraint {
            Constraint::Versioned(Operator::Ge, v) => assert_eq!(v.to_string(), "2.31"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(spec.to_string(), "libc (>= 2.31), zlib, foo (<< 1:2.0-1)");
    }

    #[test]
    fn test_parse_current_marker() {
        let dep: Dependency = "foo (==)".parse().unwrap();
        assert_eq!(dep.constraint, Constraint::Current(Operator::Eq));
        let dep: Dependency = "foo (>==)".parse().unwrap();
        assert_eq!(dep.constraint, Constraint::Current(Operator::Ge));
        assert_eq!(dep.to_string(), "foo (>==)");
        assert!("foo (=)".parse::<Dependency>().is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "(>= 1.0)".parse::<Dependency>(),
            Err(RelationParseError::EmptyName(_))
        ));
        assert!(matches!(
            "foo (>= 1.0".parse::<Dependency>(),
            Err(RelationParseError::Unterminated(_))
        ));
        assert!(matches!(
            "foo (~> 1.0)".parse::<Dependency>(),
            Err(RelationParseError::Constraint { .. })
        ));
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut spec: DependencySpec = "a, b, c".parse().unwrap();
        spec.insert(Dependency::versioned(
            "b",
            Operator::Ge,
            "2.0".parse().unwrap(),
        ));
        spec.insert(Dependency::any("d"));
        assert_eq!(spec.to_string(), "a, b (>= 2.0), c, d");
    }

    #[test]
    fn test_owned_iteration_keeps_order() {
        let spec: DependencySpec = "zlib (>= 1.2), libc".parse().unwrap();
        let names: Vec<String> = spec.into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["zlib", "libc"]);
    }

    #[test]
    fn test_constraint_matching() {
        let installed: PackageVersion = "1.2-1".parse().unwrap();
        assert!(Constraint::Any.matches(&installed));
        assert!(Constraint::Versioned(Operator::Ge, "1.0".parse().unwrap()).matches(&installed));
        assert!(!Constraint::Versioned(Operator::Gt, "1.2-1".parse().unwrap()).matches(&installed));
        assert!(!Constraint::Current(Operator::Eq).matches(&installed));
    }
}
