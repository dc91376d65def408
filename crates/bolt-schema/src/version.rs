//! Debian-style package versions.
//!
//! A version has the form `[epoch:]upstream[-revision]`. Ordering compares
//! the epoch numerically, then the upstream part, then the revision, using
//! the same segment-wise algorithm as `dpkg --compare-versions`:
//!
//! - the strings are split into alternating non-digit and digit runs,
//! - in non-digit runs `~` sorts before everything (even the end of the
//!   string), letters sort before all other characters,
//! - digit runs compare by numeric value, so leading zeros are ignored.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Errors produced when parsing a [`PackageVersion`] or an [`Operator`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// The version string was empty.
    #[error("empty version string")]
    Empty,

    /// The epoch before the `:` is not a decimal number.
    #[error("invalid epoch in version '{0}'")]
    InvalidEpoch(String),

    /// The upstream part is empty or contains characters outside `[-.+~a-zA-Z0-9]`.
    #[error("invalid upstream version in '{0}'")]
    InvalidUpstream(String),

    /// The revision part is empty or contains characters outside `[.+~a-zA-Z0-9]`.
    #[error("invalid revision in version '{0}'")]
    InvalidRevision(String),

    /// The relational operator is not one of `<<`, `<=`, `=`, `>=`, `>>`.
    #[error("invalid version operator '{0}'")]
    InvalidOperator(String),
}

/// A parsed package version.
///
/// Equality follows the ordering: `1.0` and `1.00` are equal versions even
/// though their textual forms differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageVersion {
    epoch: u32,
    upstream: String,
    revision: Option<String>,
}

impl PackageVersion {
    /// Build a version from its components.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::InvalidUpstream`] or
    /// [`VersionError::InvalidRevision`] if a component uses characters
    /// outside its allowed charset.
    pub fn new(epoch: u32, upstream: &str, revision: Option<&str>) -> Result<Self, VersionError> {
        let display = match revision {
            Some(rev) => format!("{upstream}-{rev}"),
            None => upstream.to_string(),
        };
        if !valid_upstream(upstream, revision.is_some()) {
            return Err(VersionError::InvalidUpstream(display));
        }
        if let Some(rev) = revision {
            if !valid_revision(rev) {
                return Err(VersionError::InvalidRevision(display));
            }
        }
        Ok(Self {
            epoch,
            upstream: upstream.to_string(),
            revision: revision.map(str::to_string),
        })
    }

    /// The epoch, `0` when the version string had none.
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// The upstream version part.
    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    /// The packaging revision, if any.
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    /// Upstream and revision joined with `-`, without the epoch.
    ///
    /// This is the form used in package file names.
    pub fn without_epoch(&self) -> String {
        match &self.revision {
            Some(rev) => format!("{}-{rev}", self.upstream),
            None => self.upstream.clone(),
        }
    }

    /// Whether `self <op> other` holds.
    pub fn satisfies(&self, op: Operator, other: &PackageVersion) -> bool {
        op.holds(self, other)
    }

    /// Pick the greatest version from an iterator.
    pub fn latest<'a, I>(versions: I) -> Option<&'a PackageVersion>
    where
        I: IntoIterator<Item = &'a PackageVersion>,
    {
        versions.into_iter().max()
    }
}

fn valid_upstream(s: &str, has_revision: bool) -> bool {
    !s.is_empty()
        && s.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '~') || (c == '-' && has_revision)
        })
}

fn valid_revision(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '~'))
}

impl FromStr for PackageVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VersionError::Empty);
        }

        let (epoch, rest) = match s.split_once(':') {
            Some((epoch, rest)) => {
                if epoch.is_empty() || !epoch.chars().all(|c| c.is_ascii_digit()) {
                    return Err(VersionError::InvalidEpoch(s.to_string()));
                }
                let epoch = epoch
                    .parse::<u32>()
                    .map_err(|_| VersionError::InvalidEpoch(s.to_string()))?;
                (epoch, rest)
            }
            None => (0, s),
        };

        // The revision starts after the last hyphen.
        let (upstream, revision) = match rest.rsplit_once('-') {
            Some((upstream, revision)) => (upstream, Some(revision)),
            None => (rest, None),
        };

        if !valid_upstream(upstream, revision.is_some()) {
            return Err(VersionError::InvalidUpstream(s.to_string()));
        }
        if let Some(rev) = revision {
            if !valid_revision(rev) {
                return Err(VersionError::InvalidRevision(s.to_string()));
            }
        }

        Ok(Self {
            epoch,
            upstream: upstream.to_string(),
            revision: revision.map(str::to_string),
        })
    }
}

impl TryFrom<String> for PackageVersion {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PackageVersion> for String {
    fn from(value: PackageVersion) -> Self {
        value.to_string()
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.without_epoch())
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| compare_fragment(&self.upstream, &other.upstream))
            .then_with(|| {
                compare_fragment(
                    self.revision.as_deref().unwrap_or(""),
                    other.revision.as_deref().unwrap_or(""),
                )
            })
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PackageVersion {}

/// Sort weight of a character in a non-digit run. `None` is end of string.
fn weight(c: Option<u8>) -> i32 {
    match c {
        None => 0,
        Some(b'~') => -1,
        Some(c) if c.is_ascii_digit() => 0,
        Some(c) if c.is_ascii_alphabetic() => i32::from(c),
        Some(c) => i32::from(c) + 256,
    }
}

/// Compare one version fragment (upstream or revision).
pub fn compare_fragment(a: &str, b: &str) -> Ordering {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let (mut i, mut j) = (0, 0);

    while i < a.len() || j < b.len() {
        while a.get(i).is_some_and(|c| !c.is_ascii_digit())
            || b.get(j).is_some_and(|c| !c.is_ascii_digit())
        {
            let (wa, wb) = (weight(a.get(i).copied()), weight(b.get(j).copied()));
            if wa != wb {
                return wa.cmp(&wb);
            }
            i += 1;
            j += 1;
        }

        while a.get(i) == Some(&b'0') {
            i += 1;
        }
        while b.get(j) == Some(&b'0') {
            j += 1;
        }

        let mut first_diff = Ordering::Equal;
        while a.get(i).is_some_and(u8::is_ascii_digit) && b.get(j).is_some_and(u8::is_ascii_digit) {
            if first_diff == Ordering::Equal {
                first_diff = a[i].cmp(&b[j]);
            }
            i += 1;
            j += 1;
        }

        if a.get(i).is_some_and(u8::is_ascii_digit) {
            return Ordering::Greater;
        }
        if b.get(j).is_some_and(u8::is_ascii_digit) {
            return Ordering::Less;
        }
        if first_diff != Ordering::Equal {
            return first_diff;
        }
    }

    Ordering::Equal
}

/// A relational operator between two versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `<<`, strictly less than.
    Lt,
    /// `<=`, less than or equal.
    Le,
    /// `=`, equal.
    Eq,
    /// `>=`, greater than or equal.
    Ge,
    /// `>>`, strictly greater than.
    Gt,
}

impl Operator {
    /// Evaluate `lhs <op> rhs`.
    pub fn holds(self, lhs: &PackageVersion, rhs: &PackageVersion) -> bool {
        let ord = lhs.cmp(rhs);
        match self {
            Self::Lt => ord == Ordering::Less,
            Self::Le => ord != Ordering::Greater,
            Self::Eq => ord == Ordering::Equal,
            Self::Ge => ord != Ordering::Less,
            Self::Gt => ord == Ordering::Greater,
        }
    }

    /// Textual form as used in relation fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lt => "<<",
            Self::Le => "<=",
            Self::Eq => "=",
            Self::Ge => ">=",
            Self::Gt => ">>",
        }
    }
}

impl FromStr for Operator {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "<<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            "=" => Ok(Self::Eq),
            ">=" => Ok(Self::Ge),
            ">>" => Ok(Self::Gt),
            other => Err(VersionError::InvalidOperator(other.to_string())),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
