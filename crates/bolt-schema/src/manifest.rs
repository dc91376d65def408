//! In-memory build manifest model.
//!
//! A manifest (`package.toml`) describes one source package, the binary
//! packages built from it, and a changelog whose newest release supplies
//! the version of everything produced.
//!
//! ```toml
//! [source]
//! name = "hello"
//! requires = "gcc (>= 10), make"
//!
//! [[source.files]]
//! name = "hello-2.12.tar.gz"
//! sha256 = "cf04af86dc085268c5f4470fbae49b18afbc221b78096aab842d934a76bad0ab"
//!
//! [source.rules]
//! build = "make -j$BOLT_PARALLEL_JOBS"
//!
//! [[changelog]]
//! version = "2.12"
//! revision = "1"
//! maintainer = "Jane Doe"
//! email = "jane@example.org"
//!
//! [[package]]
//! name = "hello"
//! summary = "the friendly greeter"
//! relations = { requires = "libc (>= 2.31)" }
//! contents = [{ type = "file", path = "${prefix}/bin/hello", mode = 0o755 }]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::arch::BuildFor;
use crate::hash::Sha256Digest;
use crate::relation::{DependencySpec, RelationKind};
use crate::version::{PackageVersion, VersionError};

/// Errors raised while loading a manifest.
#[derive(thiserror::Error, Debug)]
pub enum ManifestError {
    /// The manifest file could not be read.
    #[error("failed to read manifest {path}: {source}")]
    Io {
        /// Manifest path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The manifest is not valid TOML for this model.
    #[error("failed to parse manifest: {0}")]
    Parse(#[from] toml::de::Error),

    /// The changelog has no release entry.
    #[error("manifest changelog has no release")]
    MissingRelease,

    /// The newest release does not form a valid version.
    #[error("invalid release version: {0}")]
    Version(#[from] VersionError),
}

/// Top-level manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// The `[source]` table.
    pub source: SourceSpec,

    /// Releases, newest first.
    #[serde(default)]
    pub changelog: Vec<Release>,

    /// Extra `BOLT_*`-style variables exported to build phases.
    #[serde(default)]
    pub defines: BTreeMap<String, String>,

    /// Binary packages, in build order.
    #[serde(default, rename = "package")]
    pub packages: Vec<BinarySpec>,
}

impl Manifest {
    /// Parse a manifest from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Parse`] if the text does not match the model.
    pub fn from_toml(text: &str) -> Result<Self, ManifestError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Io`] if the file cannot be read, or
    /// [`ManifestError::Parse`] if it is not a valid manifest.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// The newest changelog release.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::MissingRelease`] for an empty changelog.
    pub fn release(&self) -> Result<&Release, ManifestError> {
        self.changelog.first().ok_or(ManifestError::MissingRelease)
    }

    /// Version of every package built from this manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no release or its version is invalid.
    pub fn version(&self) -> Result<PackageVersion, ManifestError> {
        Ok(self.release()?.package_version()?)
    }
}

/// One changelog release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    /// Version epoch.
    #[serde(default)]
    pub epoch: u32,
    /// Upstream version.
    pub version: String,
    /// Packaging revision.
    #[serde(default)]
    pub revision: Option<String>,
    /// Maintainer name.
    #[serde(default)]
    pub maintainer: String,
    /// Maintainer e-mail address.
    #[serde(default)]
    pub email: String,
}

impl Release {
    /// Combine epoch, version and revision.
    ///
    /// # Errors
    ///
    /// Returns a [`VersionError`] if a component is malformed.
    pub fn package_version(&self) -> Result<PackageVersion, VersionError> {
        PackageVersion::new(self.epoch, &self.version, self.revision.as_deref())
    }

    /// `Name <email>` as written into control metadata.
    pub fn maintainer_line(&self) -> String {
        format!("{} <{}>", self.maintainer, self.email)
    }
}

/// The `[source]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Source package name; also the cache directory name.
    pub name: String,

    /// Short description.
    #[serde(default)]
    pub description: String,

    /// Whether the binary packages are architecture independent.
    #[serde(default)]
    pub architecture_independent: bool,

    /// Build dependencies.
    #[serde(default)]
    pub requires: DependencySpec,

    /// Upstream archives.
    #[serde(default)]
    pub files: Vec<SourceFile>,

    /// Patch sets, applied in order after unpacking.
    #[serde(default)]
    pub patchsets: Vec<PatchSet>,

    /// Build-phase scripts.
    #[serde(default)]
    pub rules: BuildRules,
}

impl SourceSpec {
    /// Flatten the patch sets into an ordered patch series.
    pub fn patch_series(&self) -> Vec<PatchSpec> {
        self.patchsets
            .iter()
            .flat_map(|set| {
                set.files.iter().map(|file| PatchSpec {
                    path: PathBuf::from(&file.path),
                    subdir: file.subdir.clone().unwrap_or_else(|| set.subdir.clone()),
                    strip: file.strip.unwrap_or(set.strip),
                })
            })
            .collect()
    }
}

/// An upstream source archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    /// File name in the cache and on mirrors.
    pub name: String,

    /// Subdirectory of the source dir to unpack into.
    #[serde(default)]
    pub subdir: String,

    /// Expected checksum; unchecked when absent.
    #[serde(default)]
    pub sha256: Option<Sha256Digest>,
}

/// A group of patches sharing a default subdir and strip level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchSet {
    /// Default subdirectory to apply in.
    #[serde(default)]
    pub subdir: String,

    /// Default `-p` strip level.
    #[serde(default = "default_strip")]
    pub strip: u32,

    /// Patches in this set.
    #[serde(default)]
    pub files: Vec<PatchFile>,
}

fn default_strip() -> u32 {
    1
}

/// One patch entry inside a [`PatchSet`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchFile {
    /// Patch path, relative to the manifest directory unless absolute.
    pub path: String,
    /// Overrides the set's subdirectory.
    #[serde(default)]
    pub subdir: Option<String>,
    /// Overrides the set's strip level.
    #[serde(default)]
    pub strip: Option<u32>,
}

/// A fully resolved patch series entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSpec {
    /// Patch file.
    pub path: PathBuf,
    /// Subdirectory of the source dir to apply in.
    pub subdir: String,
    /// `-p` strip level.
    pub strip: u32,
}

/// Build-phase script bodies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildRules {
    /// Runs after unpacking, e.g. `./configure`.
    #[serde(default)]
    pub prepare: String,
    /// Compiles the sources.
    #[serde(default)]
    pub build: String,
    /// Installs into `$BOLT_INSTALL_DIR`.
    #[serde(default)]
    pub install: String,
    /// Cleans the build tree.
    #[serde(default)]
    pub clean: String,
}

/// A `[[package]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinarySpec {
    /// Package name, before any tools prefix is applied.
    pub name: String,

    /// Archive section.
    #[serde(default = "default_section")]
    pub section: String,

    /// One-line summary.
    #[serde(default)]
    pub summary: String,

    /// Long description.
    #[serde(default)]
    pub description: String,

    /// Restricts the package to these build flavours; empty means all.
    #[serde(default)]
    pub build_for: Vec<BuildFor>,

    /// Declared relations.
    #[serde(default)]
    pub relations: Relations,

    /// Subdirectory of the install dir the content rules are relative to.
    #[serde(default)]
    pub content_subdir: Option<String>,

    /// Content rules, in declaration order.
    #[serde(default)]
    pub contents: Vec<ContentRule>,

    /// Maintainer scripts.
    #[serde(default)]
    pub maintainer_scripts: MaintainerScripts,
}

fn default_section() -> String {
    "unknown".to_string()
}

/// The `relations` table of a binary package.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Relations {
    /// Runtime dependencies.
    #[serde(default)]
    pub requires: DependencySpec,
    /// Provided virtual packages.
    #[serde(default)]
    pub provides: DependencySpec,
    /// Conflicting packages.
    #[serde(default)]
    pub conflicts: DependencySpec,
    /// Replaced packages.
    #[serde(default)]
    pub replaces: DependencySpec,
}

impl Relations {
    /// The relation set of the given kind.
    pub fn get(&self, kind: RelationKind) -> &DependencySpec {
        match kind {
            RelationKind::Requires => &self.requires,
            RelationKind::Provides => &self.provides,
            RelationKind::Conflicts => &self.conflicts,
            RelationKind::Replaces => &self.replaces,
        }
    }

    /// Convert into a kind-keyed map, dropping empty sets.
    pub fn into_map(self) -> BTreeMap<RelationKind, DependencySpec> {
        [
            (RelationKind::Requires, self.requires),
            (RelationKind::Provides, self.provides),
            (RelationKind::Conflicts, self.conflicts),
            (RelationKind::Replaces, self.replaces),
        ]
        .into_iter()
        .filter(|(_, spec)| !spec.is_empty())
        .collect()
    }
}

/// Kind of a [`ContentRule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentRuleKind {
    /// A file, symlink, glob pattern, or directory tree to include.
    File,
    /// A single (possibly empty) directory.
    Dir,
}

/// Declared intent for one package path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRule {
    /// Rule kind.
    #[serde(rename = "type")]
    pub kind: ContentRuleKind,
    /// Package path; `${prefix}` expands to the install prefix.
    pub path: String,
    /// Permission bits; detected from disk when absent.
    #[serde(default)]
    pub mode: Option<u32>,
    /// Owner name, `root` when absent.
    #[serde(default)]
    pub owner: Option<String>,
    /// Group name, `root` when absent.
    #[serde(default)]
    pub group: Option<String>,
    /// Conffile flag; files under `/etc/` default to conffiles.
    #[serde(default)]
    pub conffile: Option<bool>,
}

impl ContentRule {
    /// A `file` rule for `path` with no attribute overrides.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            kind: ContentRuleKind::File,
            path: path.into(),
            mode: None,
            owner: None,
            group: None,
            conffile: None,
        }
    }

    /// A `dir` rule for `path` with no attribute overrides.
    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            kind: ContentRuleKind::Dir,
            ..Self::file(path)
        }
    }
}

/// Maintainer scripts run by the package manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaintainerScripts {
    /// Before unpacking.
    #[serde(default)]
    pub preinst: Option<String>,
    /// After unpacking.
    #[serde(default)]
    pub postinst: Option<String>,
    /// Before removal.
    #[serde(default)]
    pub prerm: Option<String>,
    /// After removal.
    #[serde(default)]
    pub postrm: Option<String>,
}

impl MaintainerScripts {
    /// Present scripts as `(name, body)` pairs in execution order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("preinst", self.preinst.as_deref()),
            ("postinst", self.postinst.as_deref()),
            ("prerm", self.prerm.as_deref()),
            ("postrm", self.postrm.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, body)| body.map(|b| (name, b)))
    }
}
