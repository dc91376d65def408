//! Error taxonomy, one enum per pipeline stage.
//!
//! Only the mirror loop in [`crate::source::fetch`] retries; every other
//! error aborts the stage that raised it.

use std::path::PathBuf;

use bolt_schema::{DependencySpec, ManifestError};
use thiserror::Error;

use crate::source::Phase;
use crate::tool::ToolError;

/// A content rule could not be resolved against the install tree.
///
/// Aborts `prepare()` for the package owning the rule.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("content rule '{rule}': invalid pattern: {source}")]
    Pattern {
        rule: String,
        source: glob::PatternError,
    },

    #[error("content rule '{rule}': cannot read {path}: {source}")]
    Io {
        rule: String,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("content rule '{rule}': {source}")]
    Inspect { rule: String, source: ElfError },
}

#[derive(Error, Debug)]
pub enum ElfError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed ELF object {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("failed to separate debug info of {path}: {source}")]
    Tool { path: PathBuf, source: ToolError },
}

#[derive(Error, Debug)]
pub enum ShlibError {
    /// A `NEEDED` library matched no record of the binary's word size.
    #[error("dependency '{library}' of {binary} not found in any installed package")]
    Unresolved { library: String, binary: String },

    #[error("failed to initialize shlib index: {0}")]
    Index(#[from] ToolError),

    #[error(transparent)]
    Elf(#[from] ElfError),
}

#[derive(Error, Debug)]
pub enum RelationError {
    #[error("missing dependencies: {0}")]
    MissingBuildDependency(DependencySpec),

    #[error("cannot resolve dependency '{0}': package is not installed")]
    NotInstalled(String),

    #[error("failed to read package database {path}: {source}")]
    Database {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum FetchError {
    /// No mirror produced a file with the expected checksum.
    #[error("source archive '{file}' of {name} {version} could not be retrieved")]
    Retrieval {
        name: String,
        version: String,
        file: String,
    },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("failed to unpack {archive}: {source}")]
    Unpack {
        archive: PathBuf,
        source: std::io::Error,
    },

    #[error("'{entry}' in {archive} has unsupported file type")]
    UnsupportedEntry { archive: PathBuf, entry: String },

    #[error("'{entry}' in {archive} points outside the source directory")]
    UnsafePath { archive: PathBuf, entry: String },

    #[error("couldn't apply patch {patch}: {source}")]
    Patch { patch: PathBuf, source: ToolError },

    #[error("failed to {phase} the source package: {detail}")]
    Phase { phase: Phase, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a binary package's `prepare()` or `pack()`.
#[derive(Error, Debug)]
pub enum PackError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Elf(#[from] ElfError),

    #[error(transparent)]
    Shlib(#[from] ShlibError),

    #[error("failed to write package {path}: {source}")]
    Sink {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors surfaced by [`crate::control::PackageControl`].
#[derive(Error, Debug)]
pub enum ControlError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Relation(#[from] RelationError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("package {package}: {source}")]
    Pack { package: String, source: PackError },

    #[error(transparent)]
    Shlib(#[from] ShlibError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("unknown binary package '{0}'")]
    UnknownPackage(String),

    #[error("failed to prepare packages: {}", .0.join(", "))]
    PrepareFailed(Vec<String>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
