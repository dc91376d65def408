//! On-disk cache of source archives.
//!
//! Layout: `<root>/<letter>/<name>/<version>/<file>`, where `<letter>` is
//! the first letter of the source name, skipping a leading `lib`. Mirrors
//! use the same relative layout.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use bolt_schema::Sha256Digest;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct SourceCache {
    root: PathBuf,
}

/// Hex sha256 of a file, streamed.
///
/// # Errors
///
/// Returns an IO error if the file cannot be read.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

impl SourceCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<letter>/<name>/<version>/<file>`
    ///
    /// A name that is just `lib` keeps its own first letter.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::InvalidInput`] for an empty source name.
    pub fn relative_path(name: &str, version: &str, file: &str) -> io::Result<String> {
        let letter = name
            .strip_prefix("lib")
            .and_then(|rest| rest.chars().next())
            .or_else(|| name.chars().next())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty source name"))?;
        Ok(format!("{letter}/{name}/{version}/{file}"))
    }

    /// Absolute cache location of `file`.
    ///
    /// # Errors
    ///
    /// See [`SourceCache::relative_path`].
    pub fn path_for(&self, name: &str, version: &str, file: &str) -> io::Result<PathBuf> {
        Ok(self.root.join(Self::relative_path(name, version, file)?))
    }

    /// The cached file, if present and matching `sha256` when given.
    ///
    /// # Errors
    ///
    /// Returns an IO error if an existing file cannot be read or the name
    /// is empty.
    pub fn lookup(
        &self,
        name: &str,
        version: &str,
        file: &str,
        sha256: Option<&Sha256Digest>,
    ) -> io::Result<Option<PathBuf>> {
        let path = self.path_for(name, version, file)?;
        if !path.is_file() {
            return Ok(None);
        }
        if let Some(expected) = sha256 {
            let actual = sha256_file(&path)?;
            if !expected.matches(&actual) {
                tracing::warn!(
                    "Cached {} has checksum {actual}, expected {expected}",
                    path.display()
                );
                return Ok(None);
            }
        }
        Ok(Some(path))
    }
}
