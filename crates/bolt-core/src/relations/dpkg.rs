use std::collections::HashMap;
use std::path::Path;

use bolt_schema::PackageVersion;

use super::PackageDatabase;
use crate::error::RelationError;
use crate::tool::Tool;

pub const DPKG_STATUS_FILE: &str = "/var/lib/dpkg/status";

/// Package database backed by dpkg's status file.
///
/// Only packages in state `install ok installed` count. Names listed in a
/// `Provides` field are registered without a version. File ownership is
/// answered by `dpkg -S`.
#[derive(Debug, Clone, Default)]
pub struct DpkgDatabase {
    packages: HashMap<String, Option<PackageVersion>>,
    dpkg: Option<Tool>,
}

impl DpkgDatabase {
    /// Read the system status file.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::Database`] if the file cannot be read.
    pub fn load() -> Result<Self, RelationError> {
        Self::load_from(Path::new(DPKG_STATUS_FILE))
    }

    /// Read a status file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::Database`] if the file cannot be read.
    pub fn load_from(path: &Path) -> Result<Self, RelationError> {
        let text = std::fs::read_to_string(path).map_err(|source| RelationError::Database {
            path: path.to_path_buf(),
            source,
        })?;
        let mut db = Self::parse(&text);
        db.dpkg = Tool::find("dpkg").ok();
        tracing::debug!("Loaded {} installed packages from {}", db.packages.len(), path.display());
        Ok(db)
    }

    /// Parse status file text. Ownership queries are disabled.
    pub fn parse(text: &str) -> Self {
        let mut packages: HashMap<String, Option<PackageVersion>> = HashMap::new();

        for block in text.split("\n\n") {
            let mut name = None;
            let mut version = None;
            let mut provides = None;
            let mut status = "";

            for line in block.lines() {
                let Some((key, value)) = line.split_once(':') else {
                    continue;
                };
                let value = value.trim();
                match key {
                    "Package" => name = Some(value),
                    "Version" => version = Some(value),
                    "Provides" => provides = Some(value),
                    "Status" => status = value,
                    _ => {}
                }
            }

            let Some(name) = name else { continue };
            if status.split_whitespace().collect::<Vec<_>>() != ["install", "ok", "installed"] {
                continue;
            }

            let version = match version.map(str::parse::<PackageVersion>) {
                Some(Ok(v)) => Some(v),
                Some(Err(e)) => {
                    tracing::warn!("Ignoring bad version of installed package {name}: {e}");
                    None
                }
                None => None,
            };
            packages.insert(name.to_string(), version);

            for provided in provides.into_iter().flat_map(|p| p.split(',')) {
                let provided = provided.split('(').next().unwrap_or_default().trim();
                if !provided.is_empty() {
                    packages.entry(provided.to_string()).or_insert(None);
                }
            }
        }

        Self {
            packages,
            dpkg: None,
        }
    }

    /// Use `dpkg` at an explicit location for ownership queries.
    pub fn with_dpkg(mut self, dpkg: Tool) -> Self {
        self.dpkg = Some(dpkg);
        self
    }
}

impl PackageDatabase for DpkgDatabase {
    fn installed_version(&self, name: &str) -> Option<PackageVersion> {
        self.packages.get(name).cloned().flatten()
    }

    fn is_installed(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    fn owner_of(&self, path: &Path) -> Option<String> {
        let dpkg = self.dpkg.as_ref()?;
        let output = dpkg.run([std::ffi::OsStr::new("-S"), path.as_os_str()]).ok()?;
        let owner = output.split(':').next()?.trim();
        (!owner.is_empty()).then(|| owner.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "\
Package: libc6
Status: install ok installed
Priority: optional
Version: 2.31-13+deb11u5
Provides: libc6-x32-compat (= 2.31), glibc
Description: GNU C Library
 continuation line: with a colon

Package: removed-pkg
Status: deinstall ok config-files
Version: 1.0-1

Package: mawk
Status: install ok installed
Version: 1.3.4.20200120-2
Provides: awk

Package: broken
Status: install ok installed
Version: not a version!
";

    #[test]
    fn test_parse_status() {
        let db = DpkgDatabase::parse(STATUS);
        assert_eq!(
            db.installed_version("libc6"),
            Some("2.31-13+deb11u5".parse().unwrap())
        );
        assert!(!db.is_installed("removed-pkg"));
        assert!(db.is_installed("awk"));
        assert_eq!(db.installed_version("awk"), None);
        assert!(db.is_installed("libc6-x32-compat"));
        assert!(db.is_installed("glibc"));
        assert!(db.is_installed("broken"));
        assert_eq!(db.installed_version("broken"), None);
    }

    #[test]
    fn test_owner_of_uses_dpkg_query() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("dpkg.sh");
        std::fs::write(
            &script,
            "case \"$2\" in\n/usr/lib/libz.so.1) echo 'zlib1g:amd64: /usr/lib/libz.so.1' ;;\n*) exit 1 ;;\nesac\n",
        )
        .unwrap();
        let db = DpkgDatabase::parse(STATUS).with_dpkg(Tool::script("dpkg", &script));

        assert_eq!(db.owner_of(Path::new("/usr/lib/libz.so.1")).as_deref(), Some("zlib1g"));
        assert_eq!(db.owner_of(Path::new("/nowhere")), None);
        assert_eq!(DpkgDatabase::parse(STATUS).owner_of(Path::new("/usr/lib/libz.so.1")), None);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            DpkgDatabase::load_from(Path::new("/nonexistent/status")),
            Err(RelationError::Database { .. })
        ));
    }
}
