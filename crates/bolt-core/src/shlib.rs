//! Shared library index.
//!
//! Maps a library soname to the objects that provide it: first whatever
//! the dynamic linker cache knows about, then, as binary packages of the
//! current build are packed, the libraries they ship. A package's runtime
//! dependencies are inferred by looking up each `NEEDED` entry of its ELF
//! files here.

use std::cell::OnceCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use bolt_schema::{Dependency, DependencySpec, Operator, PackageVersion, RelationKind, WordSize};
use regex::Regex;

use crate::contents::{Contents, FileStats};
use crate::elf::ElfInspector;
use crate::error::ShlibError;
use crate::package::BinaryPackage;
use crate::relations::PackageDatabase;
use crate::tool::Tool;

static LDCONFIG_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\S+) \((.*)\) => (\S+)").unwrap());

/// One provider of a library.
///
/// Owner, version and word size of system objects are looked up on first
/// use.
#[derive(Debug, Clone)]
pub struct SharedObject {
    path: PathBuf,
    package: OnceCell<Option<String>>,
    version: OnceCell<Option<PackageVersion>>,
    word_size: OnceCell<Option<WordSize>>,
}

impl SharedObject {
    /// An object known from the linker cache.
    pub fn system(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            package: OnceCell::new(),
            version: OnceCell::new(),
            word_size: OnceCell::new(),
        }
    }

    /// An object shipped by a package of the current build.
    pub fn packaged(
        path: impl Into<PathBuf>,
        package: &str,
        version: &PackageVersion,
        word_size: Option<WordSize>,
    ) -> Self {
        Self {
            path: path.into(),
            package: OnceCell::from(Some(package.to_string())),
            version: OnceCell::from(Some(version.clone())),
            word_size: OnceCell::from(word_size),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn package_name(&self, db: &dyn PackageDatabase) -> Option<&str> {
        self.package
            .get_or_init(|| db.owner_of(&self.path))
            .as_deref()
    }

    pub fn package_version(&self, db: &dyn PackageDatabase) -> Option<&PackageVersion> {
        self.version
            .get_or_init(|| {
                self.package_name(db)
                    .and_then(|name| db.installed_version(name))
            })
            .as_ref()
    }

    pub fn word_size(&self, inspector: &dyn ElfInspector) -> Option<WordSize> {
        *self.word_size.get_or_init(|| {
            let real = std::fs::canonicalize(&self.path).ok()?;
            match inspector.inspect(&real) {
                Ok(info) => info.map(|i| i.word_size),
                Err(e) => {
                    tracing::debug!("{}: {e}", real.display());
                    None
                }
            }
        })
    }
}

/// Library name to providers.
///
/// Updated in build order with [`ShlibIndex::overlay`]; a plain owned value
/// that is never shared between threads.
#[derive(Debug)]
pub struct ShlibIndex {
    map: HashMap<String, Vec<SharedObject>>,
    have_ldconfig: bool,
    prefix: PathBuf,
    db: Arc<dyn PackageDatabase>,
    inspector: Arc<dyn ElfInspector>,
}

impl ShlibIndex {
    /// An empty index that probes `<prefix>/lib` for unknown names.
    pub fn new(
        prefix: impl Into<PathBuf>,
        db: Arc<dyn PackageDatabase>,
        inspector: Arc<dyn ElfInspector>,
    ) -> Self {
        Self {
            map: HashMap::new(),
            have_ldconfig: false,
            prefix: prefix.into(),
            db,
            inspector,
        }
    }

    /// Snapshot the system's linker cache with `ldconfig -p`.
    ///
    /// Without `ldconfig` the index starts empty and probes `<prefix>/lib`.
    ///
    /// # Errors
    ///
    /// Returns [`ShlibError::Index`] if `ldconfig` exists but fails.
    pub fn from_system(
        prefix: impl Into<PathBuf>,
        db: Arc<dyn PackageDatabase>,
        inspector: Arc<dyn ElfInspector>,
    ) -> Result<Self, ShlibError> {
        let mut index = Self::new(prefix, db, inspector);
        let ldconfig = Tool::find("ldconfig")
            .or_else(|_| Tool::find("/sbin/ldconfig"))
            .ok();
        if let Some(ldconfig) = ldconfig {
            let output = ldconfig.run(["-p"])?;
            index.load_ldconfig(&output);
            tracing::debug!("Shlib index holds {} library names", index.map.len());
        } else {
            tracing::warn!("ldconfig not found, probing {}/lib", index.prefix.display());
        }
        Ok(index)
    }

    /// Seed the index from `ldconfig -p` output.
    pub fn load_ldconfig(&mut self, output: &str) {
        self.have_ldconfig = true;
        for (name, path) in Self::parse_ldconfig(output) {
            self.map
                .entry(name)
                .or_default()
                .push(SharedObject::system(path));
        }
    }

    /// Parse `name (flags) => path` lines, skipping hwcap variants and
    /// x32 libraries.
    pub fn parse_ldconfig(output: &str) -> Vec<(String, PathBuf)> {
        output
            .lines()
            .filter_map(|line| LDCONFIG_LINE.captures(line))
            .filter(|caps| !caps[2].contains("hwcap"))
            .filter(|caps| !caps[3].contains("libx"))
            .map(|caps| (caps[1].to_string(), PathBuf::from(&caps[3])))
            .collect()
    }

    /// Providers of `name`.
    pub fn lookup(&mut self, name: &str) -> &[SharedObject] {
        if !self.have_ldconfig && !self.map.contains_key(name) {
            let candidate = self.prefix.join("lib").join(name);
            if candidate.is_file() {
                self.map
                    .entry(name.to_string())
                    .or_default()
                    .push(SharedObject::system(candidate));
            }
        }
        self.map.get(name).map_or(&[], Vec::as_slice)
    }

    /// Register the dynamically linked objects of `package`.
    ///
    /// # Errors
    ///
    /// Returns [`ShlibError::Elf`] if a symlink target cannot be inspected.
    pub fn overlay(&mut self, package: &BinaryPackage) -> Result<(), ShlibError> {
        self.overlay_contents(
            &package.name,
            &package.version,
            &package.contents,
            &package.basedir,
        )
    }

    /// Register every dynamically linked object in `contents` as shipped by
    /// `package` at `version`.
    ///
    /// A record with the same word size is replaced; otherwise the object
    /// is added as an alternative. Symlinks count with their target's
    /// properties; dangling ones are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ShlibError::Elf`] if a symlink target cannot be inspected.
    pub fn overlay_contents(
        &mut self,
        package: &str,
        version: &PackageVersion,
        contents: &Contents,
        basedir: &Path,
    ) -> Result<(), ShlibError> {
        let inspector = Arc::clone(&self.inspector);

        for (path, entry) in contents {
            let stats = if entry.stats.is_symlink() {
                let abs = basedir.join(path.trim_start_matches('/'));
                let Ok(real) = std::fs::canonicalize(&abs) else {
                    continue;
                };
                FileStats::detect(&real, inspector.as_ref())?
            } else {
                entry.stats.clone()
            };

            if !stats.is_dynamically_linked() {
                continue;
            }

            let word_size = stats.word_size();
            let Some(lib_name) = path.rsplit('/').next().filter(|n| !n.is_empty()) else {
                continue;
            };
            let record = SharedObject::packaged(path.as_str(), package, version, word_size);

            let providers = self.map.entry(lib_name.to_string()).or_default();
            match providers
                .iter_mut()
                .find(|o| o.word_size(inspector.as_ref()) == word_size)
            {
                Some(slot) => *slot = record,
                None => providers.push(record),
            }
        }
        Ok(())
    }

    /// Add the runtime dependencies of `package` to its `requires`.
    ///
    /// # Errors
    ///
    /// Returns [`ShlibError::Unresolved`] if a needed library has no
    /// provider of the right word size.
    pub fn shlib_deps(&mut self, package: &mut BinaryPackage) -> Result<(), ShlibError> {
        let found = self.resolve_needed(&package.name, &package.contents, &package.basedir)?;
        let requires = package
            .relations
            .entry(RelationKind::Requires)
            .or_default();
        for dep in found {
            requires.insert(dep);
        }
        Ok(())
    }

    /// Dependencies implied by the `NEEDED` entries of the ELF files in
    /// `contents`, excluding `package` itself.
    ///
    /// # Errors
    ///
    /// Returns [`ShlibError::Unresolved`] if a needed library has no
    /// provider of the right word size.
    pub fn resolve_needed(
        &mut self,
        package: &str,
        contents: &Contents,
        basedir: &Path,
    ) -> Result<DependencySpec, ShlibError> {
        let inspector = Arc::clone(&self.inspector);
        let db = Arc::clone(&self.db);
        let mut requires = DependencySpec::new();

        for (path, entry) in contents {
            if !entry.stats.is_file() || !entry.stats.is_elf() {
                continue;
            }
            let abs = basedir.join(path.trim_start_matches('/'));
            let word_size = entry.stats.word_size();

            for library in inspector.needed(&abs)? {
                let mut found = false;
                for object in self.lookup(&library) {
                    if object.word_size(inspector.as_ref()) != word_size {
                        continue;
                    }
                    found = true;
                    let (Some(name), Some(version)) =
                        (object.package_name(db.as_ref()), object.package_version(db.as_ref()))
                    else {
                        continue;
                    };
                    if name == package {
                        continue;
                    }
                    requires.insert(Dependency::versioned(name, Operator::Ge, version.clone()));
                }

                if !found {
                    return Err(ShlibError::Unresolved {
                        library,
                        binary: path.clone(),
                    });
                }
            }
        }

        Ok(requires)
    }
}
