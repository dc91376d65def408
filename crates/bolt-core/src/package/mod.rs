//! Binary package descriptors.
//!
//! A [`BinaryPackage`] is built once per `[[package]]` manifest entry. Its
//! life cycle is `prepare()` (resolve contents, separate debug symbols),
//! then [`crate::shlib::ShlibIndex::overlay`], then `pack()` (derive
//! shared-library dependencies and hand the artifacts to a sink).

pub mod debug;
pub mod metadata;
pub mod sink;

use std::collections::BTreeMap;
use std::path::PathBuf;

use bolt_schema::{BinarySpec, Dependency, DependencySpec, PackageVersion, RelationKind};

use crate::contents::{Contents, ResolveOptions, resolve_contents};
use crate::elf::{DebugInfoLink, ElfInspector, StripTools, strip_debug_symbols};
use crate::error::{PackError, RelationError};
use crate::relations::{PackageDatabase, resolve_current_versions};
use crate::shlib::ShlibIndex;

pub use debug::debug_contents;
pub use metadata::{ControlFields, conffiles, control_text, debug_control_text};
pub use sink::{PackageArtifact, PackageSink, TarSink};

const SCRIPT_SHEBANG: &str = "#!/bin/sh -e\n";

/// Settings shared by all binary packages of one build.
#[derive(Debug, Clone)]
pub struct PackageSettings {
    pub source: String,
    pub version: PackageVersion,
    pub maintainer: String,
    pub architecture: String,
    /// Prepended to package and relation names, e.g. `tools-`.
    pub name_prefix: String,
    pub install_prefix: String,
    pub exclude_roots: Vec<String>,
    pub install_dir: PathBuf,
    pub outdir: PathBuf,
    pub make_debug: bool,
}

#[derive(Debug, Clone)]
pub struct BinaryPackage {
    pub name: String,
    pub version: PackageVersion,
    pub section: String,
    pub source: String,
    pub architecture: String,
    pub maintainer: String,
    pub summary: String,
    pub description: String,
    pub relations: BTreeMap<RelationKind, DependencySpec>,
    pub rules: Vec<bolt_schema::ContentRule>,
    /// `(name, body)` in execution order, shebang included.
    pub maintainer_scripts: Vec<(String, String)>,
    pub contents: Contents,
    pub debug_links: Vec<DebugInfoLink>,
    /// Install tree the content rules are resolved against.
    pub basedir: PathBuf,
    pub outdir: PathBuf,
    pub prefix: String,
    pub exclude_roots: Vec<String>,
    pub make_debug: bool,
}

fn prefix_names(spec: &DependencySpec, prefix: &str) -> DependencySpec {
    spec.iter()
        .map(|dep| Dependency {
            name: format!("{prefix}{}", dep.name),
            constraint: dep.constraint.clone(),
        })
        .collect()
}

impl BinaryPackage {
    /// Build the descriptor for `spec`.
    ///
    /// Current-version markers are resolved here, against `build_set` (the
    /// unprefixed names of all packages in this build) and `db`.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::NotInstalled`] if a marker names a foreign
    /// package that is not installed.
    pub fn from_spec<S: AsRef<str>>(
        spec: &BinarySpec,
        settings: &PackageSettings,
        build_set: &[S],
        db: &dyn PackageDatabase,
    ) -> Result<Self, RelationError> {
        let mut relations = spec.relations.clone().into_map();
        for deps in relations.values_mut() {
            resolve_current_versions(deps, build_set, &settings.version, db)?;
            if !settings.name_prefix.is_empty() {
                *deps = prefix_names(deps, &settings.name_prefix);
            }
        }

        let basedir = match spec.content_subdir.as_deref().map(|s| s.trim_matches('/')) {
            Some(subdir) if !subdir.is_empty() => settings.install_dir.join(subdir),
            _ => settings.install_dir.clone(),
        };

        Ok(Self {
            name: format!("{}{}", settings.name_prefix, spec.name),
            version: settings.version.clone(),
            section: spec.section.clone(),
            source: settings.source.clone(),
            architecture: settings.architecture.clone(),
            maintainer: settings.maintainer.clone(),
            summary: spec.summary.clone(),
            description: spec.description.clone(),
            relations,
            rules: spec.contents.clone(),
            maintainer_scripts: spec
                .maintainer_scripts
                .iter()
                .map(|(name, body)| (name.to_string(), format!("{SCRIPT_SHEBANG}{body}")))
                .collect(),
            contents: Contents::new(),
            debug_links: Vec::new(),
            basedir,
            outdir: settings.outdir.clone(),
            prefix: settings.install_prefix.clone(),
            exclude_roots: settings.exclude_roots.clone(),
            make_debug: settings.make_debug,
        })
    }

    /// Resolve the contents and separate debug symbols.
    ///
    /// # Errors
    ///
    /// Returns [`PackError::Resolve`] for a bad content rule and
    /// [`PackError::Elf`] if stripping fails.
    pub fn prepare(
        &mut self,
        inspector: &dyn ElfInspector,
        tools: &StripTools,
    ) -> Result<(), PackError> {
        tracing::info!("Preparing {}", self.name);
        let opts = ResolveOptions {
            prefix: self.prefix.clone(),
            exclude_roots: self.exclude_roots.clone(),
        };
        self.contents = resolve_contents(&self.rules, &self.basedir, &opts, inspector)?;
        self.debug_links =
            strip_debug_symbols(&mut self.contents, &self.basedir, &self.prefix, tools, inspector)?;
        Ok(())
    }

    /// Package file name: `<name>[-dbg]_<upstream>[-<revision>]_<arch>.bolt`.
    pub fn filename(&self, debug: bool) -> String {
        let suffix = if debug { "-dbg" } else { "" };
        format!(
            "{}{suffix}_{}_{}.bolt",
            self.name,
            self.version.without_epoch(),
            self.architecture
        )
    }

    fn control_fields<'a>(&'a self, version: &'a str) -> ControlFields<'a> {
        ControlFields {
            package: &self.name,
            version,
            source: &self.source,
            architecture: &self.architecture,
            maintainer: &self.maintainer,
            section: &self.section,
            relations: &self.relations,
            summary: &self.summary,
            description: &self.description,
        }
    }

    /// The main package artifact.
    pub fn artifact(&self) -> PackageArtifact {
        let version = self.version.to_string();
        PackageArtifact {
            name: self.name.clone(),
            filename: self.filename(false),
            control: control_text(&self.control_fields(&version)),
            conffiles: conffiles(&self.contents, &self.basedir),
            scripts: self.maintainer_scripts.clone(),
            contents: self.contents.clone(),
            basedir: self.basedir.clone(),
        }
    }

    /// The `-dbg` artifact, if any debug info was separated.
    ///
    /// # Errors
    ///
    /// Returns [`PackError::Elf`] if a debug file cannot be stat'ed.
    pub fn debug_artifact(
        &self,
        inspector: &dyn ElfInspector,
    ) -> Result<Option<PackageArtifact>, PackError> {
        let contents = debug_contents(&self.contents, &self.basedir, &self.prefix, inspector)?;
        if contents.is_empty() {
            return Ok(None);
        }
        let version = self.version.to_string();
        Ok(Some(PackageArtifact {
            name: format!("{}-dbg", self.name),
            filename: self.filename(true),
            control: debug_control_text(&self.control_fields(&version)),
            conffiles: Vec::new(),
            scripts: Vec::new(),
            contents,
            basedir: self.basedir.clone(),
        }))
    }

    /// Add shared-library dependencies and write the package files.
    ///
    /// Returns the written files, main package first.
    ///
    /// # Errors
    ///
    /// Returns [`PackError::Shlib`] for an unresolvable `NEEDED` entry and
    /// [`PackError::Sink`] if writing fails.
    pub fn pack(
        &mut self,
        index: &mut ShlibIndex,
        inspector: &dyn ElfInspector,
        sink: &dyn PackageSink,
    ) -> Result<Vec<PathBuf>, PackError> {
        index.shlib_deps(self)?;

        let mut written = vec![sink.write(&self.artifact(), &self.outdir)?];
        if self.make_debug {
            if let Some(debug) = self.debug_artifact(inspector)? {
                written.push(sink.write(&debug, &self.outdir)?);
            }
        }
        for path in &written {
            tracing::info!("Packed {}", path.display());
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::NativeInspector;
    use crate::elf::fixture::ElfFixture;
    use crate::elf::strip::tests::fake_tools;
    use crate::relations::InMemoryDatabase;
    use bolt_schema::{Manifest, WordSize};
    use std::path::Path;
    use std::sync::Arc;

    const MANIFEST: &str = r#"
[source]
name = "hello"

[[changelog]]
epoch = 1
version = "2.10"
revision = "3"

[[package]]
name = "hello"
section = "utils"
summary = "greets"
relations.requires = "hello-data (==)"
contents = [
    { type = "file", path = "${prefix}/bin" },
    { type = "file", path = "/etc/hello.conf" },
]
maintainer_scripts.postinst = "ldconfig\n"

[[package]]
name = "libhello"
contents = [{ type = "file", path = "${prefix}/lib/libhello.so*" }]
"#;

    fn settings(install_dir: &Path, outdir: &Path, prefix: &str) -> PackageSettings {
        PackageSettings {
            source: "hello".to_string(),
            version: "1:2.10-3".parse().unwrap(),
            maintainer: "Jane Doe <jane@example.org>".to_string(),
            architecture: "x86_64".to_string(),
            name_prefix: prefix.to_string(),
            install_prefix: "/usr".to_string(),
            exclude_roots: Vec::new(),
            install_dir: install_dir.to_path_buf(),
            outdir: outdir.to_path_buf(),
            make_debug: true,
        }
    }

    fn descriptors(settings: &PackageSettings) -> Vec<BinaryPackage> {
        let manifest = Manifest::from_toml(MANIFEST).unwrap();
        let build_set = ["hello", "libhello", "hello-data"];
        manifest
            .packages
            .iter()
            .map(|spec| {
                BinaryPackage::from_spec(spec, settings, &build_set, &InMemoryDatabase::new())
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_from_spec_prefixes_after_resolving_markers() {
        let settings = settings(Path::new("/work/install"), Path::new("/out"), "tools-");
        let pkgs = descriptors(&settings);
        let hello = &pkgs[0];
        assert_eq!(hello.name, "tools-hello");
        assert_eq!(
            hello.relations[&RelationKind::Requires].to_string(),
            "tools-hello-data (= 1:2.10-3)"
        );
        assert_eq!(
            hello.maintainer_scripts,
            [("postinst".to_string(), "#!/bin/sh -e\nldconfig\n".to_string())]
        );
        assert_eq!(hello.filename(false), "tools-hello_2.10-3_x86_64.bolt");
    }

    #[test]
    fn test_content_subdir_moves_basedir() {
        let mut manifest = Manifest::from_toml(MANIFEST).unwrap();
        manifest.packages[0].content_subdir = Some("/hello/".to_string());
        let settings = settings(Path::new("/work/install"), Path::new("/out"), "");
        let pkg = BinaryPackage::from_spec(
            &manifest.packages[0],
            &settings,
            &["hello", "hello-data"],
            &InMemoryDatabase::new(),
        )
        .unwrap();
        assert_eq!(pkg.basedir, PathBuf::from("/work/install/hello"));
    }

    #[test]
    fn test_prepare_overlay_pack() {
        let dir = tempfile::tempdir().unwrap();
        let (tools, _log) = fake_tools(dir.path());
        let install = dir.path().join("install");
        let out = dir.path().join("out");
        let sys = dir.path().join("sys");
        std::fs::create_dir_all(install.join("usr/bin")).unwrap();
        std::fs::create_dir_all(install.join("usr/lib")).unwrap();
        std::fs::create_dir_all(install.join("etc")).unwrap();
        std::fs::create_dir_all(&sys).unwrap();

        ElfFixture::new(WordSize::Bits64)
            .symtab()
            .dynamic(&["libc.so.6"])
            .build_id(&[0xab, 0xcd, 0xef, 0x01])
            .write(&install.join("usr/bin/prog"));
        ElfFixture::new(WordSize::Bits64)
            .dynamic(&["libhello.so.1"])
            .write(&install.join("usr/bin/helper"));
        ElfFixture::new(WordSize::Bits64)
            .dynamic(&["libc.so.6"])
            .write(&install.join("usr/lib/libhello.so.1"));
        std::fs::write(install.join("etc/hello.conf"), "greeting=hi\n").unwrap();
        ElfFixture::new(WordSize::Bits64)
            .dynamic(&[])
            .write(&sys.join("libc.so.6"));

        let db = InMemoryDatabase::new()
            .with_package("libc6", "2.36-9".parse().unwrap())
            .with_owner(sys.join("libc.so.6"), "libc6");
        let mut index = ShlibIndex::new("/usr", Arc::new(db), Arc::new(NativeInspector));
        index.load_ldconfig(&format!(
            "\tlibc.so.6 (libc6,x86-64) => {}\n",
            sys.join("libc.so.6").display()
        ));

        let mut pkgs = descriptors(&settings(&install, &out, ""));
        for pkg in &mut pkgs {
            pkg.prepare(&NativeInspector, &tools).unwrap();
            index.overlay(pkg).unwrap();
        }
        assert_eq!(pkgs[0].debug_links.len(), 1);
        assert!(pkgs[1].debug_links.is_empty());

        let mut written = Vec::new();
        for pkg in &mut pkgs {
            written.extend(pkg.pack(&mut index, &NativeInspector, &TarSink).unwrap());
        }
        let names: Vec<String> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            [
                "hello_2.10-3_x86_64.bolt",
                "hello-dbg_2.10-3_x86_64.bolt",
                "libhello_2.10-3_x86_64.bolt",
            ]
        );

        let outer = sink::tests::members(&std::fs::read(&written[0]).unwrap());
        let control = sink::tests::members(&outer["control.tar.gz"]);
        let text = String::from_utf8(control["control"].clone()).unwrap();
        assert!(text.contains(
            "Depends: hello-data (= 1:2.10-3), libhello (>= 1:2.10-3), libc6 (>= 2.36-9)\n"
        ));
        assert_eq!(control["conffiles"], b"/etc/hello.conf\n");
        assert_eq!(control["postinst"], b"#!/bin/sh -e\nldconfig\n");

        let data = sink::tests::members(&outer["data.tar.gz"]);
        assert!(data.contains_key("usr/bin/prog"));
        assert!(!data.keys().any(|k| k.contains(".build-id")));

        let dbg = sink::tests::members(&std::fs::read(&written[1]).unwrap());
        let dbg_data = sink::tests::members(&dbg["data.tar.gz"]);
        assert!(dbg_data.contains_key("usr/lib/debug/.build-id/ab/cdef01.debug"));
        let dbg_control = sink::tests::members(&dbg["control.tar.gz"]);
        assert!(
            String::from_utf8_lossy(&dbg_control["control"])
                .contains("Depends: hello (= 1:2.10-3)\n")
        );

        // libhello needs only libc; the library it ships is its own
        let lib_control = sink::tests::members(
            &sink::tests::members(&std::fs::read(&written[2]).unwrap())["control.tar.gz"],
        );
        assert!(
            String::from_utf8_lossy(&lib_control["control"]).contains("Depends: libc6 (>= 2.36-9)\n")
        );
    }
}
