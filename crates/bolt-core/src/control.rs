//! Build orchestration.
//!
//! [`PackageControl`] turns a [`Manifest`] into a sequence of actions:
//! fetch and unpack the sources, run the build phases, and assemble the
//! binary packages. Binary package descriptors are created up front, so a
//! bad package filter or an unresolvable relation fails before any phase
//! runs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use bolt_schema::{BuildFor, DependencySpec, Manifest, PackageVersion};

use crate::config::BoltConfig;
use crate::elf::{ElfInspector, StripTools};
use crate::error::{ControlError, PackError, SourceError};
use crate::package::{BinaryPackage, PackageSettings, PackageSink};
use crate::relations::{PackageDatabase, check_build_dependencies};
use crate::reporter::Reporter;
use crate::shlib::ShlibIndex;
use crate::source::{
    Phase, PhaseRunner, Platform, SourceCache, SourceFetcher, apply_patches, unpack_archive,
};
use crate::tool::Tool;

const SOURCE_DIR: &str = "BOLT_SOURCE_DIR";
const BUILD_DIR: &str = "BOLT_BUILD_DIR";
const INSTALL_DIR: &str = "BOLT_INSTALL_DIR";

/// A step of the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Unpack,
    Prepare,
    Build,
    Install,
    Package,
    /// `install` followed by `package`.
    Repackage,
    Clean,
    /// `unpack` through `package`.
    Default,
}

impl Action {
    pub const ALL: [Self; 8] = [
        Self::Unpack,
        Self::Prepare,
        Self::Build,
        Self::Install,
        Self::Package,
        Self::Repackage,
        Self::Clean,
        Self::Default,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unpack => "unpack",
            Self::Prepare => "prepare",
            Self::Build => "build",
            Self::Install => "install",
            Self::Package => "package",
            Self::Repackage => "repackage",
            Self::Clean => "clean",
            Self::Default => "default",
        }
    }

    fn needs_build_dependencies(self) -> bool {
        self != Self::Clean
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown action '{s}'"))
    }
}

/// Per-invocation switches.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub build_for: BuildFor,
    /// Only build these binary packages (unprefixed names); empty means all.
    pub packages: Vec<String>,
    pub ignore_deps: bool,
    pub debug_packages: bool,
    pub outdir: PathBuf,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            build_for: BuildFor::Target,
            packages: Vec::new(),
            ignore_deps: false,
            debug_packages: true,
            outdir: PathBuf::from(".."),
        }
    }
}

/// Capabilities the orchestrator works with.
#[derive(Clone)]
pub struct Context {
    pub config: BoltConfig,
    pub platform: Platform,
    pub db: Arc<dyn PackageDatabase>,
    pub inspector: Arc<dyn ElfInspector>,
    pub sink: Arc<dyn PackageSink>,
    pub reporter: Arc<dyn Reporter>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("platform", &self.platform)
            .field("db", &self.db)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(
        config: BoltConfig,
        platform: Platform,
        db: Arc<dyn PackageDatabase>,
        inspector: Arc<dyn ElfInspector>,
        sink: Arc<dyn PackageSink>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            config,
            platform,
            db,
            inspector,
            sink,
            reporter,
        }
    }
}

/// The `BOLT_*` variables exported to build phases.
///
/// Directory variables are made absolute against `work_dir`; manifest
/// defines may override anything else.
pub fn build_defines(
    manifest: &Manifest,
    build_for: BuildFor,
    platform: &Platform,
    install_prefix: &str,
    work_dir: &Path,
) -> BTreeMap<String, String> {
    let target_type = platform.target_type().to_string();
    let tools_type = platform.tools_type();
    let (host_type, target) = match build_for {
        BuildFor::Target => (target_type.clone(), target_type.clone()),
        BuildFor::Tools => (tools_type.clone(), tools_type),
        BuildFor::CrossTools => (tools_type, target_type.clone()),
    };

    let mut defines: BTreeMap<String, String> = [
        (SOURCE_DIR, "sources".to_string()),
        (BUILD_DIR, "sources".to_string()),
        (INSTALL_DIR, "install".to_string()),
        ("BOLT_WORK_DIR", work_dir.display().to_string()),
        ("BOLT_BUILD_TYPE", target_type),
        ("BOLT_BUILD_FOR", build_for.as_str().to_string()),
        ("BOLT_HOST_TYPE", host_type),
        ("BOLT_TARGET_TYPE", target),
        ("BOLT_INSTALL_PREFIX", install_prefix.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    defines.extend(manifest.defines.clone());

    for key in [SOURCE_DIR, BUILD_DIR, INSTALL_DIR] {
        if let Some(value) = defines.get_mut(key) {
            *value = work_dir.join(&*value).display().to_string();
        }
    }
    defines
}

/// Drives one source package through its build.
pub struct PackageControl {
    manifest: Manifest,
    manifest_dir: PathBuf,
    work_dir: PathBuf,
    options: BuildOptions,
    ctx: Context,
    version: PackageVersion,
    defines: BTreeMap<String, String>,
    packages: Vec<BinaryPackage>,
    strip_tools: Option<StripTools>,
    patch_tool: Option<Tool>,
    shlib_index: Option<ShlibIndex>,
}

impl fmt::Debug for PackageControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageControl")
            .field("source", &self.manifest.source.name)
            .field("version", &self.version)
            .field("work_dir", &self.work_dir)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl PackageControl {
    /// Set up the build of `manifest` in `work_dir`.
    ///
    /// `manifest_dir` anchors relative patch paths.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Manifest`] without a valid release,
    /// [`ControlError::UnknownPackage`] if the package filter names a
    /// package the manifest does not define, and
    /// [`ControlError::Relation`] for a current-version marker that cannot
    /// be resolved.
    pub fn new(
        manifest: Manifest,
        manifest_dir: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        options: BuildOptions,
        ctx: Context,
    ) -> Result<Self, ControlError> {
        let work_dir = work_dir.into();
        let release = manifest.release()?;
        let version = release.package_version().map_err(bolt_schema::ManifestError::from)?;

        for name in &options.packages {
            if !manifest.packages.iter().any(|p| &p.name == name) {
                return Err(ControlError::UnknownPackage(name.clone()));
            }
        }

        let policy = &ctx.config.tools;
        let build_for = options.build_for;
        let install_prefix = policy.install_prefix(build_for).to_string();
        let defines = build_defines(&manifest, build_for, &ctx.platform, &install_prefix, &work_dir);

        let architecture = if build_for.is_tools() {
            "tools".to_string()
        } else if manifest.source.architecture_independent {
            "all".to_string()
        } else {
            ctx.platform.target_machine().to_string()
        };

        let settings = PackageSettings {
            source: manifest.source.name.clone(),
            version: version.clone(),
            maintainer: release.maintainer_line(),
            architecture,
            name_prefix: policy.name_prefix(build_for).to_string(),
            install_prefix,
            exclude_roots: policy.excluded_roots(build_for),
            install_dir: PathBuf::from(&defines[INSTALL_DIR]),
            outdir: options.outdir.clone(),
            make_debug: options.debug_packages,
        };

        let build_set: Vec<&str> = manifest.packages.iter().map(|p| p.name.as_str()).collect();
        let mut packages = Vec::new();
        for spec in &manifest.packages {
            if !options.packages.is_empty() && !options.packages.contains(&spec.name) {
                continue;
            }
            if !spec.build_for.is_empty() && !spec.build_for.contains(&build_for) {
                tracing::debug!("Skipping {}: not built for {build_for}", spec.name);
                continue;
            }
            packages.push(BinaryPackage::from_spec(spec, &settings, &build_set, ctx.db.as_ref())?);
        }

        Ok(Self {
            manifest,
            manifest_dir: manifest_dir.into(),
            work_dir,
            options,
            ctx,
            version,
            defines,
            packages,
            strip_tools: None,
            patch_tool: None,
            shlib_index: None,
        })
    }

    /// Use these binutils instead of locating them on `PATH`.
    pub fn with_strip_tools(mut self, tools: StripTools) -> Self {
        self.strip_tools = Some(tools);
        self
    }

    pub fn with_patch_tool(mut self, patch: Tool) -> Self {
        self.patch_tool = Some(patch);
        self
    }

    /// Start packaging from `index` instead of the system linker cache.
    pub fn with_shlib_index(mut self, index: ShlibIndex) -> Self {
        self.shlib_index = Some(index);
        self
    }

    pub fn defines(&self) -> &BTreeMap<String, String> {
        &self.defines
    }

    pub fn packages(&self) -> &[BinaryPackage] {
        &self.packages
    }

    pub fn version(&self) -> &PackageVersion {
        &self.version
    }

    /// The declared build dependencies.
    pub fn list_deps(&self) -> &DependencySpec {
        &self.manifest.source.requires
    }

    fn dir(&self, key: &str) -> PathBuf {
        self.defines
            .get(key)
            .map_or_else(|| self.work_dir.clone(), PathBuf::from)
    }

    pub fn source_dir(&self) -> PathBuf {
        self.dir(SOURCE_DIR)
    }

    pub fn build_dir(&self) -> PathBuf {
        self.dir(BUILD_DIR)
    }

    pub fn install_dir(&self) -> PathBuf {
        self.dir(INSTALL_DIR)
    }

    fn runner(&self) -> PhaseRunner {
        PhaseRunner::new(
            self.manifest.source.rules.clone(),
            self.ctx.platform.clone(),
            self.ctx.config.helpers_path.clone(),
        )
        .with_timeout(self.ctx.config.phase_timeout())
        .with_reporter(Arc::clone(&self.ctx.reporter))
    }

    /// Run `action`. Returns the package files written, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Relation`] if build dependencies are
    /// missing, or the error of the first step that fails.
    pub async fn run(&mut self, action: Action) -> Result<Vec<PathBuf>, ControlError> {
        if action.needs_build_dependencies() && !self.options.ignore_deps {
            check_build_dependencies(&self.manifest.source.requires, self.ctx.db.as_ref())?;
        }

        match action {
            Action::Unpack => self.unpack().await.map(|()| Vec::new()),
            Action::Prepare => self.run_phase(Phase::Prepare).map(|()| Vec::new()),
            Action::Build => self.run_phase(Phase::Build).map(|()| Vec::new()),
            Action::Install => self.install().map(|()| Vec::new()),
            Action::Package => self.package(),
            Action::Repackage => {
                self.install()?;
                self.package()
            }
            Action::Clean => self.run_phase(Phase::Clean).map(|()| Vec::new()),
            Action::Default => {
                self.unpack().await?;
                self.run_phase(Phase::Prepare)?;
                self.run_phase(Phase::Build)?;
                self.install()?;
                self.package()
            }
        }
    }

    /// Retrieve and unpack every source archive, then apply the patches.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Source`] if an archive cannot be retrieved
    /// or unpacked, or a patch does not apply.
    pub async fn unpack(&self) -> Result<(), ControlError> {
        let source = &self.manifest.source;
        let upstream = self.version.upstream();

        std::fs::create_dir_all(&self.work_dir)?;
        let fetcher = SourceFetcher::new(
            SourceCache::new(self.ctx.config.cache_dir()),
            self.ctx.config.repositories.clone(),
            Arc::clone(&self.ctx.reporter),
        )
        .map_err(SourceError::from)?;

        for file in &source.files {
            let archive = fetcher
                .retrieve(&source.name, upstream, file)
                .await
                .map_err(SourceError::from)?;
            let dest = self.work_dir.join(file.subdir.trim_start_matches('/'));
            self.ctx.reporter.unpacking(&source.name, upstream, &file.name);
            unpack_archive(&archive, &dest)?;
        }

        let series = source.patch_series();
        if !series.is_empty() {
            let patch = match &self.patch_tool {
                Some(tool) => tool.clone(),
                None => Tool::find("patch")?.with_timeout(self.ctx.config.tool_timeout()),
            };
            apply_patches(&series, &self.manifest_dir, &self.work_dir, &patch)?;
        }
        Ok(())
    }

    /// Run a build phase, creating the build dir first.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Source`] if the phase fails.
    pub fn run_phase(&self, phase: Phase) -> Result<(), ControlError> {
        if phase != Phase::Clean {
            std::fs::create_dir_all(self.build_dir())?;
        }
        self.runner().run(phase, &self.defines, &self.work_dir)?;
        Ok(())
    }

    /// Recreate the install dir and run the install phase.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Io`] if the install dir cannot be reset, or
    /// [`ControlError::Source`] if the phase fails.
    pub fn install(&self) -> Result<(), ControlError> {
        let install_dir = self.install_dir();
        if install_dir.exists() {
            std::fs::remove_dir_all(&install_dir)?;
        }
        std::fs::create_dir_all(&install_dir)?;
        self.runner().run(Phase::Install, &self.defines, &self.work_dir)?;
        Ok(())
    }

    fn strip_tools(&self) -> Result<StripTools, ControlError> {
        if let Some(tools) = &self.strip_tools {
            return Ok(tools.clone());
        }
        let host = self.defines.get("BOLT_HOST_TYPE").map(String::as_str);
        Ok(StripTools::locate(host, self.ctx.config.tool_timeout())?)
    }

    /// Prepare every package, index its libraries, then pack them all.
    ///
    /// A package whose content rules do not resolve is reported and the
    /// others are still prepared; packing only starts if all succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::PrepareFailed`] naming the packages that
    /// could not be prepared, or [`ControlError::Pack`] for the first
    /// package that fails to pack.
    pub fn package(&mut self) -> Result<Vec<PathBuf>, ControlError> {
        self.ctx.reporter.phase("package");
        let tools = self.strip_tools()?;
        let inspector = Arc::clone(&self.ctx.inspector);

        let mut index = match self.shlib_index.take() {
            Some(index) => index,
            None => ShlibIndex::from_system(
                &self.defines["BOLT_INSTALL_PREFIX"],
                Arc::clone(&self.ctx.db),
                Arc::clone(&inspector),
            )?,
        };

        let mut failed = Vec::new();
        for pkg in &mut self.packages {
            match pkg.prepare(inspector.as_ref(), &tools) {
                Ok(()) => {}
                Err(PackError::Resolve(e)) => {
                    self.ctx.reporter.warning(&format!("{}: {e}", pkg.name));
                    failed.push(pkg.name.clone());
                    continue;
                }
                Err(source) => {
                    return Err(ControlError::Pack {
                        package: pkg.name.clone(),
                        source,
                    });
                }
            }
            index.overlay(pkg)?;
        }
        if !failed.is_empty() {
            return Err(ControlError::PrepareFailed(failed));
        }

        let mut written = Vec::new();
        for pkg in &mut self.packages {
            let files = pkg
                .pack(&mut index, inspector.as_ref(), self.ctx.sink.as_ref())
                .map_err(|source| ControlError::Pack {
                    package: pkg.name.clone(),
                    source,
                })?;
            for path in &files {
                self.ctx.reporter.packed(&pkg.name, path);
            }
            written.extend(files);
        }
        Ok(written)
    }
}
