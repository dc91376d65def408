//! `bolt-pack` - build binary packages from a bolt manifest.
//!
//! Runs one or more build actions (`unpack`, `prepare`, `build`, `install`,
//! `package`, `repackage`, `clean`, `default`) for the manifest in the
//! current directory. `list_deps` prints the build dependencies instead.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use bolt_core::elf::NativeInspector;
use bolt_core::package::TarSink;
use bolt_core::relations::DpkgDatabase;
use bolt_core::source::Platform;
use bolt_core::{Action, BoltConfig, BuildOptions, Context, PackageControl, TracingReporter};
use bolt_schema::{BuildFor, Manifest};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// One command line action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    ListDeps,
    Run(Action),
}

impl FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "list_deps" | "list-deps" => Ok(Self::ListDeps),
            other => other.parse().map(Self::Run),
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Build binary packages from a bolt manifest", long_about = None)]
struct Args {
    /// Actions to run, in order
    #[arg(default_value = "default")]
    actions: Vec<Step>,

    /// Path to the package manifest
    #[arg(short = 'f', long, default_value = "package.toml")]
    manifest: PathBuf,

    /// Build flavour: target, tools or cross-tools
    #[arg(long, default_value = "target")]
    build_for: BuildFor,

    /// Only build this binary package (repeatable)
    #[arg(short, long = "package")]
    packages: Vec<String>,

    /// Skip the build dependency check
    #[arg(long, default_value_t = false)]
    ignore_deps: bool,

    /// Do not build `-dbg` packages
    #[arg(long, default_value_t = false)]
    no_debug_pkgs: bool,

    /// Where to place the package files
    #[arg(short, long, default_value = "..")]
    outdir: PathBuf,

    /// Working directory for sources and the install tree
    #[arg(short, long, default_value = ".")]
    work_dir: PathBuf,

    /// Configuration file (defaults to `$BOLT_HOME/config.json`)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: Option<&Path>) -> Result<BoltConfig> {
    match path {
        Some(path) => BoltConfig::load(path),
        None => BoltConfig::load_default(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = load_config(args.config.as_deref())?;
    let manifest = Manifest::load(&args.manifest)
        .with_context(|| format!("Failed to load {}", args.manifest.display()))?;
    let manifest_path = std::path::absolute(&args.manifest)?;
    let manifest_dir = manifest_path
        .parent()
        .map_or_else(|| PathBuf::from("/"), Path::to_path_buf);
    let work_dir = std::path::absolute(&args.work_dir)?;
    let outdir = std::path::absolute(&args.outdir)?;

    let platform = Platform::detect(config.tool_timeout());
    tracing::debug!("Building on {}", platform.target_type());
    let db = DpkgDatabase::load().context("Failed to read the package database")?;

    let options = BuildOptions {
        build_for: args.build_for,
        packages: args.packages,
        ignore_deps: args.ignore_deps,
        debug_packages: config.debug_packages && !args.no_debug_pkgs,
        outdir,
    };
    let ctx = Context::new(
        config,
        platform,
        Arc::new(db),
        Arc::new(NativeInspector),
        Arc::new(TarSink),
        Arc::new(TracingReporter),
    );
    let mut control = PackageControl::new(manifest, manifest_dir, work_dir, options, ctx)?;

    for step in args.actions {
        match step {
            Step::ListDeps => println!("{}", control.list_deps()),
            Step::Run(action) => {
                let written = control
                    .run(action)
                    .await
                    .with_context(|| format!("Action '{action}' failed"))?;
                for path in written {
                    println!("{}", path.display());
                }
            }
        }
    }
    Ok(())
}
