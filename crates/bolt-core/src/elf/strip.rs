//! Debug symbol separation.
//!
//! Every unstripped ELF file of a package has its debug info copied to
//! `<prefix>/lib/debug/.build-id/<xx>/<rest>.debug` and is then stripped
//! in place. Hardlinked files are processed once.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use crate::contents::Contents;
use crate::elf::ElfInspector;
use crate::error::ElfError;
use crate::tool::{Tool, ToolError};

/// The binutils needed for stripping.
#[derive(Debug, Clone)]
pub struct StripTools {
    pub objcopy: Tool,
    /// Optional; rpath removal is skipped without it.
    pub chrpath: Option<Tool>,
}

impl StripTools {
    pub fn new(objcopy: Tool, chrpath: Option<Tool>) -> Self {
        Self { objcopy, chrpath }
    }

    /// Locate `objcopy` (host-prefixed if available) and `chrpath`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NotFound`] if no `objcopy` is installed.
    pub fn locate(host: Option<&str>, timeout: Option<Duration>) -> Result<Self, ToolError> {
        let objcopy = Tool::find_for_host(host, "objcopy")?.with_timeout(timeout);
        let chrpath = Tool::find("chrpath").ok().map(|t| t.with_timeout(timeout));
        Ok(Self { objcopy, chrpath })
    }
}

/// An entry whose debug info was separated, and where it went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfoLink {
    pub owner: String,
    pub debug_path: String,
}

/// Package path of the debug file for `build_id`.
pub fn debug_path_for(prefix: &str, build_id: &str) -> Option<String> {
    if build_id.len() < 3 || !build_id.is_ascii() {
        return None;
    }
    Some(format!(
        "{}/lib/debug/.build-id/{}/{}.debug",
        prefix.trim_end_matches('/'),
        &build_id[..2],
        &build_id[2..]
    ))
}

/// Separate debug symbols of all unstripped ELF files in `contents` and
/// remove their rpaths.
///
/// Files without a build id are left untouched. Entries are re-stat'ed
/// afterwards, so a second run finds nothing to do.
///
/// # Errors
///
/// Returns [`ElfError::Tool`] if `objcopy` fails and [`ElfError::Io`] on
/// filesystem errors.
pub fn strip_debug_symbols(
    contents: &mut Contents,
    basedir: &Path,
    prefix: &str,
    tools: &StripTools,
    inspector: &dyn ElfInspector,
) -> Result<Vec<DebugInfoLink>, ElfError> {
    let mut seen: HashSet<(u64, u64)> = HashSet::new();
    let mut links = Vec::new();

    for (path, entry) in contents.iter_mut() {
        let stats = &entry.stats;
        if !stats.is_file() || !stats.is_elf() || stats.is_stripped() {
            continue;
        }

        let src = basedir.join(path.trim_start_matches('/'));
        let inode = (stats.device, stats.inode);

        if seen.contains(&inode) {
            // hardlink to something stripped above
            entry.stats.restat(&src, inspector)?;
            continue;
        }

        let Some(debug_path) = stats.build_id().and_then(|id| debug_path_for(prefix, id)) else {
            tracing::warn!("{path}: no build id, leaving debug symbols in place");
            continue;
        };
        seen.insert(inode);

        let dbg = basedir.join(debug_path.trim_start_matches('/'));
        let io_err = |p: &Path| {
            let p = p.to_path_buf();
            move |source: std::io::Error| ElfError::Io { path: p, source }
        };
        if let Some(parent) = dbg.parent() {
            std::fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let perms = stats.permissions();
        let read_only = perms & 0o200 == 0;
        if read_only {
            std::fs::set_permissions(&src, std::fs::Permissions::from_mode(perms | 0o200))
                .map_err(io_err(src.as_path()))?;
        }

        tracing::info!("Stripping {path}");
        let stripped = run_strip_tools(tools, path, &src, &dbg);
        if read_only {
            std::fs::set_permissions(&src, std::fs::Permissions::from_mode(perms))
                .map_err(io_err(src.as_path()))?;
        }
        stripped?;

        entry.stats.restat(&src, inspector)?;
        entry.debug_path = Some(debug_path.clone());
        links.push(DebugInfoLink {
            owner: path.clone(),
            debug_path,
        });
    }

    Ok(links)
}

/// Split off the debug info of `src` into `dbg`, then strip `src`.
fn run_strip_tools(tools: &StripTools, path: &str, src: &Path, dbg: &Path) -> Result<(), ElfError> {
    let tool_err = |source| ElfError::Tool {
        path: src.to_path_buf(),
        source,
    };
    tools
        .objcopy
        .run([OsStr::new("--only-keep-debug"), src.as_os_str(), dbg.as_os_str()])
        .map_err(tool_err)?;
    tools
        .objcopy
        .run([OsStr::new("--strip-unneeded"), src.as_os_str()])
        .map_err(tool_err)?;
    if let Some(chrpath) = &tools.chrpath {
        if let Err(e) = chrpath.run([OsStr::new("-d"), src.as_os_str()]) {
            tracing::debug!("{path}: rpath not removed: {e}");
        }
    }
    Ok(())
}
