//! Contents of the `-dbg` companion package.

use std::path::Path;

use crate::contents::{Contents, EntryKind, FileStats, ResolvedEntry, parent_path};
use crate::elf::ElfInspector;
use crate::error::ElfError;

fn root_owned(kind: EntryKind, mode: u32, stats: FileStats) -> ResolvedEntry {
    ResolvedEntry {
        kind,
        mode: Some(mode),
        owner: Some("root".to_string()),
        group: Some("root".to_string()),
        conffile: Some(false),
        stats,
        debug_path: None,
    }
}

/// The debug files separated from `contents`, with their directories.
///
/// Returns an empty listing when nothing was stripped, in which case no
/// debug package is built.
///
/// # Errors
///
/// Returns [`ElfError::Io`] if a debug file vanished from `basedir`.
pub fn debug_contents(
    contents: &Contents,
    basedir: &Path,
    prefix: &str,
    inspector: &dyn ElfInspector,
) -> Result<Contents, ElfError> {
    let mut debug = Contents::new();

    for entry in contents.values() {
        if !(entry.stats.is_file() && entry.stats.is_elf()) {
            continue;
        }
        let Some(debug_path) = entry.debug_path.as_deref() else {
            continue;
        };

        if let Some(dir) = parent_path(debug_path) {
            debug
                .entry(dir.to_string())
                .or_insert_with(|| root_owned(EntryKind::Dir, 0o755, FileStats::default_dir()));
        }
        if !debug.contains_key(debug_path) {
            let stats = FileStats::detect(&basedir.join(debug_path.trim_start_matches('/')), inspector)?;
            debug.insert(debug_path.to_string(), root_owned(EntryKind::File, 0o644, stats));
        }
    }

    if debug.is_empty() {
        return Ok(debug);
    }

    let prefix = prefix.trim_end_matches('/');
    for dir in [format!("{prefix}/lib/debug"), format!("{prefix}/lib/debug/.build-id")] {
        debug
            .entry(dir)
            .or_insert_with(|| root_owned(EntryKind::Dir, 0o755, FileStats::default_dir()));
    }
    Ok(debug)
}
