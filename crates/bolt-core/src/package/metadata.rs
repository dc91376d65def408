//! Control file rendering.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;

use bolt_schema::{DependencySpec, RelationKind};

use crate::contents::{Contents, EntryKind};

/// The fields of a binary package's `control` file.
#[derive(Debug, Clone, Copy)]
pub struct ControlFields<'a> {
    pub package: &'a str,
    pub version: &'a str,
    pub source: &'a str,
    pub architecture: &'a str,
    pub maintainer: &'a str,
    pub section: &'a str,
    pub relations: &'a BTreeMap<RelationKind, DependencySpec>,
    pub summary: &'a str,
    pub description: &'a str,
}

/// Long description in control-file continuation syntax.
///
/// Every line is indented by one space; blank lines become ` .`.
pub fn format_description(text: &str) -> String {
    text.trim()
        .lines()
        .map(|line| {
            let line = line.trim_end();
            if line.is_empty() {
                " .".to_string()
            } else {
                format!(" {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn control_text(fields: &ControlFields<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Package: {}", fields.package);
    let _ = writeln!(out, "Version: {}", fields.version);
    let _ = writeln!(out, "Source: {}", fields.source);
    let _ = writeln!(out, "Architecture: {}", fields.architecture);
    let _ = writeln!(out, "Maintainer: {}", fields.maintainer);
    let _ = writeln!(out, "Section: {}", fields.section);

    for kind in RelationKind::ALL {
        if let Some(spec) = fields.relations.get(&kind).filter(|s| !s.is_empty()) {
            let _ = writeln!(out, "{}: {spec}", kind.control_field());
        }
    }

    let _ = writeln!(out, "Description: {}", fields.summary.trim());
    let long = format_description(fields.description);
    if !long.is_empty() {
        let _ = writeln!(out, "{long}");
    }
    out
}

/// Control text of the `-dbg` companion of `fields.package`.
pub fn debug_control_text(fields: &ControlFields<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Package: {}-dbg", fields.package);
    let _ = writeln!(out, "Version: {}", fields.version);
    let _ = writeln!(out, "Source: {}", fields.source);
    let _ = writeln!(out, "Architecture: {}", fields.architecture);
    let _ = writeln!(out, "Maintainer: {}", fields.maintainer);
    let _ = writeln!(out, "Section: debug");
    let _ = writeln!(out, "Depends: {} (= {})", fields.package, fields.version);
    let _ = writeln!(
        out,
        "Description: debug symbols for ELF binaries in package '{}'",
        fields.package
    );
    out
}

/// Package paths to register as configuration files.
///
/// Only regular files on disk qualify. An explicit flag wins; without one,
/// everything under `/etc/` is a conffile.
pub fn conffiles(contents: &Contents, basedir: &Path) -> Vec<String> {
    contents
        .iter()
        .filter(|(_, entry)| entry.kind != EntryKind::Dir && !entry.stats.is_dir())
        .filter(|(_, entry)| entry.conffile != Some(false))
        .filter(|(path, _)| {
            let real = basedir.join(path.trim_start_matches('/'));
            std::fs::symlink_metadata(&real).is_ok_and(|m| m.file_type().is_file())
        })
        .filter(|(path, entry)| entry.conffile.unwrap_or_else(|| path.starts_with("/etc/")))
        .map(|(path, _)| path.clone())
        .collect()
}
