//! Content resolution: turn a package's content rules into the concrete
//! list of filesystem entries it ships.
//!
//! Rules are applied in declaration order against the install tree. A
//! `file` rule names a single file or symlink, a real directory (shipped
//! recursively) or a glob pattern with optional `{a,b}` alternation. A
//! `dir` rule declares a directory without looking at the disk. The result
//! is keyed by absolute package path, so it is sorted and free of
//! duplicates by construction.

mod brace;
mod stats;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bolt_schema::{ContentRule, ContentRuleKind};
use walkdir::WalkDir;

use crate::config::is_under_any;
use crate::elf::ElfInspector;
use crate::error::{ElfError, ResolveError};

pub use brace::expand_braces;
pub use stats::{FileKind, FileStats};

/// Resolved contents of a binary package, keyed by absolute package path.
pub type Contents = BTreeMap<String, ResolvedEntry>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

impl EntryKind {
    fn from_stats(stats: &FileStats) -> Self {
        match stats.kind {
            FileKind::Dir => Self::Dir,
            FileKind::Symlink => Self::Symlink,
            FileKind::File | FileKind::Other => Self::File,
        }
    }
}

/// One entry of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    pub kind: EntryKind,
    /// Explicit permission bits; `None` keeps what is on disk.
    pub mode: Option<u32>,
    pub owner: Option<String>,
    pub group: Option<String>,
    /// `None` means "decide from the path" (files under `/etc/`).
    pub conffile: Option<bool>,
    pub stats: FileStats,
    /// Package path of the separated debug info, once stripped.
    pub debug_path: Option<String>,
}

impl ResolvedEntry {
    fn from_rule(rule: &ContentRule, kind: EntryKind, stats: FileStats) -> Self {
        Self {
            kind,
            mode: rule.mode,
            owner: rule.owner.clone(),
            group: rule.group.clone(),
            conffile: rule.conffile,
            stats,
            debug_path: None,
        }
    }

    /// A directory entry with default attributes.
    pub fn directory(stats: FileStats) -> Self {
        Self {
            kind: EntryKind::Dir,
            mode: None,
            owner: None,
            group: None,
            conffile: Some(false),
            stats,
            debug_path: None,
        }
    }

    /// Permission bits to record in the package.
    pub fn effective_mode(&self) -> u32 {
        self.mode.unwrap_or_else(|| self.stats.permissions())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Replaces a leading `${prefix}` in rule paths.
    pub prefix: String,
    /// Entries equal to or below these roots are dropped.
    pub exclude_roots: Vec<String>,
}

/// Lexically normalize a package path: absolute, no `.`/`..`, no doubled
/// or trailing slashes.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Parent of a normalized package path; `None` for `/`.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(i) => Some(&path[..i]),
        None => None,
    }
}

fn has_glob_meta(path: &str) -> bool {
    path.contains(['*', '?', '[', '{'])
}

fn expand_prefix(path: &str, prefix: &str) -> String {
    let path = match path.strip_prefix("${prefix}") {
        Some(rest) => format!("{prefix}{rest}"),
        None => path.to_string(),
    };
    normalize_path(&path)
}

/// Build the rule table. A `dir` rule never displaces a `file` rule for
/// the same path; anything else replaces the earlier rule in place.
fn rule_table(rules: &[ContentRule], prefix: &str) -> Vec<(String, ContentRule)> {
    let mut table: Vec<(String, ContentRule)> = Vec::new();
    for rule in rules {
        let path = expand_prefix(&rule.path, prefix);
        match table.iter_mut().find(|(p, _)| *p == path) {
            Some((_, existing)) => {
                if existing.kind == ContentRuleKind::File && rule.kind == ContentRuleKind::Dir {
                    continue;
                }
                *existing = rule.clone();
            }
            None => table.push((path, rule.clone())),
        }
    }
    table
}

fn stat_error(rule: &str, err: ElfError) -> ResolveError {
    match err {
        ElfError::Io { path, source } => ResolveError::Io {
            rule: rule.to_string(),
            path,
            source,
        },
        other => ResolveError::Inspect {
            rule: rule.to_string(),
            source: other,
        },
    }
}

fn package_path(basedir: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(basedir).ok()?;
    let rel = rel.to_str()?;
    if rel.is_empty() {
        return None;
    }
    Some(normalize_path(rel))
}

/// Everything a glob rule matches below `basedir`.
fn glob_listing(rule_path: &str, basedir: &Path) -> Result<Vec<PathBuf>, ResolveError> {
    let base = glob::Pattern::escape(&basedir.to_string_lossy());
    let options = glob::MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };

    let mut listing = Vec::new();
    for alternative in expand_braces(rule_path.trim_start_matches('/')) {
        let pattern = format!("{base}/{alternative}");
        let paths = glob::glob_with(&pattern, options).map_err(|source| ResolveError::Pattern {
            rule: rule_path.to_string(),
            source,
        })?;
        for entry in paths {
            let path = entry.map_err(|e| ResolveError::Io {
                rule: rule_path.to_string(),
                path: e.path().to_path_buf(),
                source: e.into_error(),
            })?;
            listing.push(path);
        }
    }
    Ok(listing)
}

/// Everything below the real directory `dir`, not following symlinks.
fn tree_listing(rule_path: &str, dir: &Path) -> Result<Vec<PathBuf>, ResolveError> {
    let mut listing = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| ResolveError::Io {
            rule: rule_path.to_string(),
            path: e.path().map_or_else(|| dir.to_path_buf(), Path::to_path_buf),
            source: e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop")),
        })?;
        listing.push(entry.into_path());
    }
    Ok(listing)
}

/// Resolve `rules` against the install tree at `basedir`.
///
/// # Errors
///
/// Returns [`ResolveError`] naming the offending rule if a pattern is
/// invalid or a path cannot be read.
pub fn resolve_contents(
    rules: &[ContentRule],
    basedir: &Path,
    opts: &ResolveOptions,
    inspector: &dyn ElfInspector,
) -> Result<Contents, ResolveError> {
    let mut contents = Contents::new();

    for (path, rule) in rule_table(rules, &opts.prefix) {
        let abs_path = basedir.join(path.trim_start_matches('/'));

        let listing = match rule.kind {
            ContentRuleKind::Dir => {
                contents.insert(
                    path,
                    ResolvedEntry::from_rule(&rule, EntryKind::Dir, FileStats::default_dir()),
                );
                continue;
            }
            ContentRuleKind::File if has_glob_meta(&path) => glob_listing(&path, basedir)?,
            ContentRuleKind::File => {
                let stats = FileStats::detect(&abs_path, inspector)
                    .map_err(|e| stat_error(&path, e))?;
                if stats.is_dir() {
                    let listing = tree_listing(&path, &abs_path)?;
                    contents.entry(path.clone()).or_insert_with(|| {
                        ResolvedEntry::from_rule(&rule, EntryKind::Dir, stats)
                    });
                    listing
                } else {
                    let kind = EntryKind::from_stats(&stats);
                    contents.insert(path, ResolvedEntry::from_rule(&rule, kind, stats));
                    continue;
                }
            }
        };

        for abs in listing {
            let Some(pkg_path) = package_path(basedir, &abs) else {
                continue;
            };
            if contents.contains_key(&pkg_path) {
                continue;
            }
            let stats = FileStats::detect(&abs, inspector).map_err(|e| stat_error(&path, e))?;
            let mut entry = ResolvedEntry::from_rule(&rule, EntryKind::from_stats(&stats), stats);
            if !entry.stats.is_file() {
                entry.conffile = Some(false);
            }
            contents.insert(pkg_path, entry);
        }
    }

    let mut ancestors = Contents::new();
    for path in contents.keys() {
        let mut current = path.as_str();
        while let Some(parent) = parent_path(current) {
            if parent == "/" {
                break;
            }
            current = parent;
            if contents.contains_key(parent) || ancestors.contains_key(parent) {
                continue;
            }
            let abs = basedir.join(parent.trim_start_matches('/'));
            if !abs.exists() {
                continue;
            }
            let stats = FileStats::detect(&abs, inspector).map_err(|e| stat_error(parent, e))?;
            ancestors.insert(parent.to_string(), ResolvedEntry::directory(stats));
        }
    }
    contents.extend(ancestors);

    if !opts.exclude_roots.is_empty() {
        contents.retain(|path, _| !is_under_any(path, &opts.exclude_roots));
    }

    tracing::debug!(
        "Resolved {} entries from {} rules under {}",
        contents.len(),
        rules.len(),
        basedir.display()
    );
    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::NativeInspector;
    use std::os::unix::fs::symlink;

    fn install_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for d in ["usr/bin", "usr/lib", "usr/share/doc/pkg/sub", "etc/pkg"] {
            std::fs::create_dir_all(root.join(d)).unwrap();
        }
        std::fs::write(root.join("usr/bin/prog"), "binary").unwrap();
        std::fs::write(root.join("usr/lib/libfoo.so.1"), "lib").unwrap();
        symlink("libfoo.so.1", root.join("usr/lib/libfoo.so")).unwrap();
        std::fs::write(root.join("usr/share/doc/pkg/README"), "readme").unwrap();
        std::fs::write(root.join("usr/share/doc/pkg/sub/notes"), "notes").unwrap();
        std::fs::write(root.join("etc/pkg/pkg.conf"), "key=value").unwrap();
        dir
    }

    fn opts() -> ResolveOptions {
        ResolveOptions {
            prefix: "/usr".to_string(),
            exclude_roots: Vec::new(),
        }
    }

    #[test]
    fn test_normalize_and_parent() {
        assert_eq!(normalize_path("usr//lib/./x/"), "/usr/lib/x");
        assert_eq!(normalize_path("/usr/lib/../bin"), "/usr/bin");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(parent_path("/usr/lib"), Some("/usr"));
        assert_eq!(parent_path("/usr"), Some("/"));
        assert_eq!(parent_path("/"), None);
    }

    #[test]
    fn test_glob_rule_inherits_attributes() {
        let tree = install_tree();
        let mut rule = ContentRule::file("${prefix}/lib/libfoo.so*");
        rule.mode = Some(0o644);
        rule.owner = Some("bin".to_string());
        rule.conffile = Some(true);

        let contents = resolve_contents(&[rule], tree.path(), &opts(), &NativeInspector).unwrap();

        let lib = &contents["/usr/lib/libfoo.so.1"];
        assert_eq!(lib.kind, EntryKind::File);
        assert_eq!(lib.mode, Some(0o644));
        assert_eq!(lib.owner.as_deref(), Some("bin"));
        assert_eq!(lib.conffile, Some(true));

        let link = &contents["/usr/lib/libfoo.so"];
        assert_eq!(link.kind, EntryKind::Symlink);
        assert_eq!(link.conffile, Some(false));

        // ancestors synthesized from disk with default attributes
        let usr = &contents["/usr"];
        assert_eq!(usr.kind, EntryKind::Dir);
        assert_eq!(usr.mode, None);
        assert!(contents.contains_key("/usr/lib"));
        assert!(!contents.contains_key("/"));
        assert_eq!(contents.len(), 4);
    }

    #[test]
    fn test_brace_expansion() {
        let tree = install_tree();
        let rule = ContentRule::file("${prefix}/{bin/prog,lib/libfoo.so.1}");
        let contents = resolve_contents(&[rule], tree.path(), &opts(), &NativeInspector).unwrap();
        assert!(contents.contains_key("/usr/bin/prog"));
        assert!(contents.contains_key("/usr/lib/libfoo.so.1"));
        assert!(!contents.contains_key("/usr/lib/libfoo.so"));
    }

    #[test]
    fn test_directory_rule_is_recursive() {
        let tree = install_tree();
        let mut rule = ContentRule::file("${prefix}/share/doc/pkg/");
        rule.owner = Some("doc".to_string());
        let contents = resolve_contents(&[rule], tree.path(), &opts(), &NativeInspector).unwrap();

        let keys: Vec<&str> = contents.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "/usr",
                "/usr/share",
                "/usr/share/doc",
                "/usr/share/doc/pkg",
                "/usr/share/doc/pkg/README",
                "/usr/share/doc/pkg/sub",
                "/usr/share/doc/pkg/sub/notes",
            ]
        );
        assert_eq!(contents["/usr/share/doc/pkg"].owner.as_deref(), Some("doc"));
        assert_eq!(contents["/usr/share/doc/pkg/sub"].kind, EntryKind::Dir);
        assert_eq!(contents["/usr/share/doc/pkg/sub"].conffile, Some(false));
        assert_eq!(contents["/usr/share/doc/pkg/sub/notes"].owner.as_deref(), Some("doc"));
        assert_eq!(contents["/usr/share"].owner, None);
    }

    #[test]
    fn test_file_rule_wins_over_dir_rule() {
        let tree = install_tree();
        let mut file = ContentRule::file("/usr/bin/prog");
        file.mode = Some(0o755);
        let dir = ContentRule::dir("/usr/bin/prog");

        let contents = resolve_contents(
            &[file.clone(), dir.clone()],
            tree.path(),
            &opts(),
            &NativeInspector,
        )
        .unwrap();
        assert_eq!(contents["/usr/bin/prog"].kind, EntryKind::File);
        assert_eq!(contents["/usr/bin/prog"].mode, Some(0o755));

        let contents = resolve_contents(&[dir, file], tree.path(), &opts(), &NativeInspector).unwrap();
        assert_eq!(contents["/usr/bin/prog"].kind, EntryKind::File);
    }

    #[test]
    fn test_dir_rule_needs_no_disk() {
        let tree = install_tree();
        let contents = resolve_contents(
            &[ContentRule::dir("${prefix}/lib/plugins")],
            tree.path(),
            &opts(),
            &NativeInspector,
        )
        .unwrap();
        let plugins = &contents["/usr/lib/plugins"];
        assert_eq!(plugins.kind, EntryKind::Dir);
        assert_eq!(plugins.stats, FileStats::default_dir());
    }

    #[test]
    fn test_excluded_roots_are_dropped() {
        let tree = install_tree();
        let opts = ResolveOptions {
            prefix: "/usr".to_string(),
            exclude_roots: vec!["/etc".to_string(), "/var".to_string()],
        };
        let rules = [
            ContentRule::file("/etc/pkg/pkg.conf"),
            ContentRule::file("${prefix}/bin/prog"),
        ];
        let contents = resolve_contents(&rules, tree.path(), &opts, &NativeInspector).unwrap();
        assert!(contents.keys().all(|k| !k.starts_with("/etc")));
        assert!(contents.contains_key("/usr/bin/prog"));
    }

    #[test]
    fn test_errors_name_the_rule() {
        let tree = install_tree();
        match resolve_contents(
            &[ContentRule::file("/usr/bin/missing")],
            tree.path(),
            &opts(),
            &NativeInspector,
        ) {
            Err(ResolveError::Io { rule, .. }) => assert_eq!(rule, "/usr/bin/missing"),
            other => panic!("unexpected {other:?}"),
        }

        assert!(matches!(
            resolve_contents(
                &[ContentRule::file("/usr/lib/[abc")],
                tree.path(),
                &opts(),
                &NativeInspector,
            ),
            Err(ResolveError::Pattern { .. })
        ));
    }
}
