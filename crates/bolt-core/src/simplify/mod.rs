//! Content listing simplification.
//!
//! Imported package listings enumerate every single file. Where a whole
//! directory belongs to exactly one package, the listing can name that
//! directory instead. [`simplify`] finds the shortest such directories per
//! package and replaces the covered entries with one `dir` entry each.

pub mod paths;

use std::collections::BTreeSet;

use bolt_schema::ContentRule;

use crate::contents::parent_path;

pub use paths::fix_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ListingKind {
    File,
    Dir,
    Symlink,
    /// Type not known, e.g. from an install list without disk access.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ListingEntry {
    pub path: String,
    pub kind: ListingKind,
    /// Permission bits; `None` means the packaging default.
    pub mode: Option<u32>,
    pub owner: String,
    pub group: String,
}

impl ListingEntry {
    pub fn new(path: impl Into<String>, kind: ListingKind) -> Self {
        Self {
            path: path.into(),
            kind,
            mode: None,
            owner: "root".to_string(),
            group: "root".to_string(),
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_owner(mut self, owner: &str, group: &str) -> Self {
        self.owner = owner.to_string();
        self.group = group.to_string();
        self
    }

    fn is_dir(&self) -> bool {
        self.kind == ListingKind::Dir
    }

    /// Mode an entry of this kind gets when none is recorded.
    pub fn default_mode(&self) -> u32 {
        match self.kind {
            ListingKind::Dir => 0o755,
            ListingKind::Symlink => 0o777,
            ListingKind::File | ListingKind::Unknown => {
                if self.path.contains("/bin/") || self.path.contains("/sbin/") {
                    0o755
                } else {
                    0o644
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageListing {
    pub name: String,
    pub entries: Vec<ListingEntry>,
}

impl PackageListing {
    pub fn new(name: impl Into<String>, entries: Vec<ListingEntry>) -> Self {
        Self {
            name: name.into(),
            entries,
        }
    }
}

fn is_at_or_under(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Directories wholly owned by `packages[index]`, without trailing slash.
fn unique_prefixes(packages: &[PackageListing], index: usize) -> BTreeSet<String> {
    let mut prefixes: BTreeSet<String> = BTreeSet::new();

    for entry in packages[index].entries.iter().filter(|e| !e.is_dir()) {
        // Everything lives under `/`; it is never a candidate.
        let Some(parent) = parent_path(&entry.path).filter(|p| *p != "/") else {
            continue;
        };
        let candidate = format!("{parent}/");

        let shared = packages
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .flat_map(|(_, other)| &other.entries)
            .any(|other| other.path.starts_with(&candidate));
        if shared {
            continue;
        }

        if prefixes
            .iter()
            .any(|prefix| candidate.starts_with(&format!("{prefix}/")))
        {
            continue;
        }
        prefixes.retain(|prefix| !prefix.starts_with(&candidate));
        prefixes.insert(parent.to_string());
    }

    prefixes
}

/// Collapse each package's listing onto the directories it owns alone.
///
/// Packages are processed in order, each seeing the already simplified
/// listings of the ones before it. Files are never lost: an entry is only
/// dropped when a `dir` entry covering it is added.
pub fn simplify(packages: &mut [PackageListing]) {
    for index in 0..packages.len() {
        packages[index].entries.sort();
        let prefixes = unique_prefixes(packages, index);
        if prefixes.is_empty() {
            continue;
        }

        let package = &mut packages[index];
        package.entries.retain(|entry| {
            let owner_dir = if entry.is_dir() {
                entry.path.as_str()
            } else {
                parent_path(&entry.path).unwrap_or("/")
            };
            !prefixes.iter().any(|prefix| is_at_or_under(owner_dir, prefix))
        });

        tracing::debug!(
            "Simplified {} to {} entries plus {} directories",
            package.name,
            package.entries.len(),
            prefixes.len()
        );
        package.entries.extend(
            prefixes
                .into_iter()
                .map(|prefix| ListingEntry::new(prefix, ListingKind::Dir)),
        );
    }
}

/// Normalize raw archive member entries for import.
///
/// Paths go through [`fix_path`]; implicit system directories and
/// documentation, translation and menu files are dropped.
pub fn import_entries<I>(entries: I) -> Vec<ListingEntry>
where
    I: IntoIterator<Item = ListingEntry>,
{
    entries
        .into_iter()
        .filter_map(|mut entry| {
            entry.path = fix_path(&entry.path);
            let skip = (entry.is_dir() && paths::is_path_implicit(&entry.path))
                || paths::is_doc_path(&entry.path)
                || paths::is_l10n_path(&entry.path)
                || paths::is_menu_path(&entry.path);
            (!skip).then_some(entry)
        })
        .collect()
}

/// Content rules for a listing, in path order.
///
/// Mode and ownership are only spelled out when they differ from the
/// defaults. MIME registrations and other distribution plumbing are left
/// out.
pub fn content_rules(listing: &PackageListing) -> Vec<ContentRule> {
    let mut entries: Vec<&ListingEntry> = listing.entries.iter().collect();
    entries.sort();

    entries
        .into_iter()
        .filter(|e| {
            !(paths::is_doc_path(&e.path)
                || paths::is_l10n_path(&e.path)
                || paths::is_menu_path(&e.path)
                || paths::is_mime_path(&e.path)
                || paths::is_misc_unneeded(&e.path))
        })
        .map(|entry| {
            let mut rule = if entry.is_dir() {
                ContentRule::dir(entry.path.clone())
            } else {
                ContentRule::file(entry.path.clone())
            };
            rule.mode = entry
                .mode
                .map(|m| m & 0o7777)
                .filter(|m| *m != 0 && *m != entry.default_mode());
            rule.owner = Some(entry.owner.clone()).filter(|o| !o.is_empty() && o != "root");
            rule.group = Some(entry.group.clone()).filter(|g| !g.is_empty() && g != "root");
            rule
        })
        .collect()
}

/// Drop Debian packaging tools from a dependency list.
pub fn portable_dependencies<'a, I>(names: I) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    names
        .into_iter()
        .filter(|name| !paths::is_pkg_name_debian_specific(name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolt_schema::ContentRuleKind;

    fn file(path: &str) -> ListingEntry {
        ListingEntry::new(path, ListingKind::File)
    }

    fn dir(path: &str) -> ListingEntry {
        ListingEntry::new(path, ListingKind::Dir)
    }

    fn paths_of(listing: &PackageListing) -> Vec<&str> {
        listing.entries.iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn test_unshared_directory_collapses() {
        let mut pkgs = vec![
            PackageListing::new(
                "libfoo",
                vec![
                    file("/usr/lib/foo/plugins/a.so"),
                    file("/usr/lib/foo/b.so"),
                    dir("/usr/lib/foo/plugins"),
                    file("/usr/lib/libfoo.so.1"),
                ],
            ),
            PackageListing::new("libfoo-dev", vec![file("/usr/lib/libfoo.so")]),
        ];
        simplify(&mut pkgs);

        assert_eq!(paths_of(&pkgs[0]), ["/usr/lib/libfoo.so.1", "/usr/lib/foo"]);
        assert_eq!(pkgs[0].entries[1].kind, ListingKind::Dir);
        assert_eq!(pkgs[0].entries[1].mode, None);
        assert_eq!(pkgs[0].entries[1].owner, "root");
        assert_eq!(paths_of(&pkgs[1]), ["/usr/lib/libfoo.so"]);
    }

    #[test]
    fn test_shorter_prefix_wins() {
        let mut pkgs = vec![PackageListing::new(
            "data",
            vec![
                file("/usr/share/data/deep/x"),
                file("/usr/share/data/y"),
                file("/usr/share/data/deep/deeper/z"),
            ],
        )];
        simplify(&mut pkgs);
        assert_eq!(paths_of(&pkgs[0]), ["/usr/share/data"]);
    }

    #[test]
    fn test_longer_prefix_dropped_when_shorter_found_later() {
        let listing = vec![
            file("/opt/app/lib/a"),
            file("/opt/app/z"),
            file("/opt/other/b"),
        ];
        let mut pkgs = vec![
            PackageListing::new("app", listing),
            PackageListing::new("other", vec![file("/opt/other/c")]),
        ];
        simplify(&mut pkgs);
        assert_eq!(paths_of(&pkgs[0]), ["/opt/other/b", "/opt/app"]);
    }

    #[test]
    fn test_no_file_is_lost_or_duplicated() {
        let mut pkgs = vec![
            PackageListing::new(
                "a",
                vec![file("/usr/bin/a"), file("/usr/share/a/data"), file("/rootfile")],
            ),
            PackageListing::new("b", vec![file("/usr/bin/b"), file("/usr/share/b/data")]),
        ];
        let before: Vec<Vec<String>> = pkgs
            .iter()
            .map(|p| p.entries.iter().map(|e| e.path.clone()).collect())
            .collect();
        simplify(&mut pkgs);

        for (pkg, files) in pkgs.iter().zip(before) {
            for path in files {
                let covered = pkg
                    .entries
                    .iter()
                    .filter(|e| {
                        e.path == path
                            || (e.kind == ListingKind::Dir && path.starts_with(&format!("{}/", e.path)))
                    })
                    .count();
                assert_eq!(covered, 1, "{path} in {}", pkg.name);
            }
        }
        assert!(paths_of(&pkgs[0]).contains(&"/usr/bin/a"));
        assert!(paths_of(&pkgs[0]).contains(&"/rootfile"));
    }

    #[test]
    fn test_import_entries_filters() {
        let imported = import_entries([
            dir("./usr/"),
            dir("./usr/share/zlib/"),
            file("./lib/x86_64-linux-gnu/libz.so.1"),
            file("./usr/share/doc/zlib1g/copyright"),
            file("./usr/share/locale/de/x.mo"),
            file("./usr/share/menu/zlib"),
        ]);
        let paths: Vec<&str> = imported.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["/usr/share/zlib", "/usr/lib/libz.so.1"]);
    }

    #[test]
    fn test_content_rules_omit_defaults() {
        let listing = PackageListing::new(
            "tool",
            vec![
                file("/usr/bin/tool").with_mode(0o100_755),
                file("/usr/bin/sudo-ish").with_mode(0o4755),
                file("/usr/share/tool/data").with_mode(0o644).with_owner("root", "staff"),
                dir("/var/lib/tool").with_mode(0o750),
                file("/usr/lib/mime/packages/tool"),
            ],
        );
        let rules = content_rules(&listing);
        assert_eq!(rules.len(), 4);

        assert_eq!(rules[0].path, "/usr/bin/sudo-ish");
        assert_eq!(rules[0].mode, Some(0o4755));
        assert_eq!(rules[1].path, "/usr/bin/tool");
        assert_eq!(rules[1].mode, None);
        assert_eq!(rules[2].group.as_deref(), Some("staff"));
        assert_eq!(rules[2].owner, None);
        assert_eq!(rules[3].kind, ContentRuleKind::Dir);
        assert_eq!(rules[3].mode, Some(0o750));
    }

    #[test]
    fn test_portable_dependencies() {
        assert_eq!(
            portable_dependencies(["debhelper", "zlib1g-dev", "dh-python", "perl"]),
            ["zlib1g-dev", "perl"]
        );
    }
}
