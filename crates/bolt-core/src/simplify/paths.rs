//! Path and package-name filters for importing foreign package listings.

use std::sync::LazyLock;

use regex::Regex;

use crate::contents::normalize_path;

/// Directories every system already has; never worth listing.
pub const IMPLICIT_PATHS: &[&str] = &[
    "/",
    "/bin",
    "/boot",
    "/dev",
    "/etc",
    "/etc/opt",
    "/etc/profile.d",
    "/etc/skel",
    "/home",
    "/lib",
    "/media",
    "/mnt",
    "/opt",
    "/proc",
    "/root",
    "/run",
    "/run/mount",
    "/sbin",
    "/srv",
    "/sys",
    "/tmp",
    "/usr",
    "/usr/bin",
    "/usr/doc",
    "/usr/include",
    "/usr/info",
    "/usr/lib",
    "/usr/local",
    "/usr/local/bin",
    "/usr/local/include",
    "/usr/local/lib",
    "/usr/local/sbin",
    "/usr/local/share",
    "/usr/local/share/doc",
    "/usr/local/share/info",
    "/usr/local/share/locale",
    "/usr/local/share/man",
    "/usr/local/share/man/man1",
    "/usr/local/share/man/man2",
    "/usr/local/share/man/man3",
    "/usr/local/share/man/man4",
    "/usr/local/share/man/man5",
    "/usr/local/share/man/man6",
    "/usr/local/share/man/man7",
    "/usr/local/share/man/man8",
    "/usr/local/share/misc",
    "/usr/local/share/terminfo",
    "/usr/local/share/zoneinfo",
    "/usr/local/src",
    "/usr/man",
    "/usr/sbin",
    "/usr/share",
    "/usr/share/base-files",
    "/usr/share/doc",
    "/usr/share/info",
    "/usr/share/locale",
    "/usr/share/man",
    "/usr/share/man/man1",
    "/usr/share/man/man2",
    "/usr/share/man/man3",
    "/usr/share/man/man4",
    "/usr/share/man/man5",
    "/usr/share/man/man6",
    "/usr/share/man/man7",
    "/usr/share/man/man8",
    "/usr/share/misc",
    "/usr/share/terminfo",
    "/usr/share/zoneinfo",
    "/usr/src",
    "/var",
    "/var/cache",
    "/var/lib",
    "/var/local",
    "/var/log",
    "/var/mail",
    "/var/misc",
    "/var/opt",
    "/var/run",
    "/var/spool",
    "/var/spool/mail",
    "/var/tmp",
    "/var/www",
];

const MULTIARCH_VAR: &str = "${DEB_HOST_MULTIARCH}";

static BIN_DIRS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(/)?(s)?bin").unwrap());
static LIB_DIR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(/)?lib").unwrap());
static LIB_WILDCARD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"usr/lib/\*/").unwrap());
static LIB_TRIPLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"usr/lib/[^/]+-linux-gnu(/|$)").unwrap());

/// Map a Debian install path onto the merged-`/usr`, non-multiarch layout.
///
/// `./lib/x86_64-linux-gnu/libz.so.1` becomes `/usr/lib/libz.so.1`.
pub fn fix_path(path: &str) -> String {
    if path == "./" || path == "/" {
        return "/".to_string();
    }

    let mut path = path.trim_start_matches('.').trim_end_matches('/').to_string();
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    let path = path.replace(MULTIARCH_VAR, "");
    let path = BIN_DIRS.replace(&path, "${1}usr/${2}bin");
    let path = LIB_DIR.replace(&path, "${1}usr/lib");
    let path = LIB_WILDCARD.replace_all(&path, "usr/lib/");
    let path = LIB_TRIPLET.replace_all(&path, "usr/lib/${1}");
    normalize_path(&path)
}

pub fn is_path_implicit(path: &str) -> bool {
    IMPLICIT_PATHS.contains(&path)
}

fn is_at_or_under(path: &str, roots: &[&str]) -> bool {
    roots.iter().any(|root| {
        path == *root
            || path
                .strip_prefix(root)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

pub fn is_doc_path(path: &str) -> bool {
    is_at_or_under(path, &["/usr/share/doc", "/usr/share/man", "/usr/share/info"])
}

pub fn is_l10n_path(path: &str) -> bool {
    is_at_or_under(path, &["/usr/share/locale"])
}

pub fn is_menu_path(path: &str) -> bool {
    is_at_or_under(path, &["/usr/share/menu"])
}

pub fn is_mime_path(path: &str) -> bool {
    is_at_or_under(path, &["/usr/lib/mime"])
}

/// Lintian overrides and bash completions.
pub fn is_misc_unneeded(path: &str) -> bool {
    is_at_or_under(path, &["/usr/share/lintian", "/usr/share/bash-completion"])
}

/// Debian packaging tooling that has no place in a dependency list.
pub fn is_pkg_name_debian_specific(name: &str) -> bool {
    name.starts_with("dpkg")
        || name.starts_with("debhelper")
        || name.ends_with("debconf")
        || name.starts_with("dh-")
        || matches!(name, "quilt" | "lsb-release")
}
