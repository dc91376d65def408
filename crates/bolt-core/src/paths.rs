use dirs::home_dir;
use std::path::PathBuf;

/// Returns the bolt configuration directory, or None if the user's home cannot be resolved.
pub fn try_bolt_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("BOLT_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".bolt"))
}

/// Returns the bolt home directory (`~/.bolt`), or `./.bolt` when no home
/// directory is known.
pub fn bolt_home() -> PathBuf {
    try_bolt_home().unwrap_or_else(|| PathBuf::from(".bolt"))
}

/// User configuration: ~/.bolt/config.json
pub fn config_path() -> PathBuf {
    bolt_home().join("config.json")
}

/// Source archive cache: ~/.bolt/cache, overridable with `BOLT_CACHE_DIR`
pub fn cache_path() -> PathBuf {
    if let Ok(val) = std::env::var("BOLT_CACHE_DIR") {
        return PathBuf::from(val);
    }
    bolt_home().join("cache")
}

/// User helper fragments: ~/.bolt/helpers
pub fn helpers_dir() -> PathBuf {
    bolt_home().join("helpers")
}

/// Extract the filename from a URL.
pub fn filename_from_url(url: &str) -> &str {
    url.split('/').next_back().unwrap_or("")
}
