//! User configuration (`~/.bolt/config.json`).
//!
//! ```json
//! {
//!   "repositories": [
//!     { "name": "main", "url": "https://sources.example.org/bolt" }
//!   ],
//!   "cache_dir": "/var/cache/bolt",
//!   "phase_timeout_secs": 7200
//! }
//! ```
//!
//! Every field is optional; a missing file yields the defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use bolt_schema::BuildFor;
use serde::{Deserialize, Serialize};

use crate::paths;

/// A source mirror. Archives live at `<url>/<letter>/<name>/<version>/<file>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mirror {
    #[serde(default)]
    pub name: String,
    pub url: String,
}

impl Mirror {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
        }
    }
}

/// Naming and filtering rules for tools builds.
///
/// Tools packages are installed into a shared bootstrap prefix, so their
/// names carry a prefix and they must not ship anything under the shared
/// roots (`/etc`, `/var`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsPolicy {
    pub tools_prefix: String,
    pub cross_tools_prefix: String,
    pub install_prefix: String,
    pub excluded_roots: Vec<String>,
}

impl Default for ToolsPolicy {
    fn default() -> Self {
        Self {
            tools_prefix: "tools-".to_string(),
            cross_tools_prefix: "tools-target-".to_string(),
            install_prefix: "/tools".to_string(),
            excluded_roots: vec!["/etc".to_string(), "/var".to_string()],
        }
    }
}

impl ToolsPolicy {
    /// Package name prefix for a build flavour.
    pub fn name_prefix(&self, build_for: BuildFor) -> &str {
        match build_for {
            BuildFor::Target => "",
            BuildFor::Tools => &self.tools_prefix,
            BuildFor::CrossTools => &self.cross_tools_prefix,
        }
    }

    /// Install prefix for a build flavour.
    pub fn install_prefix(&self, build_for: BuildFor) -> &str {
        if build_for.is_tools() {
            &self.install_prefix
        } else {
            "/usr"
        }
    }

    /// Roots to drop from tools packages; empty for target builds.
    pub fn excluded_roots(&self, build_for: BuildFor) -> Vec<String> {
        if build_for.is_tools() {
            self.excluded_roots.clone()
        } else {
            Vec::new()
        }
    }
}

/// Whether `path` equals one of `roots` or lies below it.
pub fn is_under_any(path: &str, roots: &[String]) -> bool {
    roots.iter().any(|root| {
        let root = root.trim_end_matches('/');
        path == root
            || path
                .strip_prefix(root)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoltConfig {
    pub repositories: Vec<Mirror>,
    pub cache_dir: Option<PathBuf>,
    pub helpers_path: Vec<PathBuf>,
    pub tools: ToolsPolicy,
    pub debug_packages: bool,
    pub phase_timeout_secs: Option<u64>,
    pub tool_timeout_secs: Option<u64>,
}

impl Default for BoltConfig {
    fn default() -> Self {
        Self {
            repositories: Vec::new(),
            cache_dir: None,
            helpers_path: vec![
                paths::helpers_dir(),
                PathBuf::from("/usr/share/bolt-pack/helpers"),
                PathBuf::from("/tools/share/bolt-pack/helpers"),
            ],
            tools: ToolsPolicy::default(),
            debug_packages: true,
            phase_timeout_secs: None,
            tool_timeout_secs: None,
        }
    }
}

impl BoltConfig {
    /// Load configuration from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Load `~/.bolt/config.json`.
    ///
    /// # Errors
    ///
    /// See [`BoltConfig::load`].
    pub fn load_default() -> Result<Self> {
        Self::load(&paths::config_path())
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(paths::cache_path)
    }

    pub fn phase_timeout(&self) -> Option<Duration> {
        self.phase_timeout_secs.map(Duration::from_secs)
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs.map(Duration::from_secs)
    }
}
