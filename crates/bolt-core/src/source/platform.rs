//! Build host probe: compiler flags, CPU count and target triplet.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::tool::Tool;

static DEBUG_PREFIX_MAP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*-fdebug-prefix-map=\S+\s*").unwrap());

const GCC_FLAGS: &str = "-g -O2 -fstack-protector-strong -Wformat -Werror=format-security";

/// Remove `-fdebug-prefix-map=...` options from a flag string.
///
/// The build directory is not stable across builds, so the mapping would
/// leak a temporary path into the debug info.
pub fn strip_debug_prefix_map(value: &str) -> String {
    DEBUG_PREFIX_MAP.replace_all(value, " ").trim().to_string()
}

/// Snapshot of the build host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    build_flags: BTreeMap<String, String>,
    cpus: usize,
    target_type: String,
}

impl Platform {
    pub fn new(build_flags: BTreeMap<String, String>, cpus: usize, target_type: &str) -> Self {
        Self {
            build_flags,
            cpus: cpus.max(1),
            target_type: target_type.to_string(),
        }
    }

    /// Probe the running system.
    ///
    /// Missing tools degrade to empty values instead of failing: a host
    /// without `gcc` simply has no default flags and an empty triplet.
    pub fn detect(timeout: Option<Duration>) -> Self {
        let gcc = Tool::find("gcc").ok().map(|t| t.with_timeout(timeout));

        let build_flags = if Path::new("/etc/debian_version").exists() {
            Tool::find("dpkg-buildflags")
                .map(|t| dpkg_build_flags(&t.with_timeout(timeout)))
                .unwrap_or_default()
        } else if gcc.is_some() {
            default_gcc_flags()
        } else {
            BTreeMap::new()
        };

        let target_type = gcc
            .and_then(|gcc| gcc.run(["-dumpmachine"]).ok())
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        let platform = Self::new(build_flags, num_cpus::get(), &target_type);
        tracing::debug!(
            "Build host: {} with {} cpus",
            platform.target_type,
            platform.cpus
        );
        platform
    }

    pub fn build_flags(&self) -> &BTreeMap<String, String> {
        &self.build_flags
    }

    pub fn cpus(&self) -> usize {
        self.cpus
    }

    /// `floor(cpus * 1.5)`
    pub fn parallel_jobs(&self) -> usize {
        self.cpus * 3 / 2
    }

    /// GNU triplet of the host compiler, e.g. `x86_64-linux-gnu`.
    pub fn target_type(&self) -> &str {
        &self.target_type
    }

    /// Machine part of the triplet, e.g. `x86_64`.
    pub fn target_machine(&self) -> &str {
        self.target_type.split('-').next().unwrap_or_default()
    }

    /// The triplet with its vendor field set to `tools`.
    ///
    /// `x86_64-pc-linux-gnu` and `x86_64-linux-gnu` both become
    /// `x86_64-tools-linux-gnu`.
    pub fn tools_type(&self) -> String {
        let parts: Vec<&str> = self.target_type.split('-').collect();
        match parts.as_slice() {
            [] | [""] => String::new(),
            [machine] => format!("{machine}-tools"),
            [machine, os, env] if *os == "linux" => format!("{machine}-tools-{os}-{env}"),
            [machine, _vendor, rest @ ..] if !rest.is_empty() => {
                format!("{machine}-tools-{}", rest.join("-"))
            }
            [machine, os] => format!("{machine}-tools-{os}"),
            _ => self.target_type.clone(),
        }
    }
}

fn default_gcc_flags() -> BTreeMap<String, String> {
    [
        ("CFLAGS", GCC_FLAGS),
        ("CXXFLAGS", GCC_FLAGS),
        ("CPPFLAGS", "-Wdate-time -D_FORTIFY_SOURCE=2"),
        ("LDFLAGS", "-Wl,-z,relro"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn dpkg_build_flags(tool: &Tool) -> BTreeMap<String, String> {
    let Ok(list) = tool.run(["--list"]) else {
        tracing::warn!("dpkg-buildflags --list failed, using no build flags");
        return BTreeMap::new();
    };

    list.lines()
        .map(str::trim)
        .filter(|flag| !flag.is_empty())
        .filter_map(|flag| {
            let value = tool.run(["--get", flag]).ok()?;
            Some((flag.to_string(), strip_debug_prefix_map(&value)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform(triplet: &str) -> Platform {
        Platform::new(BTreeMap::new(), 4, triplet)
    }

    #[test]
    fn test_strip_debug_prefix_map() {
        assert_eq!(
            strip_debug_prefix_map("-g -O2 -fdebug-prefix-map=/build/x=. -fstack-protector"),
            "-g -O2 -fstack-protector"
        );
        assert_eq!(strip_debug_prefix_map("-O2"), "-O2");
    }

    #[test]
    fn test_triplet_parts() {
        let p = platform("x86_64-linux-gnu");
        assert_eq!(p.target_machine(), "x86_64");
        assert_eq!(p.tools_type(), "x86_64-tools-linux-gnu");
        assert_eq!(platform("x86_64-pc-linux-gnu").tools_type(), "x86_64-tools-linux-gnu");
        assert_eq!(
            platform("arm-unknown-linux-gnueabihf").tools_type(),
            "arm-tools-linux-gnueabihf"
        );
        assert_eq!(platform("").tools_type(), "");
        assert_eq!(platform("").target_machine(), "");
    }

    #[test]
    fn test_parallel_jobs() {
        assert_eq!(platform("x").parallel_jobs(), 6);
        assert_eq!(Platform::new(BTreeMap::new(), 1, "x").parallel_jobs(), 1);
        assert_eq!(Platform::new(BTreeMap::new(), 0, "x").cpus(), 1);
        assert_eq!(Platform::new(BTreeMap::new(), 3, "x").parallel_jobs(), 4);
    }

    #[test]
    fn test_dpkg_build_flags_from_tool() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("dpkg-buildflags");
        std::fs::write(
            &script,
            r#"case "$1" in
  --list) printf 'CFLAGS\nLDFLAGS\n\n' ;;
  --get) case "$2" in
    CFLAGS) echo '-g -O2 -fdebug-prefix-map=/tmp/b=. -Wall' ;;
    LDFLAGS) echo '-Wl,-z,relro' ;;
  esac ;;
esac
"#,
        )
        .unwrap();
        let flags = dpkg_build_flags(&Tool::script("dpkg-buildflags", &script));
        assert_eq!(flags.len(), 2);
        assert_eq!(flags["CFLAGS"], "-g -O2 -Wall");
        assert_eq!(flags["LDFLAGS"], "-Wl,-z,relro");
    }
}
