//! Machine properties: ELF word size and the build flavour.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Native word size of an ELF object, taken from its `EI_CLASS` byte.
///
/// Shared objects only satisfy a `NEEDED` entry of a binary with the same
/// word size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WordSize {
    /// `ELFCLASS32`
    #[serde(rename = "32")]
    Bits32,
    /// `ELFCLASS64`
    #[serde(rename = "64")]
    Bits64,
}

impl WordSize {
    /// Map an `EI_CLASS` value to a word size.
    pub fn from_elf_class(class: u8) -> Option<Self> {
        match class {
            1 => Some(Self::Bits32),
            2 => Some(Self::Bits64),
            _ => None,
        }
    }

    /// Number of bits.
    pub fn bits(self) -> u32 {
        match self {
            Self::Bits32 => 32,
            Self::Bits64 => 64,
        }
    }
}

impl fmt::Display for WordSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

/// Which toolchain flavour a build produces.
///
/// `Tools` and `CrossTools` builds install under `/tools` and carry
/// prefixed package names; see the packaging policy in `bolt-core`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildFor {
    /// Regular packages for the target system.
    #[default]
    Target,
    /// Host tools used to bootstrap the target.
    Tools,
    /// Cross tools running on the host and producing target code.
    CrossTools,
}

impl BuildFor {
    /// Canonical spelling, as exported in `BOLT_BUILD_FOR`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Target => "target",
            Self::Tools => "tools",
            Self::CrossTools => "cross-tools",
        }
    }

    /// Whether this build produces a tools variant.
    pub fn is_tools(self) -> bool {
        !matches!(self, Self::Target)
    }
}

impl fmt::Display for BuildFor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildFor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "target" => Ok(Self::Target),
            "tools" => Ok(Self::Tools),
            "cross-tools" => Ok(Self::CrossTools),
            _ => Err(format!("Invalid build target: {s}")),
        }
    }
}
