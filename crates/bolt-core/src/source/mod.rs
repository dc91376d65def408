//! Source pipeline: retrieve, unpack, patch and run the build phases of a
//! source package.

pub mod cache;
pub mod fetch;
pub mod patch;
pub mod phase;
pub mod platform;
pub mod unpack;

use std::fmt;

pub use cache::{SourceCache, sha256_file};
pub use fetch::SourceFetcher;
pub use patch::apply_patches;
pub use phase::PhaseRunner;
pub use platform::Platform;
pub use unpack::unpack_archive;

/// A shell-scripted build phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Prepare,
    Build,
    Install,
    Clean,
}

impl Phase {
    pub const ALL: [Self; 4] = [Self::Prepare, Self::Build, Self::Install, Self::Clean];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Build => "build",
            Self::Install => "install",
            Self::Clean => "clean",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
