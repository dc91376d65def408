//! Shared data model for the bolt packaging engine.
//!
//! Everything here is plain data plus the version algebra: parsing and
//! comparing Debian-style versions, relation specifiers, and the manifest
//! model consumed by `bolt-core`.

pub mod arch;
pub mod hash;
pub mod manifest;
pub mod relation;
pub mod version;

// Re-exports
pub use arch::*;
pub use hash::*;
pub use manifest::*;
pub use relation::*;
pub use version::{Operator, PackageVersion, VersionError};
