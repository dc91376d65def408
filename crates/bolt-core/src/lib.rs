pub mod config;
pub mod contents;
pub mod control;
pub mod elf;
pub mod error;
pub mod package;
pub mod paths;
pub mod relations;
pub mod shlib;
pub mod simplify;
pub mod source;
pub mod tool;

pub mod reporter;

pub use config::BoltConfig;
pub use control::{Action, BuildOptions, Context, PackageControl};
pub use error::*;
pub use reporter::{NullReporter, Reporter, TracingReporter};

/// User Agent string for mirror requests
pub const USER_AGENT: &str = concat!("bolt-core/", env!("CARGO_PKG_VERSION"));
