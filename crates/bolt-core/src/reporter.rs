//! Reporter trait for dependency injection
//!
//! Core logic reports user-facing progress through this trait without
//! being coupled to a particular terminal front end.

use std::path::Path;

pub trait Reporter: Send + Sync {
    /// A source file is about to be looked up in the cache or on mirrors.
    fn retrieving(&self, name: &str, version: &str, file: &str);

    /// The source file was found in the cache with a valid checksum.
    fn cached(&self, name: &str, version: &str, file: &str);

    /// Download progress for the current source file.
    fn downloading(&self, file: &str, current: u64, total: Option<u64>);

    /// An archive is being unpacked.
    fn unpacking(&self, name: &str, version: &str, file: &str);

    /// A build phase or packaging step has started.
    fn phase(&self, title: &str);

    /// A package file was written.
    fn packed(&self, name: &str, path: &Path);

    /// Log a warning message.
    fn warning(&self, msg: &str);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn retrieving(&self, name: &str, version: &str, file: &str) {
        (**self).retrieving(name, version, file);
    }
    fn cached(&self, name: &str, version: &str, file: &str) {
        (**self).cached(name, version, file);
    }
    fn downloading(&self, file: &str, current: u64, total: Option<u64>) {
        (**self).downloading(file, current, total);
    }
    fn unpacking(&self, name: &str, version: &str, file: &str) {
        (**self).unpacking(name, version, file);
    }
    fn phase(&self, title: &str) {
        (**self).phase(title);
    }
    fn packed(&self, name: &str, path: &Path) {
        (**self).packed(name, path);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
}

/// Swallows everything. Used by tests and library callers that only care
/// about results.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn retrieving(&self, _: &str, _: &str, _: &str) {}
    fn cached(&self, _: &str, _: &str, _: &str) {}
    fn downloading(&self, _: &str, _: u64, _: Option<u64>) {}
    fn unpacking(&self, _: &str, _: &str, _: &str) {}
    fn phase(&self, _: &str) {}
    fn packed(&self, _: &str, _: &Path) {}
    fn warning(&self, _: &str) {}
}

/// Forwards progress to `tracing` at `info` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn retrieving(&self, name: &str, version: &str, file: &str) {
        tracing::info!("Retrieving '{name}' ({version}): {file}");
    }
    fn cached(&self, name: &str, version: &str, file: &str) {
        tracing::info!("Using cached '{name}' ({version}): {file}");
    }
    fn downloading(&self, file: &str, current: u64, total: Option<u64>) {
        match total {
            Some(total) => tracing::debug!("{file}: {current}/{total} bytes"),
            None => tracing::debug!("{file}: {current} bytes"),
        }
    }
    fn unpacking(&self, name: &str, version: &str, file: &str) {
        tracing::info!("Unpacking '{name}' ({version}): {file}");
    }
    fn phase(&self, title: &str) {
        tracing::info!("==> {title}");
    }
    fn packed(&self, name: &str, path: &Path) {
        tracing::info!("Packed {name}: {}", path.display());
    }
    fn warning(&self, msg: &str) {
        tracing::warn!("{msg}");
    }
}
