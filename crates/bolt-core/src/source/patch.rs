//! Patch series application.

use std::ffi::OsString;
use std::path::Path;

use bolt_schema::PatchSpec;

use crate::error::SourceError;
use crate::tool::Tool;

/// Apply `series` in order with `patch -f -p<strip>`.
///
/// Relative patch paths are taken relative to `manifest_dir`; each patch
/// is applied inside `source_dir/<subdir>`.
///
/// # Errors
///
/// Returns [`SourceError::Patch`] for the first patch that fails to apply.
pub fn apply_patches(
    series: &[PatchSpec],
    manifest_dir: &Path,
    source_dir: &Path,
    patch: &Tool,
) -> Result<(), SourceError> {
    for spec in series {
        let patch_file = if spec.path.is_absolute() {
            spec.path.clone()
        } else {
            manifest_dir.join(&spec.path)
        };
        let subdir = spec.subdir.trim_start_matches('/');
        let work_dir = if subdir.is_empty() {
            source_dir.to_path_buf()
        } else {
            source_dir.join(subdir)
        };

        tracing::info!("Applying {}", patch_file.display());
        let args: [OsString; 6] = [
            "-f".into(),
            format!("-p{}", spec.strip).into(),
            "-d".into(),
            work_dir.into_os_string(),
            "-i".into(),
            patch_file.clone().into_os_string(),
        ];
        patch.run(args).map_err(|source| SourceError::Patch {
            patch: patch_file,
            source,
        })?;
    }
    Ok(())
}
