//! Package output.
//!
//! A [`PackageSink`] receives fully assembled [`PackageArtifact`]s. The
//! bundled [`TarSink`] writes a tar container holding `debian-binary`,
//! `control.tar.gz` and `data.tar.gz`.

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use tar::{Builder, EntryType, Header};

use crate::contents::{Contents, EntryKind};
use crate::error::PackError;

const FORMAT_VERSION: &str = "2.0\n";

/// Everything needed to write one package file.
#[derive(Debug, Clone)]
pub struct PackageArtifact {
    pub name: String,
    pub filename: String,
    pub control: String,
    pub conffiles: Vec<String>,
    /// `(name, body)` of the maintainer scripts.
    pub scripts: Vec<(String, String)>,
    pub contents: Contents,
    /// Directory the package paths are relative to on disk.
    pub basedir: PathBuf,
}

pub trait PackageSink: Send + Sync + std::fmt::Debug {
    /// Write `artifact` into `outdir` and return the created file.
    ///
    /// # Errors
    ///
    /// Returns [`PackError::Sink`] if the package cannot be written.
    fn write(&self, artifact: &PackageArtifact, outdir: &Path) -> Result<PathBuf, PackError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TarSink;

fn header(kind: EntryType, mode: u32, size: u64, mtime: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(kind);
    header.set_mode(mode);
    header.set_size(size);
    header.set_mtime(mtime);
    header.set_uid(0);
    header.set_gid(0);
    header
}

fn set_owner(header: &mut Header, owner: &str, group: &str) -> io::Result<()> {
    header.set_username(owner)?;
    header.set_groupname(group)
}

fn append_bytes<W: Write>(
    builder: &mut Builder<W>,
    name: &str,
    mode: u32,
    data: &[u8],
    mtime: u64,
) -> io::Result<()> {
    let mut header = header(EntryType::Regular, mode, data.len() as u64, mtime);
    set_owner(&mut header, "root", "root")?;
    builder.append_data(&mut header, name, data)
}

fn append_file<W: Write>(
    builder: &mut Builder<W>,
    name: &str,
    file: &mut File,
    mtime: u64,
) -> io::Result<()> {
    let size = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;
    let mut header = header(EntryType::Regular, 0o644, size, mtime);
    set_owner(&mut header, "root", "root")?;
    builder.append_data(&mut header, name, file)
}

fn control_part(artifact: &PackageArtifact, mtime: u64) -> io::Result<File> {
    let mut builder = Builder::new(GzEncoder::new(tempfile::tempfile()?, Compression::default()));

    append_bytes(&mut builder, "control", 0o644, artifact.control.as_bytes(), mtime)?;
    for (name, body) in &artifact.scripts {
        append_bytes(&mut builder, name, 0o754, body.as_bytes(), mtime)?;
    }
    if !artifact.conffiles.is_empty() {
        let list: String = artifact.conffiles.iter().map(|p| format!("{p}\n")).collect();
        append_bytes(&mut builder, "conffiles", 0o644, list.as_bytes(), mtime)?;
    }

    builder.into_inner()?.finish()
}

fn data_part(artifact: &PackageArtifact, mtime: u64) -> io::Result<File> {
    let mut builder = Builder::new(GzEncoder::new(tempfile::tempfile()?, Compression::default()));

    for (path, entry) in &artifact.contents {
        let name = path.trim_start_matches('/');
        if name.is_empty() {
            continue;
        }
        let real = artifact.basedir.join(name);
        let owner = entry.owner.as_deref().unwrap_or("root");
        let group = entry.group.as_deref().unwrap_or("root");
        let mode = entry.effective_mode();

        match entry.kind {
            EntryKind::Dir => {
                let mut header = header(EntryType::Directory, mode, 0, mtime);
                set_owner(&mut header, owner, group)?;
                builder.append_data(&mut header, name, io::empty())?;
            }
            EntryKind::Symlink => {
                let target = entry.stats.link_target.clone().map_or_else(
                    || std::fs::read_link(&real),
                    Ok,
                )?;
                let mut header = header(EntryType::Symlink, mode, 0, mtime);
                set_owner(&mut header, owner, group)?;
                builder.append_link(&mut header, name, target)?;
            }
            EntryKind::File => {
                let mut file = File::open(&real)?;
                let size = file.metadata()?.len();
                let mut header = header(EntryType::Regular, mode, size, mtime);
                set_owner(&mut header, owner, group)?;
                builder.append_data(&mut header, name, &mut file)?;
            }
        }
    }

    builder.into_inner()?.finish()
}

impl TarSink {
    fn assemble(artifact: &PackageArtifact, outdir: &Path) -> io::Result<PathBuf> {
        let mtime = chrono::Utc::now().timestamp().max(0) as u64;
        let mut control = control_part(artifact, mtime)?;
        let mut data = data_part(artifact, mtime)?;

        std::fs::create_dir_all(outdir)?;
        let target = outdir.join(&artifact.filename);
        let tmp = tempfile::NamedTempFile::new_in(outdir)?;

        let mut outer = Builder::new(tmp.reopen()?);
        append_bytes(&mut outer, "debian-binary", 0o644, FORMAT_VERSION.as_bytes(), mtime)?;
        append_file(&mut outer, "control.tar.gz", &mut control, mtime)?;
        append_file(&mut outer, "data.tar.gz", &mut data, mtime)?;
        outer.into_inner()?.sync_all()?;

        tmp.persist(&target).map_err(|e| e.error)?;
        Ok(target)
    }
}

impl PackageSink for TarSink {
    fn write(&self, artifact: &PackageArtifact, outdir: &Path) -> Result<PathBuf, PackError> {
        tracing::debug!("Writing {} to {}", artifact.filename, outdir.display());
        Self::assemble(artifact, outdir).map_err(|source| PackError::Sink {
            path: outdir.join(&artifact.filename),
            source,
        })
    }
}
