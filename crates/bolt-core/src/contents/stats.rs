use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use bolt_schema::WordSize;

use crate::elf::{ElfInfo, ElfInspector};
use crate::error::ElfError;

const S_IFDIR: u32 = 0o040_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Dir,
    Symlink,
    /// Device nodes, sockets and fifos.
    Other,
}

/// On-disk facts about a package entry, taken with `lstat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStats {
    pub kind: FileKind,
    pub size: u64,
    /// Full `st_mode`, including the file type bits.
    pub mode: u32,
    pub device: u64,
    pub inode: u64,
    pub link_target: Option<PathBuf>,
    pub elf: Option<ElfInfo>,
}

impl FileStats {
    /// Stat `path` without following symlinks and inspect regular files.
    ///
    /// A file that carries the ELF magic but cannot be parsed is treated as
    /// plain data and logged.
    ///
    /// # Errors
    ///
    /// Returns [`ElfError::Io`] if `path` cannot be stat'ed or read.
    pub fn detect(path: &Path, inspector: &dyn ElfInspector) -> Result<Self, ElfError> {
        let io_err = |source| ElfError::Io {
            path: path.to_path_buf(),
            source,
        };
        let meta = std::fs::symlink_metadata(path).map_err(io_err)?;
        let file_type = meta.file_type();

        let kind = if file_type.is_symlink() {
            FileKind::Symlink
        } else if file_type.is_dir() {
            FileKind::Dir
        } else if file_type.is_file() {
            FileKind::File
        } else {
            FileKind::Other
        };

        let link_target = if kind == FileKind::Symlink {
            Some(std::fs::read_link(path).map_err(io_err)?)
        } else {
            None
        };

        let elf = if kind == FileKind::File {
            match inspector.inspect(path) {
                Ok(info) => info,
                Err(ElfError::Malformed { reason, .. }) => {
                    tracing::warn!("{}: unreadable ELF headers ({reason})", path.display());
                    None
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        Ok(Self {
            kind,
            size: meta.len(),
            mode: meta.mode(),
            device: meta.dev(),
            inode: meta.ino(),
            link_target,
            elf,
        })
    }

    /// Stats for a directory that is declared but not looked up on disk.
    pub fn default_dir() -> Self {
        Self {
            kind: FileKind::Dir,
            size: 0,
            mode: S_IFDIR | 0o755,
            device: 0,
            inode: 0,
            link_target: None,
            elf: None,
        }
    }

    /// Refresh after the file was modified in place.
    ///
    /// # Errors
    ///
    /// See [`FileStats::detect`].
    pub fn restat(&mut self, path: &Path, inspector: &dyn ElfInspector) -> Result<(), ElfError> {
        *self = Self::detect(path, inspector)?;
        Ok(())
    }

    /// Permission bits only.
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Dir
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }

    pub fn is_elf(&self) -> bool {
        self.elf.is_some()
    }

    pub fn is_stripped(&self) -> bool {
        self.elf.as_ref().is_some_and(|e| e.stripped)
    }

    pub fn is_dynamically_linked(&self) -> bool {
        self.elf.as_ref().is_some_and(|e| e.dynamic)
    }

    pub fn build_id(&self) -> Option<&str> {
        self.elf.as_ref().and_then(|e| e.build_id.as_deref())
    }

    pub fn word_size(&self) -> Option<WordSize> {
        self.elf.as_ref().map(|e| e.word_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::NativeInspector;
    use crate::elf::fixture::ElfFixture;

    #[test]
    fn test_detect_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.txt");
        std::fs::write(&file, "hello").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink("data.txt", &link).unwrap();

        let stats = FileStats::detect(&file, &NativeInspector).unwrap();
        assert!(stats.is_file());
        assert_eq!(stats.size, 5);
        assert!(!stats.is_elf());

        let stats = FileStats::detect(&link, &NativeInspector).unwrap();
        assert!(stats.is_symlink());
        assert_eq!(stats.link_target, Some(PathBuf::from("data.txt")));

        let stats = FileStats::detect(dir.path(), &NativeInspector).unwrap();
        assert!(stats.is_dir());
    }

    #[test]
    fn test_detect_elf_and_restat() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prog");
        ElfFixture::new(WordSize::Bits64)
            .symtab()
            .dynamic(&["libc.so.6"])
            .build_id(&[1, 2, 3, 4])
            .write(&path);

        let mut stats = FileStats::detect(&path, &NativeInspector).unwrap();
        assert!(stats.is_elf());
        assert!(!stats.is_stripped());
        assert!(stats.is_dynamically_linked());
        assert_eq!(stats.build_id(), Some("01020304"));
        assert_eq!(stats.word_size(), Some(WordSize::Bits64));

        ElfFixture::new(WordSize::Bits64)
            .dynamic(&["libc.so.6"])
            .build_id(&[1, 2, 3, 4])
            .write(&path);
        stats.restat(&path, &NativeInspector).unwrap();
        assert!(stats.is_stripped());
    }

    #[test]
    fn test_malformed_elf_is_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken");
        let mut bytes = ElfFixture::new(WordSize::Bits64).symtab().build();
        bytes.truncate(70);
        std::fs::write(&path, bytes).unwrap();

        let stats = FileStats::detect(&path, &NativeInspector).unwrap();
        assert!(stats.is_file());
        assert!(!stats.is_elf());
    }

    #[test]
    fn test_default_dir() {
        let stats = FileStats::default_dir();
        assert!(stats.is_dir());
        assert_eq!(stats.permissions(), 0o755);
    }
}
