//! Tarball extraction.
//!
//! The top-level directory of the archive is dropped, so
//! `hello-2.12/src/hello.c` lands at `<dest>/src/hello.c`. Directories get
//! at least `rwx` and files at least `rw` for the owner. Symlinks are
//! recreated verbatim. Hardlinks must point at an earlier member of the
//! same archive. Device nodes and fifos are rejected.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tar::EntryType;

use crate::error::SourceError;

static FIRST_COMPONENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\.+)?(?:/+)?[^/]*").unwrap());

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

fn open_archive(archive: &Path) -> io::Result<Box<dyn Read>> {
    let mut file = File::open(archive)?;
    let mut magic = [0u8; 4];
    let n = file.read(&mut magic)?;
    file.seek(SeekFrom::Start(0))?;

    if n >= 2 && magic[..2] == GZIP_MAGIC {
        Ok(Box::new(flate2::read::MultiGzDecoder::new(file)))
    } else if n >= 4 && magic == ZSTD_MAGIC {
        Ok(Box::new(zstd::stream::read::Decoder::new(file)?))
    } else {
        Ok(Box::new(file))
    }
}

/// Archive member path with its first component removed.
fn strip_first_component(path: &str) -> &str {
    let rest = match FIRST_COMPONENT.find(path) {
        Some(m) => &path[m.end()..],
        None => path,
    };
    rest.trim_start_matches('/')
}

fn is_safe(rel: &Path) -> bool {
    rel.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Reject targets whose parent chain already contains a symlink.
fn has_symlinked_parent(dest: &Path, rel: &Path) -> bool {
    let mut current = dest.to_path_buf();
    let mut components = rel.components().peekable();
    while let Some(component) = components.next() {
        if components.peek().is_none() {
            break;
        }
        current.push(component);
        if std::fs::symlink_metadata(&current).is_ok_and(|m| m.file_type().is_symlink()) {
            return true;
        }
    }
    false
}

fn remove_existing(path: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn add_mode_bits(path: &Path, mode: u32, bits: u32) -> io::Result<()> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode((mode & 0o7777) | bits))
}

/// Extract `archive` (plain, gzip or zstd tar) into `dest`.
///
/// # Errors
///
/// Returns [`SourceError::UnsafePath`] for members escaping `dest`,
/// [`SourceError::UnsupportedEntry`] for device nodes and fifos, and
/// [`SourceError::Unpack`] on read or write failures.
pub fn unpack_archive(archive: &Path, dest: &Path) -> Result<(), SourceError> {
    let unpack_err = |source| SourceError::Unpack {
        archive: archive.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(dest).map_err(unpack_err)?;
    let mut tarball = tar::Archive::new(open_archive(archive).map_err(unpack_err)?);

    for entry in tarball.entries().map_err(unpack_err)? {
        let mut entry = entry.map_err(unpack_err)?;
        let entry_type = entry.header().entry_type();
        if entry_type == EntryType::XGlobalHeader {
            continue;
        }

        let member = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let rel = PathBuf::from(strip_first_component(&member));
        if rel.as_os_str().is_empty() {
            continue;
        }
        if !is_safe(&rel) || has_symlinked_parent(dest, &rel) {
            return Err(SourceError::UnsafePath {
                archive: archive.to_path_buf(),
                entry: member,
            });
        }

        let target = dest.join(&rel);
        let mode = entry.header().mode().map_err(unpack_err)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(unpack_err)?;
        }

        match entry_type {
            EntryType::Directory => {
                if std::fs::symlink_metadata(&target).is_ok_and(|m| !m.is_dir()) {
                    remove_existing(&target).map_err(unpack_err)?;
                }
                std::fs::create_dir_all(&target).map_err(unpack_err)?;
                add_mode_bits(&target, mode, 0o700).map_err(unpack_err)?;
            }
            EntryType::Regular | EntryType::Continuous => {
                remove_existing(&target).map_err(unpack_err)?;
                let mut out = File::create(&target).map_err(unpack_err)?;
                io::copy(&mut entry, &mut out).map_err(unpack_err)?;
                add_mode_bits(&target, mode, 0o600).map_err(unpack_err)?;
            }
            EntryType::Symlink => {
                let link = entry
                    .link_name()
                    .map_err(unpack_err)?
                    .ok_or_else(|| unpack_err(io::Error::other("symlink without target")))?
                    .into_owned();
                remove_existing(&target).map_err(unpack_err)?;
                std::os::unix::fs::symlink(&link, &target).map_err(unpack_err)?;
            }
            EntryType::Link => {
                let link = entry
                    .link_name_bytes()
                    .ok_or_else(|| unpack_err(io::Error::other("hardlink without target")))?;
                let link = String::from_utf8_lossy(&link).into_owned();
                let link_rel = PathBuf::from(strip_first_component(&link));
                if link_rel.as_os_str().is_empty()
                    || !is_safe(&link_rel)
                    || has_symlinked_parent(dest, &link_rel)
                {
                    return Err(SourceError::UnsafePath {
                        archive: archive.to_path_buf(),
                        entry: member,
                    });
                }
                let source = dest.join(&link_rel);
                if source != target {
                    remove_existing(&target).map_err(unpack_err)?;
                    std::fs::hard_link(&source, &target).map_err(unpack_err)?;
                }
            }
            _ => {
                return Err(SourceError::UnsupportedEntry {
                    archive: archive.to_path_buf(),
                    entry: member,
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tar::{Builder, Header};

    enum Member<'a> {
        Dir(&'a str, u32),
        File(&'a str, u32, &'a [u8]),
        Symlink(&'a str, &'a str),
        Hardlink(&'a str, &'a str),
        RawName(&'a [u8]),
    }

    fn tarball(members: &[Member<'_>]) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        for member in members {
            let mut header = Header::new_gnu();
            match member {
                Member::Dir(path, mode) => {
                    header.set_entry_type(EntryType::Directory);
                    header.set_path(path).unwrap();
                    header.set_mode(*mode);
                    header.set_size(0);
                    header.set_cksum();
                    builder.append(&header, io::empty()).unwrap();
                }
                Member::File(path, mode, data) => {
                    header.set_entry_type(EntryType::Regular);
                    header.set_path(path).unwrap();
                    header.set_mode(*mode);
                    header.set_size(data.len() as u64);
                    header.set_cksum();
                    builder.append(&header, *data).unwrap();
                }
                Member::Symlink(path, target) | Member::Hardlink(path, target) => {
                    let kind = if matches!(member, Member::Symlink(..)) {
                        EntryType::Symlink
                    } else {
                        EntryType::Link
                    };
                    header.set_entry_type(kind);
                    header.set_path(path).unwrap();
                    header.set_link_name(target).unwrap();
                    header.set_mode(0o777);
                    header.set_size(0);
                    header.set_cksum();
                    builder.append(&header, io::empty()).unwrap();
                }
                Member::RawName(name) => {
                    header.set_entry_type(EntryType::Regular);
                    header.as_old_mut().name[..name.len()].copy_from_slice(name);
                    header.set_mode(0o644);
                    header.set_size(0);
                    header.set_cksum();
                    builder.append(&header, io::empty()).unwrap();
                }
            }
        }
        builder.into_inner().unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        use std::io::Write;
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_strip_first_component() {
        assert_eq!(strip_first_component("hello-2.12/src/hello.c"), "src/hello.c");
        assert_eq!(strip_first_component("./hello-2.12/README"), "README");
        assert_eq!(strip_first_component("hello-2.12/"), "");
        assert_eq!(strip_first_component("/abs/x"), "x");
    }

    #[test]
    fn test_unpack_gzip_tarball() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("pkg-1.0.tar.gz");
        std::fs::write(
            &archive,
            gzip(&tarball(&[
                Member::Dir("pkg-1.0/", 0o500),
                Member::Dir("pkg-1.0/src/", 0o555),
                Member::File("pkg-1.0/src/main.c", 0o400, b"int main;"),
                Member::Symlink("pkg-1.0/main.c", "src/main.c"),
                Member::Symlink("pkg-1.0/dangling", "../nowhere"),
            ])),
        )
        .unwrap();

        let dest = dir.path().join("sources");
        unpack_archive(&archive, &dest).unwrap();

        let main = dest.join("src/main.c");
        assert_eq!(std::fs::read(&main).unwrap(), b"int main;");
        let mode = std::fs::metadata(&main).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let mode = std::fs::metadata(dest.join("src")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);

        assert_eq!(
            std::fs::read_link(dest.join("main.c")).unwrap(),
            PathBuf::from("src/main.c")
        );
        assert_eq!(
            std::fs::read_link(dest.join("dangling")).unwrap(),
            PathBuf::from("../nowhere")
        );
    }

    #[test]
    fn test_unpack_zstd_and_plain() {
        let dir = tempfile::tempdir().unwrap();
        let raw = tarball(&[Member::File("top/file.txt", 0o644, b"data")]);

        let plain = dir.path().join("plain.tar");
        std::fs::write(&plain, &raw).unwrap();
        unpack_archive(&plain, &dir.path().join("a")).unwrap();
        assert!(dir.path().join("a/file.txt").is_file());

        let zst = dir.path().join("z.tar.zst");
        std::fs::write(&zst, zstd::encode_all(&raw[..], 0).unwrap()).unwrap();
        unpack_archive(&zst, &dir.path().join("b")).unwrap();
        assert_eq!(std::fs::read(dir.path().join("b/file.txt")).unwrap(), b"data");
    }

    #[test]
    fn test_symlink_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("src");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("config.h"), "old").unwrap();

        let archive = dir.path().join("a.tar");
        std::fs::write(&archive, tarball(&[Member::Symlink("top/config.h", "config.h.in")])).unwrap();
        unpack_archive(&archive, &dest).unwrap();
        assert!(
            std::fs::symlink_metadata(dest.join("config.h"))
                .unwrap()
                .file_type()
                .is_symlink()
        );
    }

    #[test]
    fn test_hardlinks_share_the_inode() {
        use std::os::unix::fs::MetadataExt;

        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.tar");
        std::fs::write(
            &archive,
            tarball(&[
                Member::File("top/bin/gzip", 0o755, b"#!gzip"),
                Member::Hardlink("top/bin/gunzip", "top/bin/gzip"),
            ]),
        )
        .unwrap();
        let dest = dir.path().join("out");
        unpack_archive(&archive, &dest).unwrap();

        let gzip = std::fs::metadata(dest.join("bin/gzip")).unwrap();
        let gunzip = std::fs::metadata(dest.join("bin/gunzip")).unwrap();
        assert_eq!(gzip.ino(), gunzip.ino());
        assert_eq!(gunzip.nlink(), 2);
        assert_eq!(std::fs::read(dest.join("bin/gunzip")).unwrap(), b"#!gzip");
    }

    #[test]
    fn test_hardlink_outside_dest_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("secret"), "s").unwrap();
        let archive = dir.path().join("a.tar");
        std::fs::write(&archive, tarball(&[Member::Hardlink("top/b", "top/../../secret")])).unwrap();
        match unpack_archive(&archive, &dir.path().join("out")) {
            Err(SourceError::UnsafePath { entry, .. }) => assert_eq!(entry, "top/b"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!dir.path().join("out/b").exists());
    }

    #[test]
    fn test_hardlink_to_missing_member_fails() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.tar");
        std::fs::write(&archive, tarball(&[Member::Hardlink("top/b", "top/a")])).unwrap();
        assert!(matches!(
            unpack_archive(&archive, &dir.path().join("out")),
            Err(SourceError::Unpack { .. })
        ));
    }

    #[test]
    fn test_escaping_paths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.tar");
        std::fs::write(&archive, tarball(&[Member::RawName(b"top/../../evil")])).unwrap();
        assert!(matches!(
            unpack_archive(&archive, &dir.path().join("out")),
            Err(SourceError::UnsafePath { .. })
        ));

        let archive = dir.path().join("via-link.tar");
        std::fs::write(
            &archive,
            tarball(&[
                Member::Symlink("top/escape", "/tmp"),
                Member::File("top/escape/owned", 0o644, b"x"),
            ]),
        )
        .unwrap();
        assert!(matches!(
            unpack_archive(&archive, &dir.path().join("out2")),
            Err(SourceError::UnsafePath { .. })
        ));
    }
}
