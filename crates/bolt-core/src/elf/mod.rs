//! ELF inspection.
//!
//! [`NativeInspector`] reads just enough of an object's headers to answer
//! the questions the packager asks: word size, whether symbols are still
//! present, the GNU build id, dynamic linkage and the `DT_NEEDED` list.
//! Both classes and both byte orders are supported.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bolt_schema::WordSize;

use crate::error::ElfError;

#[cfg(test)]
pub(crate) mod fixture;
pub mod strip;

pub use strip::{DebugInfoLink, StripTools, debug_path_for, strip_debug_symbols};

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

const SHT_SYMTAB: u32 = 2;
const SHT_DYNAMIC: u32 = 6;
const SHT_NOTE: u32 = 7;
const PT_DYNAMIC: u32 = 2;
const DT_NULL: u64 = 0;
const DT_NEEDED: u64 = 1;
const NT_GNU_BUILD_ID: u32 = 3;

/// What the packager needs to know about an ELF object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfInfo {
    pub word_size: WordSize,
    /// No `.symtab` and no `.debug_*` sections.
    pub stripped: bool,
    /// Lowercase hex of the `NT_GNU_BUILD_ID` note.
    pub build_id: Option<String>,
    /// Has a `PT_DYNAMIC` segment.
    pub dynamic: bool,
}

/// Capability to look inside object files.
pub trait ElfInspector: Send + Sync + std::fmt::Debug {
    /// Inspect `path`. Non-ELF files yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// [`ElfError::Io`] if the file cannot be read, [`ElfError::Malformed`]
    /// if it carries the ELF magic but the headers are inconsistent.
    fn inspect(&self, path: &Path) -> Result<Option<ElfInfo>, ElfError>;

    /// The `DT_NEEDED` entries of `path`, in file order.
    ///
    /// # Errors
    ///
    /// As for [`ElfInspector::inspect`].
    fn needed(&self, path: &Path) -> Result<Vec<String>, ElfError>;
}

/// Pure-Rust header parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeInspector;

impl ElfInspector for NativeInspector {
    fn inspect(&self, path: &Path) -> Result<Option<ElfInfo>, ElfError> {
        let Some(mut obj) = ElfObject::open(path)? else {
            return Ok(None);
        };

        let stripped = !obj
            .sections
            .iter()
            .any(|s| s.kind == SHT_SYMTAB || s.name.starts_with(".debug_"));

        let mut build_id = None;
        let notes: Vec<Section> = obj
            .sections
            .iter()
            .filter(|s| s.kind == SHT_NOTE)
            .cloned()
            .collect();
        for note in &notes {
            let data = obj.section_data(note)?;
            if let Some(id) = obj.find_build_id(&data)? {
                build_id = Some(id);
                break;
            }
        }

        Ok(Some(ElfInfo {
            word_size: obj.word_size,
            stripped,
            build_id,
            dynamic: obj.has_dynamic_segment,
        }))
    }

    fn needed(&self, path: &Path) -> Result<Vec<String>, ElfError> {
        let Some(mut obj) = ElfObject::open(path)? else {
            return Ok(Vec::new());
        };

        let mut needed = Vec::new();
        let dynamic: Vec<Section> = obj
            .sections
            .iter()
            .filter(|s| s.kind == SHT_DYNAMIC)
            .cloned()
            .collect();

        for section in &dynamic {
            let strtab = obj
                .sections
                .get(section.link as usize)
                .cloned()
                .ok_or_else(|| obj.malformed("dynamic section links to missing string table"))?;
            let strings = obj.section_data(&strtab)?;
            let data = obj.section_data(section)?;

            let entry_size = if obj.word_size == WordSize::Bits64 { 16 } else { 8 };
            let half = entry_size / 2;
            for entry in data.chunks_exact(entry_size) {
                let tag = obj.layout.word(entry, 0).map_err(|r| obj.malformed(&r))?;
                if tag == DT_NULL {
                    break;
                }
                if tag == DT_NEEDED {
                    let offset = obj.layout.word(entry, half).map_err(|r| obj.malformed(&r))?;
                    needed.push(cstr(&strings, offset as usize));
                }
            }
        }

        Ok(needed)
    }
}

#[derive(Debug, Clone, Copy)]
struct Layout {
    class64: bool,
    big_endian: bool,
}

impl Layout {
    fn u16(self, buf: &[u8], off: usize) -> Result<u16, String> {
        let b = field::<2>(buf, off)?;
        Ok(if self.big_endian {
            u16::from_be_bytes(b)
        } else {
            u16::from_le_bytes(b)
        })
    }

    fn u32(self, buf: &[u8], off: usize) -> Result<u32, String> {
        let b = field::<4>(buf, off)?;
        Ok(if self.big_endian {
            u32::from_be_bytes(b)
        } else {
            u32::from_le_bytes(b)
        })
    }

    fn u64(self, buf: &[u8], off: usize) -> Result<u64, String> {
        let b = field::<8>(buf, off)?;
        Ok(if self.big_endian {
            u64::from_be_bytes(b)
        } else {
            u64::from_le_bytes(b)
        })
    }

    /// Address-sized field.
    fn word(self, buf: &[u8], off: usize) -> Result<u64, String> {
        if self.class64 {
            self.u64(buf, off)
        } else {
            self.u32(buf, off).map(u64::from)
        }
    }
}

fn field<const N: usize>(buf: &[u8], off: usize) -> Result<[u8; N], String> {
    off.checked_add(N)
        .and_then(|end| buf.get(off..end))
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| format!("truncated field at offset {off}"))
}

fn cstr(buf: &[u8], off: usize) -> String {
    let tail = buf.get(off..).unwrap_or_default();
    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    String::from_utf8_lossy(&tail[..end]).into_owned()
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

#[derive(Debug, Clone)]
struct Section {
    name: String,
    kind: u32,
    offset: u64,
    size: u64,
    link: u32,
}

struct ElfObject {
    path: PathBuf,
    file: File,
    len: u64,
    layout: Layout,
    word_size: WordSize,
    sections: Vec<Section>,
    has_dynamic_segment: bool,
}

impl ElfObject {
    fn open(path: &Path) -> Result<Option<Self>, ElfError> {
        let io_err = |source| ElfError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(io_err)?;
        let len = file.metadata().map_err(io_err)?.len();

        let mut ident = [0u8; 16];
        if len < 16 {
            return Ok(None);
        }
        file.read_exact(&mut ident).map_err(io_err)?;
        if ident[..4] != ELF_MAGIC {
            return Ok(None);
        }

        let malformed = |reason: &str| ElfError::Malformed {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let word_size = WordSize::from_elf_class(ident[4])
            .ok_or_else(|| malformed(&format!("unknown ELF class {}", ident[4])))?;
        let big_endian = match ident[5] {
            1 => false,
            2 => true,
            other => return Err(malformed(&format!("unknown data encoding {other}"))),
        };
        let layout = Layout {
            class64: word_size == WordSize::Bits64,
            big_endian,
        };

        let mut obj = Self {
            path: path.to_path_buf(),
            file,
            len,
            layout,
            word_size,
            sections: Vec::new(),
            has_dynamic_segment: false,
        };

        let header_len = if layout.class64 { 64 } else { 52 };
        let header = obj.read_at(0, header_len)?;
        let h = |r: Result<u64, String>| r.map_err(|reason| malformed(&reason));

        let (phoff, phentsize, phnum, shoff, shentsize, shnum, shstrndx) = if layout.class64 {
            (
                h(layout.u64(&header, 0x20))?,
                h(layout.u16(&header, 0x36).map(u64::from))?,
                h(layout.u16(&header, 0x38).map(u64::from))?,
                h(layout.u64(&header, 0x28))?,
                h(layout.u16(&header, 0x3a).map(u64::from))?,
                h(layout.u16(&header, 0x3c).map(u64::from))?,
                h(layout.u16(&header, 0x3e).map(u64::from))?,
            )
        } else {
            (
                h(layout.u32(&header, 0x1c).map(u64::from))?,
                h(layout.u16(&header, 0x2a).map(u64::from))?,
                h(layout.u16(&header, 0x2c).map(u64::from))?,
                h(layout.u32(&header, 0x20).map(u64::from))?,
                h(layout.u16(&header, 0x2e).map(u64::from))?,
                h(layout.u16(&header, 0x30).map(u64::from))?,
                h(layout.u16(&header, 0x32).map(u64::from))?,
            )
        };

        if phoff != 0 && phnum != 0 {
            let table = obj.read_at(phoff, phentsize * phnum)?;
            for i in 0..phnum as usize {
                let p_type = h(layout.u32(&table, i * phentsize as usize).map(u64::from))?;
                if p_type == u64::from(PT_DYNAMIC) {
                    obj.has_dynamic_segment = true;
                }
            }
        }

        if shoff != 0 && shnum != 0 {
            let min_entsize = if layout.class64 { 64 } else { 40 };
            if shentsize < min_entsize {
                return Err(malformed("section header entries too small"));
            }
            let table = obj.read_at(shoff, shentsize * shnum)?;
            let mut raw = Vec::with_capacity(shnum as usize);
            for i in 0..shnum as usize {
                let base = i * shentsize as usize;
                let name = h(layout.u32(&table, base).map(u64::from))?;
                let kind = h(layout.u32(&table, base + 4).map(u64::from))? as u32;
                let (offset, size, link) = if layout.class64 {
                    (
                        h(layout.u64(&table, base + 0x18))?,
                        h(layout.u64(&table, base + 0x20))?,
                        h(layout.u32(&table, base + 0x28).map(u64::from))? as u32,
                    )
                } else {
                    (
                        h(layout.u32(&table, base + 0x10).map(u64::from))?,
                        h(layout.u32(&table, base + 0x14).map(u64::from))?,
                        h(layout.u32(&table, base + 0x18).map(u64::from))? as u32,
                    )
                };
                raw.push((name as usize, kind, offset, size, link));
            }

            let names = match raw.get(shstrndx as usize) {
                Some(&(_, _, offset, size, _)) if shstrndx != 0 => obj.read_at(offset, size)?,
                _ => Vec::new(),
            };

            obj.sections = raw
                .into_iter()
                .map(|(name, kind, offset, size, link)| Section {
                    name: cstr(&names, name),
                    kind,
                    offset,
                    size,
                    link,
                })
                .collect();
        }

        Ok(Some(obj))
    }

    fn malformed(&self, reason: &str) -> ElfError {
        ElfError::Malformed {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    fn read_at(&mut self, offset: u64, len: u64) -> Result<Vec<u8>, ElfError> {
        if offset.checked_add(len).is_none_or(|end| end > self.len) {
            return Err(self.malformed(&format!(
                "range {offset}+{len} exceeds file size {}",
                self.len
            )));
        }
        let io_err = |source| ElfError::Io {
            path: self.path.clone(),
            source,
        };
        let mut buf = vec![0u8; len as usize];
        self.file.seek(SeekFrom::Start(offset)).map_err(io_err)?;
        self.file.read_exact(&mut buf).map_err(io_err)?;
        Ok(buf)
    }

    fn section_data(&mut self, section: &Section) -> Result<Vec<u8>, ElfError> {
        self.read_at(section.offset, section.size)
    }

    fn find_build_id(&self, notes: &[u8]) -> Result<Option<String>, ElfError> {
        let mut off = 0usize;
        while off + 12 <= notes.len() {
            let get = |at| self.layout.u32(notes, at).map_err(|r| self.malformed(&r));
            let namesz = get(off)? as usize;
            let descsz = get(off + 4)? as usize;
            let kind = get(off + 8)?;

            let name_start = off + 12;
            let desc_start = name_start + align4(namesz);
            let next = desc_start + align4(descsz);
            if next > notes.len() {
                return Err(self.malformed("note extends past its section"));
            }

            let name = &notes[name_start..name_start + namesz];
            if kind == NT_GNU_BUILD_ID && name.strip_suffix(&[0]).unwrap_or(name) == b"GNU" {
                let mut id = String::with_capacity(descsz * 2);
                for byte in &notes[desc_start..desc_start + descsz] {
                    let _ = write!(id, "{byte:02x}");
                }
                return Ok(Some(id));
            }
            off = next;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::fixture::ElfFixture;
    use super::*;

    #[test]
    fn test_non_elf_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.sh");
        std::fs::write(&path, "#!/bin/sh\necho hi\n").unwrap();
        assert_eq!(NativeInspector.inspect(&path).unwrap(), None);

        let tiny = dir.path().join("tiny");
        std::fs::write(&tiny, b"\x7fEL").unwrap();
        assert_eq!(NativeInspector.inspect(&tiny).unwrap(), None);
    }

    #[test]
    fn test_unstripped_64bit_with_build_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prog");
        ElfFixture::new(WordSize::Bits64)
            .symtab()
            .dynamic(&["libc.so.6", "libm.so.6"])
            .build_id(&[0xab, 0xcd, 0x01, 0x02])
            .write(&path);

        let info = NativeInspector.inspect(&path).unwrap().unwrap();
        assert_eq!(info.word_size, WordSize::Bits64);
        assert!(!info.stripped);
        assert!(info.dynamic);
        assert_eq!(info.build_id.as_deref(), Some("abcd0102"));

        assert_eq!(
            NativeInspector.needed(&path).unwrap(),
            vec!["libc.so.6".to_string(), "libm.so.6".to_string()]
        );
    }

    #[test]
    fn test_stripped_32bit_big_endian() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.so");
        ElfFixture::new(WordSize::Bits32)
            .big_endian()
            .dynamic(&["libz.so.1"])
            .write(&path);

        let info = NativeInspector.inspect(&path).unwrap().unwrap();
        assert_eq!(info.word_size, WordSize::Bits32);
        assert!(info.stripped);
        assert!(info.dynamic);
        assert_eq!(info.build_id, None);
        assert_eq!(NativeInspector.needed(&path).unwrap(), vec!["libz.so.1"]);
    }

    #[test]
    fn test_debug_sections_count_as_unstripped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obj.o");
        ElfFixture::new(WordSize::Bits64).debug_info().write(&path);

        let info = NativeInspector.inspect(&path).unwrap().unwrap();
        assert!(!info.stripped);
        assert!(!info.dynamic);
        assert!(NativeInspector.needed(&path).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_headers_are_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken");
        let mut bytes = ElfFixture::new(WordSize::Bits64).symtab().build();
        bytes.truncate(80);
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            NativeInspector.inspect(&path),
            Err(ElfError::Malformed { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            NativeInspector.inspect(Path::new("/nonexistent/elf")),
            Err(ElfError::Io { .. })
        ));
    }
}
