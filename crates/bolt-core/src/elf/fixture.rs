//! Minimal ELF images for tests.

use std::path::Path;

use bolt_schema::WordSize;

#[derive(Debug, Clone)]
pub(crate) struct ElfFixture {
    word_size: WordSize,
    big_endian: bool,
    symtab: bool,
    debug_info: bool,
    needed: Option<Vec<String>>,
    build_id: Option<Vec<u8>>,
}

struct Out {
    buf: Vec<u8>,
    big_endian: bool,
    class64: bool,
}

impl Out {
    fn u16(&mut self, v: u16) {
        let b = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        self.buf.extend_from_slice(&b);
    }

    fn u32(&mut self, v: u32) {
        let b = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        self.buf.extend_from_slice(&b);
    }

    fn u64(&mut self, v: u64) {
        let b = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        self.buf.extend_from_slice(&b);
    }

    fn word(&mut self, v: u64) {
        if self.class64 {
            self.u64(v);
        } else {
            self.u32(v as u32);
        }
    }

    fn pad_to(&mut self, len: usize) {
        self.buf.resize(len, 0);
    }
}

struct Sect {
    name: usize,
    kind: u32,
    data: Vec<u8>,
    link: u32,
}

impl ElfFixture {
    pub(crate) fn new(word_size: WordSize) -> Self {
        Self {
            word_size,
            big_endian: false,
            symtab: false,
            debug_info: false,
            needed: None,
            build_id: None,
        }
    }

    pub(crate) fn big_endian(mut self) -> Self {
        self.big_endian = true;
        self
    }

    pub(crate) fn symtab(mut self) -> Self {
        self.symtab = true;
        self
    }

    pub(crate) fn debug_info(mut self) -> Self {
        self.debug_info = true;
        self
    }

    /// Dynamically linked against `needed`.
    pub(crate) fn dynamic(mut self, needed: &[&str]) -> Self {
        self.needed = Some(needed.iter().map(ToString::to_string).collect());
        self
    }

    pub(crate) fn build_id(mut self, id: &[u8]) -> Self {
        self.build_id = Some(id.to_vec());
        self
    }

    pub(crate) fn write(&self, path: &Path) {
        std::fs::write(path, self.build()).unwrap();
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let class64 = self.word_size == WordSize::Bits64;
        let mut enc = Out {
            buf: Vec::new(),
            big_endian: self.big_endian,
            class64,
        };

        let mut shstrtab = vec![0u8];
        let mut add_name = |name: &str| {
            let off = shstrtab.len();
            shstrtab.extend_from_slice(name.as_bytes());
            shstrtab.push(0);
            off
        };

        let mut sections = vec![Sect {
            name: 0,
            kind: 0,
            data: Vec::new(),
            link: 0,
        }];
        let shstr_name = add_name(".shstrtab");
        sections.push(Sect {
            name: shstr_name,
            kind: 3,
            data: Vec::new(),
            link: 0,
        });

        let mut dynamic_index = None;
        if let Some(needed) = &self.needed {
            let mut dynstr = vec![0u8];
            let mut entries = Out {
                buf: Vec::new(),
                big_endian: self.big_endian,
                class64,
            };
            for lib in needed {
                entries.word(1);
                entries.word(dynstr.len() as u64);
                dynstr.extend_from_slice(lib.as_bytes());
                dynstr.push(0);
            }
            entries.word(0);
            entries.word(0);

            let dynstr_index = sections.len() as u32;
            sections.push(Sect {
                name: add_name(".dynstr"),
                kind: 3,
                data: dynstr,
                link: 0,
            });
            dynamic_index = Some(sections.len());
            sections.push(Sect {
                name: add_name(".dynamic"),
                kind: 6,
                data: entries.buf,
                link: dynstr_index,
            });
        }

        if let Some(id) = &self.build_id {
            let mut note = Out {
                buf: Vec::new(),
                big_endian: self.big_endian,
                class64,
            };
            note.u32(4);
            note.u32(id.len() as u32);
            note.u32(3);
            note.buf.extend_from_slice(b"GNU\0");
            note.buf.extend_from_slice(id);
            let padded = (note.buf.len() + 3) & !3;
            note.pad_to(padded);
            sections.push(Sect {
                name: add_name(".note.gnu.build-id"),
                kind: 7,
                data: note.buf,
                link: 0,
            });
        }

        if self.symtab {
            let entsize = if class64 { 24 } else { 16 };
            sections.push(Sect {
                name: add_name(".symtab"),
                kind: 2,
                data: vec![0; entsize],
                link: 0,
            });
        }

        if self.debug_info {
            sections.push(Sect {
                name: add_name(".debug_info"),
                kind: 1,
                data: vec![0xde, 0xad, 0xbe, 0xef],
                link: 0,
            });
        }

        sections[1].data = shstrtab;

        let ehsize: usize = if class64 { 64 } else { 52 };
        let phentsize: usize = if class64 { 56 } else { 32 };
        let shentsize: usize = if class64 { 64 } else { 40 };
        let phnum = usize::from(dynamic_index.is_some());

        let mut offsets = Vec::with_capacity(sections.len());
        let mut cursor = ehsize + phentsize * phnum;
        for s in &sections {
            cursor = (cursor + 7) & !7;
            offsets.push(cursor);
            cursor += s.data.len();
        }
        let shoff = (cursor + 7) & !7;

        // ELF header
        enc.buf.extend_from_slice(&[0x7f, b'E', b'L', b'F']);
        enc.buf.push(if class64 { 2 } else { 1 });
        enc.buf.push(if self.big_endian { 2 } else { 1 });
        enc.buf.push(1);
        enc.pad_to(16);
        enc.u16(3);
        enc.u16(if class64 { 62 } else { 3 });
        enc.u32(1);
        enc.word(0);
        enc.word(if phnum > 0 { ehsize as u64 } else { 0 });
        enc.word(shoff as u64);
        enc.u32(0);
        enc.u16(ehsize as u16);
        enc.u16(phentsize as u16);
        enc.u16(phnum as u16);
        enc.u16(shentsize as u16);
        enc.u16(sections.len() as u16);
        enc.u16(1);
        assert_eq!(enc.buf.len(), ehsize);

        if let Some(index) = dynamic_index {
            let start = enc.buf.len();
            enc.u32(2);
            if class64 {
                enc.u32(0);
                enc.u64(offsets[index] as u64);
            } else {
                enc.u32(offsets[index] as u32);
            }
            enc.pad_to(start + phentsize);
        }

        for (s, &off) in sections.iter().zip(&offsets) {
            enc.pad_to(off);
            enc.buf.extend_from_slice(&s.data);
        }
        enc.pad_to(shoff);

        for (s, &off) in sections.iter().zip(&offsets) {
            let start = enc.buf.len();
            enc.u32(s.name as u32);
            enc.u32(s.kind);
            enc.word(0);
            enc.word(0);
            enc.word(if s.kind == 0 { 0 } else { off as u64 });
            enc.word(s.data.len() as u64);
            enc.u32(s.link);
            enc.pad_to(start + shentsize);
        }

        enc.buf
    }
}
