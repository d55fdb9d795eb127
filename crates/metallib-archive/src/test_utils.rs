use crate::{FourCC, LibraryInfo, Metallib, MetallibHeader, Module, ModuleKind, Section, HEADER_LEN};

/// Bitcode wrapper magic that real AIR payloads start with.
pub const AIR_WRAPPER_MAGIC: [u8; 4] = [0xDE, 0xC0, 0x17, 0x0B];

/// A recognizable fake AIR payload: wrapper magic followed by `name` and filler words.
pub fn fake_air(name: &str, words: usize) -> Vec<u8> {
    let mut out = AIR_WRAPPER_MAGIC.to_vec();
    out.extend_from_slice(name.as_bytes());
    out.resize(4 + name.len().div_ceil(4) * 4, 0);
    for i in 0..words {
        out.extend_from_slice(&(i as u32).to_le_bytes());
    }
    out
}

/// Builds a library with `count` modules named `fn_0`, `fn_1`, ... of alternating kinds.
pub fn sample_library(count: usize) -> Metallib {
    let kinds = [ModuleKind::Vertex, ModuleKind::Fragment, ModuleKind::Kernel];
    let modules = (0..count).map(|i| {
        let name = format!("fn_{i}");
        let bytes = fake_air(&name, i + 1);
        Module::new(name, kinds[i % kinds.len()], bytes)
    });
    Metallib::from_modules(LibraryInfo::default(), modules).expect("sample names are unique")
}

/// Encodes one tag as it appears inside a function list entry.
pub fn tag(name: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let len = u16::try_from(payload.len()).expect("tag payload does not fit in u16");
    let mut out = name.to_vec();
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Encodes a `NAME` tag (adds the NUL terminator).
pub fn name_tag(name: &str) -> Vec<u8> {
    let mut payload = name.as_bytes().to_vec();
    payload.push(0);
    tag(b"NAME", &payload)
}

/// Encodes an `MDSZ` tag.
pub fn size_tag(size: u64) -> Vec<u8> {
    tag(b"MDSZ", &size.to_le_bytes())
}

/// Encodes an `OFFT` tag from section-relative offsets.
pub fn offsets_tag(public: u64, private: u64, module: u64) -> Vec<u8> {
    let mut payload = Vec::with_capacity(24);
    for offset in [public, private, module] {
        payload.extend_from_slice(&offset.to_le_bytes());
    }
    tag(b"OFFT", &payload)
}

/// Wraps encoded tags into an entry group: size prefix, tags, bare `ENDT`.
pub fn entry(tags: &[Vec<u8>]) -> Vec<u8> {
    let body: Vec<u8> = tags.concat();
    let len = u32::try_from(4 + body.len() + 4).expect("entry does not fit in u32");
    let mut out = len.to_le_bytes().to_vec();
    out.extend_from_slice(&body);
    out.extend_from_slice(&FourCC(*b"ENDT").0);
    out
}

/// Sections of a hand-assembled container.
///
/// Unlike [`crate::pack`], this writes whatever it is given, so tests can describe containers
/// the packer would never produce (wrong entry counts, overlapping payloads, missing `OFFT`).
#[derive(Debug, Clone, Default)]
pub struct RawContainer {
    /// Value written as the function list entry count.
    pub entry_count: u32,
    /// Encoded entry groups, concatenated after the count.
    pub entries: Vec<Vec<u8>>,
    /// Public metadata section.
    pub public_metadata: Vec<u8>,
    /// Private metadata section.
    pub private_metadata: Vec<u8>,
    /// Module data section.
    pub module_data: Vec<u8>,
}

impl RawContainer {
    /// Lays the sections out back-to-back after the header, with no padding.
    pub fn build(&self) -> Vec<u8> {
        let mut list = self.entry_count.to_le_bytes().to_vec();
        for group in &self.entries {
            list.extend_from_slice(group);
        }

        let mut cursor = HEADER_LEN as u64;
        let mut place = |len: usize| {
            let section = Section {
                offset: cursor,
                size: len as u64,
            };
            cursor += len as u64;
            section
        };
        let header = MetallibHeader {
            info: LibraryInfo::default(),
            function_list: place(list.len()),
            public_metadata: place(self.public_metadata.len()),
            private_metadata: place(self.private_metadata.len()),
            module_data: place(self.module_data.len()),
            file_size: 0,
        };
        let header = MetallibHeader {
            file_size: header.module_data.offset + header.module_data.size,
            ..header
        };

        let mut out = Vec::with_capacity(header.file_size as usize);
        header.write(&mut out);
        out.extend_from_slice(&list);
        out.extend_from_slice(&self.public_metadata);
        out.extend_from_slice(&self.private_metadata);
        out.extend_from_slice(&self.module_data);
        out
    }
}
