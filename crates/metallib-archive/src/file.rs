use core::fmt;
use std::collections::HashSet;

use crate::error::ArchiveError;
use crate::fourcc::FourCC;
use crate::header::{section_bytes, MetallibHeader};
use crate::module::{AirVersion, ModuleKind};
use crate::reader::{read_fourcc, read_u16_le, read_u32_le, read_u64_le, slice};

/// Hard cap on the function list entry count.
///
/// System libraries hold at most a few thousand functions; the cap bounds allocation and the
/// validation loop on hostile input.
pub const MAX_MODULE_COUNT: u32 = 65_536;

// Entry group size field + the bare `ENDT` terminator.
const MIN_GROUP_LEN: usize = 4 + 4;

/// One function list entry and the bytes it references.
#[derive(Clone, PartialEq, Eq)]
pub struct FunctionEntry<'a> {
    /// Module (function) name.
    pub name: &'a str,
    /// Module kind from the `TYPE` tag ([`ModuleKind::Unqualified`] when absent).
    pub kind: ModuleKind,
    /// SHA-256 from the `HASH` tag, if present.
    pub hash: Option<[u8; 32]>,
    /// AIR/language versions from the `VERS` tag, if present.
    pub air_version: Option<AirVersion>,
    /// Tags this crate does not interpret, in file order.
    pub extra_tags: Vec<(FourCC, &'a [u8])>,
    /// Public metadata block (tag list), empty for legacy entries without `OFFT`.
    pub public_metadata: &'a [u8],
    /// Private metadata block (tag list), empty for legacy entries without `OFFT`.
    pub private_metadata: &'a [u8],
    /// Absolute offset of the payload within the container.
    pub offset: u64,
    /// Module payload.
    pub bytes: &'a [u8],
}

impl fmt::Debug for FunctionEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionEntry")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("air_version", &self.air_version)
            .field("offset", &self.offset)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A parsed Metal library container.
///
/// Parsing is strict about bounds: every section, tag and payload range is validated against the
/// container's declared file size before it is exposed.
#[derive(Debug, Clone)]
pub struct MetallibFile<'a> {
    bytes: &'a [u8],
    header: MetallibHeader,
    entries: Vec<FunctionEntry<'a>>,
    extension: &'a [u8],
}

impl<'a> MetallibFile<'a> {
    /// Parses a container from `bytes`.
    ///
    /// The input is treated as **untrusted**; this never panics on malformed data.
    pub fn parse(bytes: &'a [u8]) -> Result<MetallibFile<'a>, ArchiveError> {
        let header = MetallibHeader::parse(bytes)?;
        header.validate(bytes.len())?;
        let bytes = slice(bytes, 0, header.file_size)?;

        let list = section_bytes(bytes, "function list", header.function_list)?;
        let public = section_bytes(bytes, "public metadata", header.public_metadata)?;
        let private = section_bytes(bytes, "private metadata", header.private_metadata)?;
        let data = section_bytes(bytes, "module data", header.module_data)?;

        let entry_count =
            read_u32_le(list, 0).map_err(|e| e.within("function list entry count"))?;
        if entry_count > MAX_MODULE_COUNT {
            return Err(ArchiveError::malformed(format!(
                "entry count {entry_count} exceeds maximum {MAX_MODULE_COUNT}"
            )));
        }

        let mut entries = Vec::with_capacity(entry_count.min(1024) as usize);
        let mut cursor = 4usize;
        let mut sequential = 0u64;
        for index in 0..entry_count as usize {
            let group_len = read_u32_le(list, cursor).map_err(|e| {
                e.within(format!(
                    "function list declares {entry_count} entries but entry {index} at {cursor} is missing"
                ))
            })? as usize;
            if group_len < MIN_GROUP_LEN {
                return Err(ArchiveError::malformed(format!(
                    "entry {index} size {group_len} is smaller than {MIN_GROUP_LEN}"
                )));
            }
            let group_end = cursor.checked_add(group_len).ok_or_else(|| {
                ArchiveError::malformed(format!("entry {index} size {group_len} overflows"))
            })?;
            let group = list.get(cursor + 4..group_end).ok_or_else(|| {
                ArchiveError::truncated(format!(
                    "entry {index} at {cursor}..{group_end} runs past function list size {}",
                    list.len()
                ))
            })?;
            let raw = parse_group(group).map_err(|e| e.within(format!("entry {index}")))?;
            cursor = group_end;

            let name = raw
                .name
                .ok_or_else(|| ArchiveError::malformed(format!("entry {index} has no NAME tag")))?;
            let size = raw.size.ok_or_else(|| {
                ArchiveError::malformed(format!("entry {index} ({name:?}) has no MDSZ tag"))
            })?;

            let (public_metadata, private_metadata, rel_offset) = match raw.offsets {
                Some([public_rel, private_rel, module_rel]) => (
                    metadata_block(public, public_rel)
                        .map_err(|e| e.within(format!("{name:?} public metadata")))?,
                    metadata_block(private, private_rel)
                        .map_err(|e| e.within(format!("{name:?} private metadata")))?,
                    module_rel,
                ),
                // Legacy layout: payloads follow each other in table order.
                None => (&[][..], &[][..], sequential),
            };

            let payload = slice(data, rel_offset, size)
                .map_err(|e| e.within(format!("{name:?} payload in module data section")))?;
            sequential = rel_offset + size;

            entries.push(FunctionEntry {
                name,
                kind: raw.kind.map(ModuleKind::from_u8).unwrap_or(ModuleKind::Unqualified),
                hash: raw.hash,
                air_version: raw.version,
                extra_tags: raw.extra,
                public_metadata,
                private_metadata,
                offset: header.module_data.offset + rel_offset,
                bytes: payload,
            });
        }

        check_unique_names(&entries)?;
        check_disjoint(&entries)?;

        Ok(MetallibFile {
            bytes,
            header,
            entries,
            extension: &list[cursor..],
        })
    }

    /// Returns the parsed header.
    pub fn header(&self) -> &MetallibHeader {
        &self.header
    }

    /// Returns the raw bytes covered by the declared file size.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Function list entries in table order.
    pub fn entries(&self) -> &[FunctionEntry<'a>] {
        &self.entries
    }

    /// Function list bytes after the last entry: the header extension group in libraries that
    /// carry one, empty otherwise.
    pub fn extension(&self) -> &'a [u8] {
        self.extension
    }

    /// Decodes [`MetallibFile::extension`] as a size-prefixed tag group ending in `ENDT`.
    pub fn extension_tags(&self) -> Result<Vec<(FourCC, &'a [u8])>, ArchiveError> {
        if self.extension.is_empty() {
            return Ok(Vec::new());
        }
        let len = read_u32_le(self.extension, 0).map_err(|e| e.within("extension size"))? as usize;
        let group = self.extension.get(4..len).ok_or_else(|| {
            ArchiveError::truncated(format!(
                "extension group of {len} bytes does not fit in the {} trailing bytes",
                self.extension.len()
            ))
        })?;

        let mut tags = Vec::new();
        let mut cursor = 0usize;
        loop {
            let tag = read_fourcc(group, cursor)
                .map_err(|e| e.within("extension missing ENDT terminator"))?;
            if tag == FourCC::ENDT {
                return Ok(tags);
            }
            let len = read_u16_le(group, cursor + 4).map_err(|e| e.within(format!("{tag} tag")))?;
            let data = slice(group, (cursor + 6) as u64, u64::from(len))
                .map_err(|e| e.within(format!("{tag} tag payload")))?;
            cursor += 6 + usize::from(len);
            tags.push((tag, data));
        }
    }

    /// Looks an entry up by name.
    pub fn get(&self, name: &str) -> Option<&FunctionEntry<'a>> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Returns a human-readable summary of the container and its modules.
    pub fn debug_summary(&self) -> String {
        use core::fmt::Write as _;

        let info = &self.header.info;
        let mut out = String::new();
        let _ = write!(
            &mut out,
            "MTLB v{}.{} platform={:#06x} os={:#04x} {}.{} file_size={} modules={}",
            info.version_major,
            info.version_minor,
            info.platform,
            info.target_os,
            info.os_version_major,
            info.os_version_minor,
            self.header.file_size,
            self.entries.len()
        );
        for (idx, entry) in self.entries.iter().enumerate() {
            let _ = write!(
                &mut out,
                "\n  [{idx:02}] {:<12} {} bytes @{} {}",
                entry.kind.to_string(),
                entry.bytes.len(),
                entry.offset,
                entry.name
            );
            if let Some(version) = entry.air_version {
                let _ = write!(&mut out, " ({version})");
            }
        }
        if !self.extension.is_empty() {
            match self.extension_tags() {
                Ok(tags) => {
                    let _ = write!(&mut out, "\n  extension:");
                    for (tag, data) in tags {
                        let _ = write!(&mut out, " {tag}({})", data.len());
                    }
                }
                Err(_) => {
                    let _ = write!(&mut out, "\n  extension: {} bytes", self.extension.len());
                }
            }
        }
        out
    }
}

#[derive(Default)]
struct RawGroup<'a> {
    name: Option<&'a str>,
    kind: Option<u8>,
    hash: Option<[u8; 32]>,
    size: Option<u64>,
    offsets: Option<[u64; 3]>,
    version: Option<AirVersion>,
    extra: Vec<(FourCC, &'a [u8])>,
}

fn parse_group(group: &[u8]) -> Result<RawGroup<'_>, ArchiveError> {
    let mut raw = RawGroup::default();
    let mut cursor = 0usize;
    loop {
        let tag = read_fourcc(group, cursor).map_err(|e| e.within("missing ENDT terminator"))?;
        if tag == FourCC::ENDT {
            break;
        }
        let len = read_u16_le(group, cursor + 4).map_err(|e| e.within(format!("{tag} tag")))?;
        let data = slice(group, (cursor + 6) as u64, u64::from(len))
            .map_err(|e| e.within(format!("{tag} tag payload")))?;
        cursor += 6 + usize::from(len);

        match tag {
            FourCC::NAME => set_once(&mut raw.name, tag, parse_name(data)?)?,
            FourCC::TYPE => set_once(&mut raw.kind, tag, fixed::<1>(tag, data)?[0])?,
            FourCC::HASH => set_once(&mut raw.hash, tag, fixed::<32>(tag, data)?)?,
            FourCC::MDSZ => {
                set_once(&mut raw.size, tag, u64::from_le_bytes(fixed::<8>(tag, data)?))?
            }
            FourCC::OFFT => {
                let raw_offsets = fixed::<24>(tag, data)?;
                let offsets = [
                    read_u64_le(&raw_offsets, 0)?,
                    read_u64_le(&raw_offsets, 8)?,
                    read_u64_le(&raw_offsets, 16)?,
                ];
                set_once(&mut raw.offsets, tag, offsets)?
            }
            FourCC::VERS => {
                let v = fixed::<8>(tag, data)?;
                let version = AirVersion {
                    air_major: read_u16_le(&v, 0)?,
                    air_minor: read_u16_le(&v, 2)?,
                    language_major: read_u16_le(&v, 4)?,
                    language_minor: read_u16_le(&v, 6)?,
                };
                set_once(&mut raw.version, tag, version)?
            }
            _ => raw.extra.push((tag, data)),
        }
    }
    Ok(raw)
}

fn set_once<T>(slot: &mut Option<T>, tag: FourCC, value: T) -> Result<(), ArchiveError> {
    if slot.is_some() {
        return Err(ArchiveError::malformed(format!("duplicate {tag} tag")));
    }
    *slot = Some(value);
    Ok(())
}

fn fixed<const N: usize>(tag: FourCC, data: &[u8]) -> Result<[u8; N], ArchiveError> {
    data.try_into().map_err(|_| {
        ArchiveError::malformed(format!(
            "{tag} payload is {} bytes, expected {N}",
            data.len()
        ))
    })
}

fn parse_name(data: &[u8]) -> Result<&str, ArchiveError> {
    let Some((&0, text)) = data.split_last() else {
        return Err(ArchiveError::malformed("NAME payload is not NUL-terminated"));
    };
    if text.is_empty() || text.contains(&0) {
        return Err(ArchiveError::malformed("NAME payload is empty or has interior NUL"));
    }
    core::str::from_utf8(text)
        .map_err(|e| ArchiveError::malformed(format!("NAME payload is not UTF-8: {e}")))
}

fn metadata_block(section: &[u8], rel_offset: u64) -> Result<&[u8], ArchiveError> {
    let at = usize::try_from(rel_offset).map_err(|_| {
        ArchiveError::truncated(format!("block offset {rel_offset} does not fit in memory"))
    })?;
    let len = read_u32_le(section, at)?;
    slice(section, rel_offset + 4, u64::from(len))
}

fn check_unique_names(entries: &[FunctionEntry<'_>]) -> Result<(), ArchiveError> {
    let mut seen = HashSet::with_capacity(entries.len());
    for entry in entries {
        if !seen.insert(entry.name) {
            return Err(ArchiveError::malformed(format!(
                "duplicate module name {:?}",
                entry.name
            )));
        }
    }
    Ok(())
}

fn check_disjoint(entries: &[FunctionEntry<'_>]) -> Result<(), ArchiveError> {
    let mut ranges: Vec<(u64, u64, &str)> = entries
        .iter()
        .filter(|entry| !entry.bytes.is_empty())
        .map(|entry| (entry.offset, entry.offset + entry.bytes.len() as u64, entry.name))
        .collect();
    ranges.sort_unstable();
    for pair in ranges.windows(2) {
        let (_, prev_end, prev_name) = pair[0];
        let (next_start, _, next_name) = pair[1];
        if prev_end > next_start {
            return Err(ArchiveError::malformed(format!(
                "payloads of {prev_name:?} and {next_name:?} overlap"
            )));
        }
    }
    Ok(())
}
