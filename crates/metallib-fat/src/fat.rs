use core::fmt;

use crate::cpu::{cpu_type_name, CPU_SUBTYPE_MASK, CPU_TYPE_AIR64};
use crate::error::FatError;

/// Universal header magic, 32-bit directory entries.
pub const FAT_MAGIC: u32 = 0xCAFE_BABE;
/// Byte-swapped [`FAT_MAGIC`]. Universal headers are always big-endian, so this is rejected.
pub const FAT_CIGAM: u32 = 0xBEBA_FECA;
/// Universal header magic, 64-bit directory entries.
pub const FAT_MAGIC_64: u32 = 0xCAFE_BABF;
/// Byte-swapped [`FAT_MAGIC_64`]; rejected like [`FAT_CIGAM`].
pub const FAT_CIGAM_64: u32 = 0xBFBA_FECA;

/// Hard cap on the number of directory entries.
///
/// Real containers carry a handful of slices; this bounds the validation loop on hostile input.
pub const MAX_FAT_ARCHS: u32 = 128;

/// Largest slice alignment exponent accepted (`2^15`), matching the platform's `MAXSECTALIGN`.
pub const MAX_SECTION_ALIGN: u32 = 15;

const FAT_HEADER_LEN: usize = 4 + 4; // magic + nfat_arch
const FAT_ARCH_LEN: usize = 4 + 4 + 4 + 4 + 4; // cputype + cpusubtype + offset + size + align
const FAT_ARCH_64_LEN: usize = 4 + 4 + 8 + 8 + 4 + 4; // ... + align + reserved

/// Width of the directory entries in a universal container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatFlavor {
    /// `fat_arch` entries with 32-bit offsets and sizes.
    Fat32,
    /// `fat_arch_64` entries with 64-bit offsets and sizes.
    Fat64,
}

impl FatFlavor {
    fn entry_len(self) -> usize {
        match self {
            FatFlavor::Fat32 => FAT_ARCH_LEN,
            FatFlavor::Fat64 => FAT_ARCH_64_LEN,
        }
    }

    /// The magic number that introduces this flavor.
    pub fn magic(self) -> u32 {
        match self {
            FatFlavor::Fat32 => FAT_MAGIC,
            FatFlavor::Fat64 => FAT_MAGIC_64,
        }
    }
}

/// The fixed header of a universal container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatHeader {
    /// Directory entry width, derived from the magic.
    pub flavor: FatFlavor,
    /// Number of directory entries following the header.
    pub arch_count: u32,
}

/// One entry of the slice directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatArch {
    /// CPU type (e.g. [`CPU_TYPE_AIR64`]).
    pub cpu_type: u32,
    /// CPU subtype, including capability bits.
    pub cpu_subtype: u32,
    /// Byte offset of the slice from the start of the container.
    pub offset: u64,
    /// Byte length of the slice.
    pub size: u64,
    /// Alignment of `offset`, as a power-of-two exponent.
    pub align: u32,
}

impl FatArch {
    /// Returns `true` if this entry is selected by `selector`.
    pub fn matches(&self, selector: &ArchSelector) -> bool {
        if self.cpu_type != selector.cpu_type {
            return false;
        }
        match selector.cpu_subtype {
            None => true,
            Some(subtype) => {
                (self.cpu_subtype & !CPU_SUBTYPE_MASK) == (subtype & !CPU_SUBTYPE_MASK)
            }
        }
    }
}

/// Identifies the slice to extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchSelector {
    /// CPU type that must match exactly.
    pub cpu_type: u32,
    /// Optional CPU subtype, compared with capability bits masked off.
    ///
    /// Required only when the directory holds several slices of the same CPU type.
    pub cpu_subtype: Option<u32>,
}

impl ArchSelector {
    /// Selects the generic `AIR64` slice.
    pub const fn air64() -> Self {
        Self {
            cpu_type: CPU_TYPE_AIR64,
            cpu_subtype: None,
        }
    }

    /// Selects any slice with `cpu_type`.
    pub const fn cpu_type(cpu_type: u32) -> Self {
        Self {
            cpu_type,
            cpu_subtype: None,
        }
    }

    /// Narrows the selector to `cpu_subtype`.
    pub const fn with_subtype(mut self, cpu_subtype: u32) -> Self {
        self.cpu_subtype = Some(cpu_subtype);
        self
    }
}

impl fmt::Display for ArchSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match cpu_type_name(self.cpu_type) {
            Some(name) => write!(f, "cpu type {name} ({:#x})", self.cpu_type)?,
            None => write!(f, "cpu type {:#x}", self.cpu_type)?,
        }
        if let Some(subtype) = self.cpu_subtype {
            write!(f, " subtype {subtype:#x}")?;
        }
        Ok(())
    }
}

/// A slice copied out of a universal container.
///
/// The bytes are owned, so the slice outlives the container it came from.
#[derive(Clone, PartialEq, Eq)]
pub struct ArchSlice {
    /// The directory entry the slice was extracted from.
    pub arch: FatArch,
    /// The slice contents, exactly `arch.size` bytes.
    pub bytes: Vec<u8>,
}

impl fmt::Debug for ArchSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchSlice")
            .field("arch", &self.arch)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A parsed universal container.
///
/// Parsing validates every directory entry up front, so slice accessors never read out of
/// bounds.
#[derive(Debug, Clone)]
pub struct FatFile<'a> {
    bytes: &'a [u8],
    header: FatHeader,
    archs: Vec<FatArch>,
}

impl<'a> FatFile<'a> {
    /// Parses a universal container from `bytes`.
    pub fn parse(bytes: &'a [u8]) -> Result<FatFile<'a>, FatError> {
        let magic = read_u32_be(bytes, 0)?;
        let flavor = match magic {
            FAT_MAGIC => FatFlavor::Fat32,
            FAT_MAGIC_64 => FatFlavor::Fat64,
            FAT_CIGAM | FAT_CIGAM_64 => {
                return Err(FatError::malformed(format!(
                    "byte-swapped magic {magic:#010x} (universal headers are big-endian)"
                )));
            }
            other => {
                return Err(FatError::malformed(format!(
                    "bad magic {other:#010x}, expected {FAT_MAGIC:#010x} or {FAT_MAGIC_64:#010x}"
                )));
            }
        };

        let arch_count = read_u32_be(bytes, 4)?;
        if arch_count > MAX_FAT_ARCHS {
            return Err(FatError::malformed(format!(
                "arch count {arch_count} exceeds maximum {MAX_FAT_ARCHS}"
            )));
        }

        let directory_end = (arch_count as usize)
            .checked_mul(flavor.entry_len())
            .and_then(|len| len.checked_add(FAT_HEADER_LEN))
            .ok_or_else(|| FatError::malformed("arch count overflows directory size"))?;
        if directory_end > bytes.len() {
            return Err(FatError::malformed(format!(
                "directory of {arch_count} entries ends at {directory_end}, but buffer length is {}",
                bytes.len()
            )));
        }

        let mut archs = Vec::with_capacity(arch_count as usize);
        for i in 0..arch_count as usize {
            let pos = FAT_HEADER_LEN + i * flavor.entry_len();
            let arch = read_arch(bytes, pos, flavor)?;
            validate_arch(i, &arch, directory_end, bytes.len())?;
            archs.push(arch);
        }

        Ok(FatFile {
            bytes,
            header: FatHeader { flavor, arch_count },
            archs,
        })
    }

    /// Returns the parsed header.
    pub fn header(&self) -> &FatHeader {
        &self.header
    }

    /// Iterates over the slice directory in file order.
    pub fn archs(&self) -> impl Iterator<Item = &FatArch> + '_ {
        self.archs.iter()
    }

    /// Finds the unique directory entry selected by `selector`.
    ///
    /// Several matches with no subtype in `selector` is [`FatError::Ambiguous`]; the first match
    /// is not picked silently. With a subtype, the first matching entry in directory order wins.
    pub fn find(&self, selector: ArchSelector) -> Result<&FatArch, FatError> {
        let mut matches = self.archs.iter().filter(|arch| arch.matches(&selector));
        let first = matches.next().ok_or(FatError::NotFound(selector))?;
        let others = matches.count();
        if others > 0 && selector.cpu_subtype.is_none() {
            return Err(FatError::Ambiguous {
                selector,
                count: others + 1,
            });
        }
        Ok(first)
    }

    /// Borrows the bytes of `arch` from the container.
    pub fn slice_bytes(&self, arch: &FatArch) -> Result<&'a [u8], FatError> {
        slice(self.bytes, arch.offset, arch.size)
    }

    /// Copies out the slice selected by `selector`.
    pub fn extract(&self, selector: ArchSelector) -> Result<ArchSlice, FatError> {
        let arch = *self.find(selector)?;
        let bytes = self.slice_bytes(&arch)?.to_vec();
        Ok(ArchSlice { arch, bytes })
    }

    /// Returns a human-readable summary of the directory.
    pub fn debug_summary(&self) -> String {
        use core::fmt::Write as _;

        let mut out = String::new();
        let _ = write!(
            &mut out,
            "{:?} arch_count={}",
            self.header.flavor, self.header.arch_count
        );
        for (idx, arch) in self.archs.iter().enumerate() {
            let name = cpu_type_name(arch.cpu_type).unwrap_or("?");
            let _ = write!(
                &mut out,
                "\n  [{idx:02}] {name} cputype={:#x} subtype={:#x} offset={} size={} align=2^{}",
                arch.cpu_type, arch.cpu_subtype, arch.offset, arch.size, arch.align
            );
        }
        out
    }
}

/// Returns `true` if `bytes` starts with a universal header magic (in either byte order).
pub fn is_fat(bytes: &[u8]) -> bool {
    matches!(
        read_u32_be(bytes, 0),
        Ok(FAT_MAGIC | FAT_CIGAM | FAT_MAGIC_64 | FAT_CIGAM_64)
    )
}

/// Extracts the slice selected by `selector` from the universal container in `bytes`.
///
/// Selection follows [`FatFile::find`]: duplicate slices of the selected CPU type are
/// [`FatError::Ambiguous`] unless the selector names a subtype.
pub fn thin(bytes: &[u8], selector: ArchSelector) -> Result<ArchSlice, FatError> {
    FatFile::parse(bytes)?.extract(selector)
}

fn validate_arch(
    index: usize,
    arch: &FatArch,
    directory_end: usize,
    buffer_len: usize,
) -> Result<(), FatError> {
    if arch.align > MAX_SECTION_ALIGN {
        return Err(FatError::malformed(format!(
            "arch {index} alignment 2^{} exceeds maximum 2^{MAX_SECTION_ALIGN}",
            arch.align
        )));
    }

    let end = arch.offset.checked_add(arch.size).ok_or_else(|| {
        FatError::malformed(format!(
            "arch {index} offset {} + size {} overflows",
            arch.offset, arch.size
        ))
    })?;

    if arch.offset < directory_end as u64 {
        return Err(FatError::malformed(format!(
            "arch {index} offset {} points into the header/directory (need >= {directory_end})",
            arch.offset
        )));
    }

    if arch.offset % (1u64 << arch.align) != 0 {
        return Err(FatError::malformed(format!(
            "arch {index} offset {} is not aligned to 2^{}",
            arch.offset, arch.align
        )));
    }

    if end > buffer_len as u64 {
        return Err(FatError::truncated(format!(
            "arch {index} data at {}..{end} is outside buffer length {buffer_len}",
            arch.offset
        )));
    }

    Ok(())
}

fn read_arch(bytes: &[u8], pos: usize, flavor: FatFlavor) -> Result<FatArch, FatError> {
    let cpu_type = read_u32_be(bytes, pos)?;
    let cpu_subtype = read_u32_be(bytes, pos + 4)?;
    let (offset, size, align) = match flavor {
        FatFlavor::Fat32 => (
            u64::from(read_u32_be(bytes, pos + 8)?),
            u64::from(read_u32_be(bytes, pos + 12)?),
            read_u32_be(bytes, pos + 16)?,
        ),
        FatFlavor::Fat64 => (
            read_u64_be(bytes, pos + 8)?,
            read_u64_be(bytes, pos + 16)?,
            read_u32_be(bytes, pos + 24)?,
        ),
    };
    Ok(FatArch {
        cpu_type,
        cpu_subtype,
        offset,
        size,
        align,
    })
}

/// Range-checked borrow of `len` bytes at `offset`.
fn slice(bytes: &[u8], offset: u64, len: u64) -> Result<&[u8], FatError> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| FatError::malformed(format!("range {offset}+{len} overflows")))?;
    let (start, end) = match (usize::try_from(offset), usize::try_from(end)) {
        (Ok(start), Ok(end)) => (start, end),
        _ => {
            return Err(FatError::truncated(format!(
                "range {offset}..{end} does not fit in memory"
            )))
        }
    };
    bytes.get(start..end).ok_or_else(|| {
        FatError::truncated(format!(
            "need bytes {start}..{end}, but buffer length is {}",
            bytes.len()
        ))
    })
}

fn read_u32_be(bytes: &[u8], offset: usize) -> Result<u32, FatError> {
    let raw = slice(bytes, offset as u64, 4)?;
    Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn read_u64_be(bytes: &[u8], offset: usize) -> Result<u64, FatError> {
    let raw = slice(bytes, offset as u64, 8)?;
    let mut out = [0u8; 8];
    out.copy_from_slice(raw);
    Ok(u64::from_be_bytes(out))
}
