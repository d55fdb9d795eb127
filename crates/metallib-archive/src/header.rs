use crate::error::ArchiveError;
use crate::fourcc::FourCC;
use crate::reader::{read_fourcc, read_u16_le, read_u64_le, read_u8, slice};

/// Container magic.
pub const METALLIB_MAGIC: FourCC = FourCC(*b"MTLB");

/// Size of the fixed header:
/// magic + platform + file version (2x u16) + library type + target OS + OS version (2x u16)
/// + file size + four (offset, size) section pairs.
pub const HEADER_LEN: usize = 4 + 2 + 2 + 2 + 1 + 1 + 2 + 2 + 8 + 4 * 16;

/// Every section written by [`crate::pack`] starts on this boundary.
pub const SECTION_ALIGNMENT: u64 = 8;

/// Every module payload written by [`crate::pack`] starts on this boundary.
///
/// AIR bitcode wrappers are always a whole number of 32-bit words, so modules produced by the
/// vendor toolchain pack back-to-back without padding.
pub const MODULE_ALIGNMENT: u64 = 4;

/// Container-level metadata carried through unpack/pack unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibraryInfo {
    /// Target platform word; bit 15 marks a 64-bit target.
    pub platform: u16,
    /// Container format version, major.
    pub version_major: u16,
    /// Container format version, minor.
    pub version_minor: u16,
    /// Library type (0 executable, 1 core image, 2 dynamic, 3 symbol companion).
    pub library_type: u8,
    /// Target operating system (0x81 macOS, 0x82 iOS, ...).
    pub target_os: u8,
    /// Minimum OS version, major.
    pub os_version_major: u16,
    /// Minimum OS version, minor.
    pub os_version_minor: u16,
}

impl Default for LibraryInfo {
    fn default() -> Self {
        Self {
            platform: 0x8001,
            version_major: 1,
            version_minor: 2,
            library_type: 0,
            target_os: 0x81,
            os_version_major: 14,
            os_version_minor: 0,
        }
    }
}

/// A byte range inside the container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Section {
    /// Offset from the start of the container.
    pub offset: u64,
    /// Length in bytes.
    pub size: u64,
}

impl Section {
    /// One past the last byte, or `None` on overflow.
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.size)
    }
}

/// The parsed fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetallibHeader {
    /// Container-level metadata.
    pub info: LibraryInfo,
    /// Declared total size of the container.
    pub file_size: u64,
    /// Function list (module table).
    pub function_list: Section,
    /// Per-module public metadata blocks.
    pub public_metadata: Section,
    /// Per-module private metadata blocks.
    pub private_metadata: Section,
    /// Module payloads.
    pub module_data: Section,
}

impl MetallibHeader {
    pub(crate) fn parse(bytes: &[u8]) -> Result<Self, ArchiveError> {
        if bytes.len() < HEADER_LEN {
            return Err(ArchiveError::truncated(format!(
                "need at least {HEADER_LEN} header bytes, got {}",
                bytes.len()
            )));
        }

        let magic = read_fourcc(bytes, 0)?;
        if magic != METALLIB_MAGIC {
            return Err(ArchiveError::malformed(format!(
                "bad magic {magic:?}, expected {METALLIB_MAGIC:?}"
            )));
        }

        let info = LibraryInfo {
            platform: read_u16_le(bytes, 0x04)?,
            version_major: read_u16_le(bytes, 0x06)?,
            version_minor: read_u16_le(bytes, 0x08)?,
            library_type: read_u8(bytes, 0x0A)?,
            target_os: read_u8(bytes, 0x0B)?,
            os_version_major: read_u16_le(bytes, 0x0C)?,
            os_version_minor: read_u16_le(bytes, 0x0E)?,
        };

        let section = |at: usize| -> Result<Section, ArchiveError> {
            Ok(Section {
                offset: read_u64_le(bytes, at)?,
                size: read_u64_le(bytes, at + 8)?,
            })
        };

        Ok(Self {
            info,
            file_size: read_u64_le(bytes, 0x10)?,
            function_list: section(0x18)?,
            public_metadata: section(0x28)?,
            private_metadata: section(0x38)?,
            module_data: section(0x48)?,
        })
    }

    /// Checks the declared sizes against the `available` byte count.
    pub(crate) fn validate(&self, available: usize) -> Result<(), ArchiveError> {
        if self.file_size < HEADER_LEN as u64 {
            return Err(ArchiveError::malformed(format!(
                "file size {} is smaller than the header ({HEADER_LEN})",
                self.file_size
            )));
        }
        if self.file_size > available as u64 {
            return Err(ArchiveError::truncated(format!(
                "file size {} exceeds buffer length {available}",
                self.file_size
            )));
        }

        for (label, section) in self.sections() {
            let end = section.end().ok_or_else(|| {
                ArchiveError::malformed(format!(
                    "{label} section {}+{} overflows",
                    section.offset, section.size
                ))
            })?;
            if section.size > 0 && section.offset < HEADER_LEN as u64 {
                return Err(ArchiveError::malformed(format!(
                    "{label} section offset {} points into the header",
                    section.offset
                )));
            }
            if end > self.file_size {
                return Err(ArchiveError::truncated(format!(
                    "{label} section {}..{end} is outside file size {}",
                    section.offset, self.file_size
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn sections(&self) -> [(&'static str, Section); 4] {
        [
            ("function list", self.function_list),
            ("public metadata", self.public_metadata),
            ("private metadata", self.private_metadata),
            ("module data", self.module_data),
        ]
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        let info = &self.info;
        out.extend_from_slice(&METALLIB_MAGIC.0);
        out.extend_from_slice(&info.platform.to_le_bytes());
        out.extend_from_slice(&info.version_major.to_le_bytes());
        out.extend_from_slice(&info.version_minor.to_le_bytes());
        out.push(info.library_type);
        out.push(info.target_os);
        out.extend_from_slice(&info.os_version_major.to_le_bytes());
        out.extend_from_slice(&info.os_version_minor.to_le_bytes());
        out.extend_from_slice(&self.file_size.to_le_bytes());
        for (_, section) in self.sections() {
            out.extend_from_slice(&section.offset.to_le_bytes());
            out.extend_from_slice(&section.size.to_le_bytes());
        }
    }
}

/// Borrows the bytes of `section`, which must already be validated against `bytes`.
pub(crate) fn section_bytes<'a>(
    bytes: &'a [u8],
    label: &str,
    section: Section,
) -> Result<&'a [u8], ArchiveError> {
    slice(bytes, section.offset, section.size).map_err(|e| e.within(format!("{label} section")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_88_bytes_and_roundtrips() {
        assert_eq!(HEADER_LEN, 88);

        let header = MetallibHeader {
            info: LibraryInfo::default(),
            file_size: 200,
            function_list: Section {
                offset: 88,
                size: 40,
            },
            public_metadata: Section {
                offset: 128,
                size: 8,
            },
            private_metadata: Section {
                offset: 136,
                size: 8,
            },
            module_data: Section {
                offset: 144,
                size: 56,
            },
        };
        let mut out = Vec::new();
        header.write(&mut out);
        assert_eq!(out.len(), HEADER_LEN);
        assert_eq!(MetallibHeader::parse(&out).unwrap(), header);
        // Section table positions.
        assert_eq!(&out[0x18..0x20], &88u64.to_le_bytes());
        assert_eq!(&out[0x48..0x50], &144u64.to_le_bytes());
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut out = vec![0u8; HEADER_LEN];
        out[..4].copy_from_slice(&[0xCA, 0xFE, 0xBA, 0xBE]);
        assert!(matches!(
            MetallibHeader::parse(&out),
            Err(ArchiveError::Malformed(_))
        ));
    }
}
