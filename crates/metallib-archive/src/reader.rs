//! Range-checked accessors over untrusted byte buffers.
//!
//! Every read validates `offset + len` against the buffer before touching it. Failures are
//! reported as [`ArchiveError::Truncated`]; callers add context with [`ArchiveError::within`].

use crate::error::ArchiveError;
use crate::fourcc::FourCC;

pub(crate) fn slice(bytes: &[u8], offset: u64, len: u64) -> Result<&[u8], ArchiveError> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| ArchiveError::malformed(format!("range {offset}+{len} overflows")))?;
    let (start, end_usize) = match (usize::try_from(offset), usize::try_from(end)) {
        (Ok(start), Ok(end)) => (start, end),
        _ => {
            return Err(ArchiveError::truncated(format!(
                "range {offset}..{end} does not fit in memory"
            )))
        }
    };
    bytes.get(start..end_usize).ok_or_else(|| {
        ArchiveError::truncated(format!(
            "need bytes {offset}..{end}, but only {} are available",
            bytes.len()
        ))
    })
}

fn array<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N], ArchiveError> {
    let raw = slice(bytes, offset as u64, N as u64)?;
    let mut out = [0u8; N];
    out.copy_from_slice(raw);
    Ok(out)
}

pub(crate) fn read_u8(bytes: &[u8], offset: usize) -> Result<u8, ArchiveError> {
    Ok(array::<1>(bytes, offset)?[0])
}

pub(crate) fn read_u16_le(bytes: &[u8], offset: usize) -> Result<u16, ArchiveError> {
    Ok(u16::from_le_bytes(array(bytes, offset)?))
}

pub(crate) fn read_u32_le(bytes: &[u8], offset: usize) -> Result<u32, ArchiveError> {
    Ok(u32::from_le_bytes(array(bytes, offset)?))
}

pub(crate) fn read_u64_le(bytes: &[u8], offset: usize) -> Result<u64, ArchiveError> {
    Ok(u64::from_le_bytes(array(bytes, offset)?))
}

pub(crate) fn read_fourcc(bytes: &[u8], offset: usize) -> Result<FourCC, ArchiveError> {
    Ok(FourCC(array(bytes, offset)?))
}
