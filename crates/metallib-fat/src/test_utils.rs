use crate::fat::FatFlavor;

/// Describes one slice to place in a synthetic universal container.
#[derive(Debug, Clone, Copy)]
pub struct SliceDesc<'a> {
    /// CPU type written to the directory.
    pub cpu_type: u32,
    /// CPU subtype written to the directory.
    pub cpu_subtype: u32,
    /// Alignment exponent; the slice offset is rounded up to `2^align`.
    pub align: u32,
    /// Slice contents.
    pub data: &'a [u8],
}

impl<'a> SliceDesc<'a> {
    /// Convenience constructor.
    pub fn new(cpu_type: u32, cpu_subtype: u32, align: u32, data: &'a [u8]) -> Self {
        Self {
            cpu_type,
            cpu_subtype,
            align,
            data,
        }
    }
}

/// Builds a universal container holding `slices` in directory order.
///
/// Slice data is laid out in the same order as the directory, each slice starting on its own
/// alignment boundary. Padding bytes are zero.
pub fn build_fat(flavor: FatFlavor, slices: &[SliceDesc<'_>]) -> Vec<u8> {
    let entry_len = match flavor {
        FatFlavor::Fat32 => 20,
        FatFlavor::Fat64 => 32,
    };
    let directory_end = 8 + entry_len * slices.len();

    let mut offsets = Vec::with_capacity(slices.len());
    let mut cursor = directory_end;
    for desc in slices {
        let align = 1usize << desc.align;
        cursor = cursor.div_ceil(align) * align;
        offsets.push(cursor);
        cursor += desc.data.len();
    }

    let mut out = Vec::with_capacity(cursor);
    out.extend_from_slice(&flavor.magic().to_be_bytes());
    let count = u32::try_from(slices.len()).expect("slice count does not fit in u32");
    out.extend_from_slice(&count.to_be_bytes());

    for (desc, offset) in slices.iter().zip(&offsets) {
        out.extend_from_slice(&desc.cpu_type.to_be_bytes());
        out.extend_from_slice(&desc.cpu_subtype.to_be_bytes());
        match flavor {
            FatFlavor::Fat32 => {
                let offset = u32::try_from(*offset).expect("slice offset does not fit in u32");
                let size = u32::try_from(desc.data.len()).expect("slice size does not fit in u32");
                out.extend_from_slice(&offset.to_be_bytes());
                out.extend_from_slice(&size.to_be_bytes());
                out.extend_from_slice(&desc.align.to_be_bytes());
            }
            FatFlavor::Fat64 => {
                out.extend_from_slice(&(*offset as u64).to_be_bytes());
                out.extend_from_slice(&(desc.data.len() as u64).to_be_bytes());
                out.extend_from_slice(&desc.align.to_be_bytes());
                out.extend_from_slice(&0u32.to_be_bytes()); // reserved
            }
        }
    }

    for (desc, offset) in slices.iter().zip(&offsets) {
        out.resize(*offset, 0);
        out.extend_from_slice(desc.data);
    }

    out
}
