use sha2::{Digest, Sha256};

use crate::error::ArchiveError;
use crate::fourcc::FourCC;
use crate::header::{MetallibHeader, Section, HEADER_LEN, MODULE_ALIGNMENT, SECTION_ALIGNMENT};
use crate::module::{Metallib, Module};

/// Lays `lib` out as container bytes.
///
/// Layout: header, function list (entries, then [`Metallib::extension`]), then the public
/// metadata, private metadata and module data sections, each starting on a [`SECTION_ALIGNMENT`]
/// boundary. Payloads are placed in table
/// order on [`MODULE_ALIGNMENT`] boundaries. All padding is zero.
pub fn pack(lib: &Metallib) -> Result<Vec<u8>, ArchiveError> {
    let modules = lib.modules();
    let entry_count = u32::try_from(modules.len())
        .map_err(|_| ArchiveError::malformed("module count does not fit in u32"))?;

    let mut function_list = Vec::new();
    function_list.extend_from_slice(&entry_count.to_le_bytes());
    let mut public = Vec::new();
    let mut private = Vec::new();
    let mut data = Vec::new();

    for module in modules {
        pad_to(&mut data, MODULE_ALIGNMENT);
        let module_rel = data.len() as u64;
        data.extend_from_slice(&module.bytes);

        let public_rel = public.len() as u64;
        write_block(&mut public, &module.public_metadata)
            .map_err(|e| e.within(format!("{:?} public metadata", module.name)))?;
        let private_rel = private.len() as u64;
        write_block(&mut private, &module.private_metadata)
            .map_err(|e| e.within(format!("{:?} private metadata", module.name)))?;

        write_entry(
            &mut function_list,
            module,
            [public_rel, private_rel, module_rel],
        )
        .map_err(|e| e.within(format!("module {:?}", module.name)))?;
    }
    function_list.extend_from_slice(&lib.extension);

    let mut cursor = HEADER_LEN as u64;
    let mut place = |len: usize| {
        let section = Section {
            offset: cursor,
            size: len as u64,
        };
        cursor = align_up(cursor + len as u64, SECTION_ALIGNMENT);
        section
    };
    let function_list_section = place(function_list.len());
    let public_section = place(public.len());
    let private_section = place(private.len());
    let data_section = place(data.len());

    let header = MetallibHeader {
        info: lib.info,
        file_size: data_section.offset + data_section.size,
        function_list: function_list_section,
        public_metadata: public_section,
        private_metadata: private_section,
        module_data: data_section,
    };

    let mut out = Vec::with_capacity(header.file_size as usize);
    header.write(&mut out);
    for (section, bytes) in [
        (function_list_section, &function_list),
        (public_section, &public),
        (private_section, &private),
        (data_section, &data),
    ] {
        out.resize(section.offset as usize, 0);
        out.extend_from_slice(bytes);
    }
    debug_assert_eq!(out.len() as u64, header.file_size);

    Ok(out)
}

fn write_entry(out: &mut Vec<u8>, module: &Module, offsets: [u64; 3]) -> Result<(), ArchiveError> {
    if module.name.is_empty() || module.name.contains('\0') {
        return Err(ArchiveError::malformed("name is empty or contains NUL"));
    }

    let mut tags = Vec::new();

    let mut name = module.name.as_bytes().to_vec();
    name.push(0);
    write_tag(&mut tags, FourCC::NAME, &name)?;
    write_tag(&mut tags, FourCC::TYPE, &[module.kind.to_u8()])?;

    let hash: [u8; 32] = Sha256::digest(&module.bytes).into();
    write_tag(&mut tags, FourCC::HASH, &hash)?;
    write_tag(
        &mut tags,
        FourCC::MDSZ,
        &(module.bytes.len() as u64).to_le_bytes(),
    )?;

    let mut offt = Vec::with_capacity(24);
    for offset in offsets {
        offt.extend_from_slice(&offset.to_le_bytes());
    }
    write_tag(&mut tags, FourCC::OFFT, &offt)?;

    if let Some(version) = module.air_version {
        let mut vers = Vec::with_capacity(8);
        for field in [
            version.air_major,
            version.air_minor,
            version.language_major,
            version.language_minor,
        ] {
            vers.extend_from_slice(&field.to_le_bytes());
        }
        write_tag(&mut tags, FourCC::VERS, &vers)?;
    }

    for tag in &module.extra_tags {
        if tag.name.is_managed() {
            return Err(ArchiveError::malformed(format!(
                "extra tag {} collides with a generated tag",
                tag.name
            )));
        }
        write_tag(&mut tags, tag.name, &tag.data)?;
    }
    tags.extend_from_slice(&FourCC::ENDT.0);

    let group_len = u32::try_from(4 + tags.len())
        .map_err(|_| ArchiveError::malformed("entry does not fit in u32"))?;
    out.extend_from_slice(&group_len.to_le_bytes());
    out.extend_from_slice(&tags);
    Ok(())
}

fn write_tag(out: &mut Vec<u8>, name: FourCC, payload: &[u8]) -> Result<(), ArchiveError> {
    let len = u16::try_from(payload.len()).map_err(|_| {
        ArchiveError::malformed(format!(
            "{name} payload of {} bytes exceeds {}",
            payload.len(),
            u16::MAX
        ))
    })?;
    out.extend_from_slice(&name.0);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(())
}

fn write_block(out: &mut Vec<u8>, block: &[u8]) -> Result<(), ArchiveError> {
    let len = u32::try_from(block.len())
        .map_err(|_| ArchiveError::malformed("metadata block does not fit in u32"))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(block);
    Ok(())
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

fn pad_to(buf: &mut Vec<u8>, alignment: u64) {
    let len = align_up(buf.len() as u64, alignment) as usize;
    buf.resize(len, 0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::LibraryInfo;
    use crate::module::{unpack, ModuleKind};
    use crate::MetallibFile;

    #[test]
    fn sections_and_payloads_are_aligned() {
        let lib = Metallib::from_modules(
            LibraryInfo::default(),
            [
                Module::new("a", ModuleKind::Vertex, vec![1, 2, 3]),
                Module::new("bb", ModuleKind::Fragment, vec![4, 5, 6, 7, 8]),
            ],
        )
        .unwrap();
        let bytes = pack(&lib).unwrap();
        let file = MetallibFile::parse(&bytes).unwrap();

        for (_, section) in file.header().sections() {
            assert_eq!(section.offset % SECTION_ALIGNMENT, 0);
        }
        assert_eq!(file.header().function_list.offset, HEADER_LEN as u64);
        assert_eq!(file.header().file_size as usize, bytes.len());
        for entry in file.entries() {
            assert_eq!(entry.offset % MODULE_ALIGNMENT, 0);
        }
        assert_eq!(file.entries()[1].offset - file.entries()[0].offset, 4);
        assert_eq!(unpack(&bytes).unwrap(), lib);
    }

    #[test]
    fn rejects_oversized_extra_tag() {
        let mut module = Module::new("big", ModuleKind::Kernel, vec![0; 4]);
        module.extra_tags.push(crate::Tag {
            name: FourCC(*b"BLOB"),
            data: vec![0; usize::from(u16::MAX) + 1],
        });
        let lib = Metallib::from_modules(LibraryInfo::default(), [module]).unwrap();
        assert!(matches!(pack(&lib), Err(ArchiveError::Malformed(_))));
    }

    #[test]
    fn empty_library_packs_and_unpacks() {
        let lib = Metallib::new(LibraryInfo::default());
        let bytes = pack(&lib).unwrap();
        assert!(unpack(&bytes).unwrap().is_empty());
    }
}
