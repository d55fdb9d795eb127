use metallib_archive::test_utils::{
    entry, fake_air, name_tag, offsets_tag, sample_library, size_tag, tag, RawContainer,
};
use metallib_archive::{
    pack, unpack, AirVersion, ArchiveError, FourCC, LibraryInfo, Metallib, MetallibFile, Module,
    ModuleKind, Tag, HEADER_LEN,
};

fn block(body: &[u8]) -> Vec<u8> {
    let mut out = (body.len() as u32).to_le_bytes().to_vec();
    out.extend_from_slice(body);
    out
}

#[test]
fn unpack_pack_unpack_preserves_every_module() {
    let mut lib = sample_library(4);
    let mut tagged = Module::new("main0", ModuleKind::Kernel, fake_air("main0", 9));
    tagged.air_version = Some(AirVersion {
        air_major: 2,
        air_minor: 7,
        language_major: 3,
        language_minor: 2,
    });
    tagged.public_metadata = b"RETR\x00\x00ENDT".to_vec();
    tagged.extra_tags.push(Tag {
        name: FourCC(*b"LAYR"),
        data: vec![1, 0],
    });
    lib.push(tagged).unwrap();

    let packed = pack(&lib).unwrap();
    let first = unpack(&packed).unwrap();
    assert_eq!(first, lib);

    let repacked = pack(&first).unwrap();
    assert_eq!(repacked, packed);
    assert_eq!(unpack(&repacked).unwrap(), lib);
}

#[test]
fn unpack_rejects_entry_count_larger_than_table() {
    let mut data = Vec::new();
    let mut entries = Vec::new();
    for i in 0..3u64 {
        let name = format!("fn_{i}");
        entries.push(entry(&[
            name_tag(&name),
            size_tag(4),
            offsets_tag(0, 0, data.len() as u64),
        ]));
        data.extend_from_slice(&(i as u32).to_le_bytes());
    }
    let bytes = RawContainer {
        entry_count: 5,
        entries,
        public_metadata: block(b"ENDT"),
        private_metadata: block(b"ENDT"),
        module_data: data,
    }
    .build();

    let err = unpack(&bytes).unwrap_err();
    assert!(matches!(err, ArchiveError::Truncated(_)), "{err}");
    assert!(err.context().contains("5 entries"), "{err}");
}

#[test]
fn unpack_rejects_overlapping_payloads() {
    let bytes = RawContainer {
        entry_count: 2,
        entries: vec![
            entry(&[name_tag("a"), size_tag(8), offsets_tag(0, 0, 0)]),
            entry(&[name_tag("b"), size_tag(8), offsets_tag(0, 0, 4)]),
        ],
        public_metadata: block(b"ENDT"),
        private_metadata: block(b"ENDT"),
        module_data: vec![0u8; 12],
    }
    .build();

    assert!(matches!(unpack(&bytes), Err(ArchiveError::Malformed(_))));
}

#[test]
fn unpack_rejects_duplicate_names() {
    let bytes = RawContainer {
        entry_count: 2,
        entries: vec![
            entry(&[name_tag("same"), size_tag(4), offsets_tag(0, 0, 0)]),
            entry(&[name_tag("same"), size_tag(4), offsets_tag(0, 0, 4)]),
        ],
        public_metadata: block(b"ENDT"),
        private_metadata: block(b"ENDT"),
        module_data: vec![0u8; 8],
    }
    .build();

    let err = unpack(&bytes).unwrap_err();
    assert!(matches!(err, ArchiveError::Malformed(_)));
    assert!(err.context().contains("duplicate"));
}

#[test]
fn payload_past_module_data_is_truncated() {
    let bytes = RawContainer {
        entry_count: 1,
        entries: vec![entry(&[name_tag("a"), size_tag(64), offsets_tag(0, 0, 0)])],
        public_metadata: block(b"ENDT"),
        private_metadata: block(b"ENDT"),
        module_data: vec![0u8; 16],
    }
    .build();

    assert!(matches!(unpack(&bytes), Err(ArchiveError::Truncated(_))));
}

#[test]
fn legacy_entries_without_offsets_read_payloads_in_order() {
    let bytes = RawContainer {
        entry_count: 2,
        entries: vec![
            entry(&[name_tag("first"), tag(b"TYPE", &[0]), size_tag(3)]),
            entry(&[name_tag("second"), tag(b"TYPE", &[1]), size_tag(5)]),
        ],
        module_data: b"abcdefgh".to_vec(),
        ..RawContainer::default()
    }
    .build();

    let lib = unpack(&bytes).unwrap();
    let names: Vec<_> = lib.names().collect();
    assert_eq!(names, ["first", "second"]);
    assert_eq!(lib.get("first").unwrap().bytes, b"abc");
    assert_eq!(lib.get("second").unwrap().bytes, b"defgh");
    assert_eq!(lib.get("second").unwrap().kind, ModuleKind::Fragment);
    assert!(lib.get("first").unwrap().public_metadata.is_empty());
}

#[test]
fn truncated_container_is_reported_not_panicked() {
    let packed = pack(&sample_library(3)).unwrap();

    for cut in [0, 10, HEADER_LEN - 1, HEADER_LEN, packed.len() - 1] {
        let err = unpack(&packed[..cut]).unwrap_err();
        assert!(matches!(err, ArchiveError::Truncated(_)), "cut {cut}: {err}");
    }
}

#[test]
fn missing_endt_is_reported() {
    let mut group = entry(&[name_tag("a"), size_tag(0)]);
    // Drop the terminator but keep the declared group size consistent.
    group.truncate(group.len() - 4);
    let len = group.len() as u32;
    group[..4].copy_from_slice(&len.to_le_bytes());

    let bytes = RawContainer {
        entry_count: 1,
        entries: vec![group],
        ..RawContainer::default()
    }
    .build();

    let err = unpack(&bytes).unwrap_err();
    assert!(err.context().contains("ENDT"), "{err}");
}

#[test]
fn pack_rejects_managed_extra_tags() {
    let mut module = Module::new("a", ModuleKind::Vertex, vec![0; 4]);
    module.extra_tags.push(Tag {
        name: FourCC(*b"HASH"),
        data: vec![0; 32],
    });
    let lib = Metallib::from_modules(LibraryInfo::default(), [module]).unwrap();
    assert!(matches!(pack(&lib), Err(ArchiveError::Malformed(_))));
}

#[test]
fn header_extension_after_the_last_entry_survives_repack() {
    let uuid = [0xAB; 16];
    let extension = entry(&[tag(b"VLST", &[0; 8]), tag(b"UUID", &uuid)]);
    let container = RawContainer {
        entry_count: 1,
        entries: vec![entry(&[name_tag("main0"), size_tag(4)]), extension.clone()],
        module_data: vec![1, 2, 3, 4],
        ..RawContainer::default()
    };
    let bytes = container.build();

    let lib = unpack(&bytes).unwrap();
    assert_eq!(lib.extension, extension);
    assert_eq!(lib.modules()[0].bytes, [1, 2, 3, 4]);

    let repacked = pack(&lib).unwrap();
    let file = MetallibFile::parse(&repacked).unwrap();
    assert_eq!(file.extension(), &extension[..]);
    let tags = file.extension_tags().unwrap();
    assert_eq!(
        tags,
        [(FourCC(*b"VLST"), &[0u8; 8][..]), (FourCC(*b"UUID"), &uuid[..])]
    );
    assert!(file.debug_summary().contains("extension: VLST(8) UUID(16)"));
    assert_eq!(unpack(&repacked).unwrap(), lib);
}

#[test]
fn debug_summary_lists_modules() {
    let packed = pack(&sample_library(2)).unwrap();
    let file = MetallibFile::parse(&packed).unwrap();
    let summary = file.debug_summary();
    assert!(summary.contains("modules=2"));
    assert!(summary.contains("fn_0"));
    assert!(summary.contains("fragment"));
}

#[cfg(not(target_arch = "wasm32"))]
mod prop {
    use super::*;
    use proptest::prelude::*;

    fn modules() -> impl Strategy<Value = Vec<Module>> {
        proptest::collection::vec(
            (
                any::<u8>(),
                proptest::collection::vec(any::<u8>(), 0..256),
                proptest::option::of(any::<[u16; 4]>()),
            ),
            0..12,
        )
        .prop_map(|raw| {
            raw.into_iter()
                .enumerate()
                .map(|(i, (kind, bytes, version))| {
                    let mut module = Module::new(format!("m{i}"), ModuleKind::from_u8(kind), bytes);
                    module.air_version = version.map(|[a, b, c, d]| AirVersion {
                        air_major: a,
                        air_minor: b,
                        language_major: c,
                        language_minor: d,
                    });
                    module
                })
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            rng_algorithm: proptest::test_runner::RngAlgorithm::ChaCha,
            rng_seed: proptest::test_runner::RngSeed::Fixed(0x4D_54_4C_42),
            .. ProptestConfig::default()
        })]

        #[test]
        fn pack_then_unpack_is_identity(modules in modules()) {
            let lib = Metallib::from_modules(LibraryInfo::default(), modules).unwrap();
            let packed = pack(&lib).unwrap();
            prop_assert_eq!(unpack(&packed).unwrap(), lib);
        }

        #[test]
        fn unpack_never_panics_on_corruption(
            modules in modules(),
            flips in proptest::collection::vec((any::<proptest::sample::Index>(), any::<u8>()), 1..8),
        ) {
            let lib = Metallib::from_modules(LibraryInfo::default(), modules).unwrap();
            let mut packed = pack(&lib).unwrap();
            for (index, value) in flips {
                let at = index.index(packed.len());
                packed[at] = value;
            }
            let _ = unpack(&packed);
        }
    }
}
