mod common;

use std::fs;
use std::sync::Arc;

use common::*;
use metallib_archive::{pack, unpack, ModuleKind};
use metallib_fat::cpu::CPU_TYPE_APPLE_GPU;
use metallib_fat::test_utils::{build_fat, SliceDesc};
use metallib_fat::FatFlavor;
use metallib_patch::{patch_tree, FileStatus, TreeOpts};
use tempfile::tempdir;

fn container() -> Vec<u8> {
    pack(&text_library(&[(
        "kernel_main",
        ModuleKind::Kernel,
        listing("kernel_main"),
    )]))
    .unwrap()
}

#[test]
fn every_kind_of_file_ends_up_in_the_report() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("A.framework")).unwrap();
    fs::write(root.join("A.framework/default.metallib"), container()).unwrap();
    fs::write(
        root.join("gpu_only.metallib"),
        build_fat(
            FatFlavor::Fat32,
            &[SliceDesc::new(CPU_TYPE_APPLE_GPU, 2, 4, b"gpu")],
        ),
    )
    .unwrap();
    fs::write(root.join("junk.metallib"), b"junk").unwrap();
    fs::write(root.join("readme.txt"), b"not a container").unwrap();

    let report = patch_tree(root, &fake_pipeline(2), &TreeOpts::default()).unwrap();
    assert_eq!(report.files.len(), 3);
    assert!(matches!(report.files[0].status, FileStatus::Patched(_)));
    assert_eq!(report.files[0].label, "A.framework's default.metallib");
    assert!(matches!(report.files[1].status, FileStatus::NoAir64Slice));
    assert!(matches!(report.files[2].status, FileStatus::Fatal(_)));
    assert_eq!(report.modules_patched(), 1);
    assert_eq!(report.fatal(), 1);
    assert!(report.is_failure());

    // Patched in place.
    let lib = unpack(&fs::read(root.join("A.framework/default.metallib")).unwrap()).unwrap();
    assert!(compiled_text(&lib.modules()[0].bytes).contains("air64_v26-apple-macosx14.0.0"));
}

#[test]
fn unpatchable_containers_are_kept_unless_removal_is_requested() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("lib.metallib");
    fs::write(&path, container()).unwrap();
    let pipeline = fake_pipeline_with(1, Arc::new(BrokenCompiler));

    let report = patch_tree(&path, &pipeline, &TreeOpts::default()).unwrap();
    assert!(matches!(
        report.files[0].status,
        FileStatus::NothingPacked { removed: false, .. }
    ));
    assert_eq!(fs::read(&path).unwrap(), container());

    let opts = TreeOpts {
        remove_unpatched: true,
        ..TreeOpts::default()
    };
    let report = patch_tree(&path, &pipeline, &opts).unwrap();
    assert!(matches!(
        report.files[0].status,
        FileStatus::NothingPacked { removed: true, .. }
    ));
    assert!(!path.exists());
}

#[test]
fn a_write_failure_is_recorded_and_the_walk_continues() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("in");
    for name in ["A.framework", "B.framework"] {
        fs::create_dir_all(root.join(name)).unwrap();
        fs::write(root.join(name).join("default.metallib"), container()).unwrap();
    }
    // A regular file where the output directory should be.
    let blocker = dir.path().join("out");
    fs::write(&blocker, b"").unwrap();

    let opts = TreeOpts {
        output_dir: Some(blocker),
        ..TreeOpts::default()
    };
    let report = patch_tree(&root, &fake_pipeline(1), &opts).unwrap();
    assert_eq!(report.files.len(), 2);
    assert_eq!(report.fatal(), 2);
    for file in &report.files {
        let FileStatus::Fatal(detail) = &file.status else {
            panic!("expected a fatal status, got {:?}", file.status);
        };
        assert!(detail.contains(".framework"), "{detail}");
    }
    assert!(report.is_failure());
}
