//! Patching whole files and directory trees.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::error::PipelineError;
use crate::files::{container_label, find_containers, output_path, write_atomic};
use crate::pipeline::Pipeline;
use crate::report::ContainerReport;

/// Options for [`patch_tree`].
#[derive(Debug, Clone, Default)]
pub struct TreeOpts {
    /// Mirror patched containers here instead of replacing them in place.
    pub output_dir: Option<PathBuf>,
    /// Delete containers for which nothing could be packed.
    pub remove_unpatched: bool,
}

/// What happened to one container file.
#[derive(Debug)]
pub enum FileStatus {
    /// At least one module was patched and the result written.
    Patched(ContainerReport),
    /// No module survived; the input was left alone or removed.
    NothingPacked {
        report: ContainerReport,
        removed: bool,
    },
    /// Universal container without an AIR64 slice.
    NoAir64Slice,
    /// The container itself could not be processed.
    Fatal(String),
}

/// Result for one container file.
#[derive(Debug)]
pub struct FileResult {
    pub path: PathBuf,
    /// Human label, e.g. `VFX.framework's default.metallib`.
    pub label: String,
    pub status: FileStatus,
}

/// Results for every container under a root.
#[derive(Debug, Default)]
pub struct TreeReport {
    pub files: Vec<FileResult>,
}

impl TreeReport {
    /// Modules patched across all files.
    pub fn modules_patched(&self) -> usize {
        self.files
            .iter()
            .map(|file| match &file.status {
                FileStatus::Patched(report) => report.succeeded(),
                _ => 0,
            })
            .sum()
    }

    /// Files that hit a fatal error.
    pub fn fatal(&self) -> usize {
        self.files
            .iter()
            .filter(|file| matches!(file.status, FileStatus::Fatal(_)))
            .count()
    }

    /// Whether the run counts as a failure for the exit code.
    pub fn is_failure(&self) -> bool {
        self.fatal() > 0 || self.modules_patched() == 0
    }
}

/// Patches every container under `root` (or `root` itself if it is a file).
///
/// Per-container problems, including failing to read or write that container, end up in the
/// report as [`FileStatus::Fatal`] and the walk moves on. Only failing to walk `root` is returned.
pub fn patch_tree(root: &Path, pipeline: &Pipeline, opts: &TreeOpts) -> Result<TreeReport> {
    let containers = find_containers(root)?;
    tracing::info!(root = %root.display(), containers = containers.len(), "patching");

    let mut report = TreeReport::default();
    for path in containers {
        let status = patch_file(&path, root, pipeline, opts).unwrap_or_else(|err| {
            tracing::error!(container = %path.display(), "{err:#}");
            FileStatus::Fatal(format!("{err:#}"))
        });
        report.files.push(FileResult {
            label: container_label(&path),
            path,
            status,
        });
    }
    Ok(report)
}

/// Patches one container file.
pub fn patch_file(
    path: &Path,
    root: &Path,
    pipeline: &Pipeline,
    opts: &TreeOpts,
) -> Result<FileStatus> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let label = path.display().to_string();

    let report = match pipeline.run(&bytes, &label) {
        Ok(report) => report,
        Err(PipelineError::NoAir64Slice) => {
            tracing::info!(container = %label, "no AIR64 slice; skipping");
            return Ok(FileStatus::NoAir64Slice);
        }
        Err(err) => {
            tracing::error!(container = %label, kind = %err.kind(), "{err}");
            return Ok(FileStatus::Fatal(err.to_string()));
        }
    };

    match &report.packed {
        Some(packed) => {
            let dest = output_path(path, root, opts.output_dir.as_deref());
            write_atomic(&dest, packed)?;
            tracing::info!(container = %label, dest = %dest.display(), "{}", report.summary());
            Ok(FileStatus::Patched(report))
        }
        None => {
            let removed = opts.remove_unpatched;
            if removed {
                fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
                tracing::warn!(container = %label, "nothing packed; removed");
            } else {
                tracing::warn!(container = %label, "nothing packed; left unchanged");
            }
            Ok(FileStatus::NothingPacked { report, removed })
        }
    }
}
