use core::fmt;
use std::io;
use std::path::PathBuf;

use metallib_archive::ArchiveError;
use metallib_fat::FatError;
use metallib_ir::PatchError;
use thiserror::Error;

use crate::tool::ToolError;

/// Error classes shared by every stage, used in reports and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Structurally invalid input.
    Malformed,
    /// Input ends before a declared range.
    Truncated,
    /// A requested architecture, module or file does not exist.
    NotFound,
    /// A required patch rule matched nothing.
    RuleUnsatisfied,
    /// The decompiler or compiler failed, timed out or could not be started.
    ExternalTool,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Malformed => "malformed",
            Self::Truncated => "truncated",
            Self::NotFound => "not-found",
            Self::RuleUnsatisfied => "rule-unsatisfied",
            Self::ExternalTool => "external-tool",
        })
    }
}

impl From<&FatError> for ErrorKind {
    fn from(err: &FatError) -> Self {
        match err {
            FatError::Malformed(_) => Self::Malformed,
            FatError::Truncated(_) => Self::Truncated,
            FatError::NotFound(_) | FatError::Ambiguous { .. } => Self::NotFound,
        }
    }
}

impl From<&ArchiveError> for ErrorKind {
    fn from(err: &ArchiveError) -> Self {
        match err {
            ArchiveError::Malformed(_) => Self::Malformed,
            ArchiveError::Truncated(_) => Self::Truncated,
        }
    }
}

impl From<&PatchError> for ErrorKind {
    fn from(err: &PatchError) -> Self {
        match err {
            PatchError::RuleUnsatisfied { .. } => Self::RuleUnsatisfied,
            PatchError::Malformed(_) | PatchError::InvalidRule { .. } | PatchError::RuleFile(_) => {
                Self::Malformed
            }
        }
    }
}

impl From<&ToolError> for ErrorKind {
    fn from(_: &ToolError) -> Self {
        Self::ExternalTool
    }
}

/// Container-level failures. Any of these aborts the whole container.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The input is a universal container without an `AIR64` slice.
    #[error("universal container has no AIR64 slice")]
    NoAir64Slice,

    /// The universal container could not be thinned.
    #[error("thin: {0}")]
    Thin(#[source] FatError),

    /// The shader container could not be unpacked.
    #[error("unpack: {0}")]
    Unpack(#[source] ArchiveError),

    /// The patched modules could not be packed.
    #[error("pack: {0}")]
    Pack(#[source] ArchiveError),

    /// Scratch space could not be set up.
    #[error("{context} {}: {source}", path.display())]
    Io {
        /// What was being done.
        context: &'static str,
        /// The path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    /// The shared error class.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoAir64Slice => ErrorKind::NotFound,
            Self::Thin(err) => err.into(),
            Self::Unpack(err) | Self::Pack(err) => err.into(),
            Self::Io { .. } => ErrorKind::ExternalTool,
        }
    }
}
