//! Reader and writer for Metal library containers (`MTLB`, usually `*.metallib`).
//!
//! A Metal library bundles one or more AIR modules (LLVM bitcode wrappers) behind a fixed
//! 88-byte header and a tag-based function list:
//!
//! - [`MetallibFile`] is a zero-copy, bounds-checked view over untrusted bytes.
//! - [`unpack`] copies every module out into an owned [`Metallib`].
//! - [`pack`] lays an owned [`Metallib`] back out as container bytes.
//!
//! `unpack(pack(lib))` reproduces `lib` exactly; only offsets and padding in the byte stream
//! may differ from the container the modules originally came from.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod file;
mod fourcc;
mod header;
mod module;
mod pack;
mod reader;

/// Helpers for building synthetic containers in tests.
///
/// Only available when compiling this crate's own tests, or with the `test-utils` feature.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use crate::error::ArchiveError;
pub use crate::file::{FunctionEntry, MetallibFile, MAX_MODULE_COUNT};
pub use crate::fourcc::FourCC;
pub use crate::header::{
    LibraryInfo, MetallibHeader, Section, HEADER_LEN, METALLIB_MAGIC, MODULE_ALIGNMENT,
    SECTION_ALIGNMENT,
};
pub use crate::module::{unpack, AirVersion, Metallib, Module, ModuleKind, Tag};
pub use crate::pack::pack;
