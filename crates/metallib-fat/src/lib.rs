//! A safe parser for universal ("fat") multi-architecture containers, and a thinner that
//! extracts a single architecture slice from one.
//!
//! Metal libraries shipped by the OS are sometimes wrapped in a universal container with one
//! slice per GPU family plus a generic `AIR64` slice. Host tooling such as `lipo` does not know
//! the GPU CPU types, so extracting the `AIR64` slice has to be done here.
//!
//! The input is treated as **untrusted**: every directory entry is validated against the buffer
//! before any slice is handed out, and nothing in this crate panics on malformed data.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// GPU CPU type constants used in universal Metal library containers.
pub mod cpu;
mod error;
mod fat;

/// Helpers for building synthetic universal containers in tests.
///
/// Only available when compiling this crate's own tests, or with the `test-utils` feature.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use crate::error::FatError;
pub use crate::fat::{
    is_fat, thin, ArchSelector, ArchSlice, FatArch, FatFile, FatFlavor, FatHeader, FAT_CIGAM,
    FAT_CIGAM_64, FAT_MAGIC, FAT_MAGIC_64, MAX_FAT_ARCHS, MAX_SECTION_ALIGN,
};
