//! Tooling for downgrading Metal shader libraries.
//!
//! This package only re-exports the workspace crates under shorter names:
//!
//! - [`fat`]: universal container parsing and `AIR64` thinning.
//! - [`archive`]: the `MTLB` container reader and writer.
//! - [`ir`]: text-level AIR patch rules.
//! - [`patch`]: the decompile/patch/recompile pipeline behind the `metallib_patch` binary.

pub use metallib_archive as archive;
pub use metallib_fat as fat;
pub use metallib_ir as ir;
pub use metallib_patch as patch;
