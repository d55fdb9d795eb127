//! Rule-based rewriting of decompiled AIR (LLVM-style) text.
//!
//! A [`RuleSet`] is an ordered list of [`PatchRule`]s. [`apply`] runs them in order against an
//! [`IrModule`] snapshot, fails if a required rule matches nothing, and checks that the result
//! is still structurally sane before returning a new snapshot.
//!
//! [`RuleSet::builtin`] lowers a module's AIR version, Metal language version and target triple
//! to a [`DowngradeTarget`]. User rules can be loaded from JSON with [`RuleFile`].

#![forbid(unsafe_code)]

mod builtin;
pub mod check;
mod engine;
mod error;
mod module;
mod rule;
mod rule_file;

pub use crate::builtin::{
    DowngradeTarget, Version, AIR_VERSION_RULE, LANGUAGE_VERSION_RULE, SAMPLER_STATE_RULE,
    TARGET_TRIPLE_RULE,
};
pub use crate::engine::{apply, PatchOutcome, RuleReport};
pub use crate::error::PatchError;
pub use crate::module::{
    IrModule, MetadataNode, NamedMetadata, HEADER_DIRECTIVES, MODULE_ID_PREFIX,
};
pub use crate::rule::{Action, Pattern, PatchRule, RewriteFn, RuleSet, StructuralFn};
pub use crate::rule_file::{ActionKind, RuleFile, RuleEntry, SkipEntry};
