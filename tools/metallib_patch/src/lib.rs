//! Downgrading Metal shader libraries so they load on an older OS.
//!
//! Each container is thinned to its `AIR64` slice if needed, unpacked, and every module is sent
//! through an external decompiler, the [`metallib_ir`] rule engine and an external compiler on a
//! pool of worker threads. Modules that fail any stage are dropped; the survivors are packed
//! back in their original order.
//!
//! The `metallib_patch` binary wraps this crate; [`batch::patch_tree`] is what its `patch`
//! subcommand runs.

pub mod batch;
pub mod error;
pub mod files;
pub mod pipeline;
pub mod report;
pub mod skip;
pub mod tool;

pub use crate::batch::{patch_file, patch_tree, FileResult, FileStatus, TreeOpts, TreeReport};
pub use crate::error::{ErrorKind, PipelineError};
pub use crate::pipeline::{
    declared_air_version, default_workers, PatchConfig, Pipeline, DEFAULT_TOOL_RETRIES,
};
pub use crate::report::{ContainerReport, ModuleOutcome, ModuleState, Stage};
pub use crate::skip::SkipList;
pub use crate::tool::{invoke_with_retry, CommandTool, ExternalTool, ToolError};

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use metallib_ir::{DowngradeTarget, RuleFile, RuleSet};

/// Builds the rule set and skip list for a run.
///
/// Built-in rules come first unless `builtin` is false; rules from `rules_file` are appended in
/// file order and its `skip` entries extend the known-broken list.
pub fn load_rules(
    target: &DowngradeTarget,
    rules_file: Option<&Path>,
    builtin: bool,
) -> Result<(RuleSet, SkipList)> {
    let mut rules = if builtin {
        RuleSet::builtin(target)
    } else {
        RuleSet::default()
    };
    let mut skip = SkipList::known_broken();

    if let Some(path) = rules_file {
        let json =
            fs::read_to_string(path).with_context(|| format!("read rules {}", path.display()))?;
        let file =
            RuleFile::from_json(&json).with_context(|| format!("parse rules {}", path.display()))?;
        let user = file
            .compile()
            .with_context(|| format!("compile rules {}", path.display()))?;
        rules = rules.with(user);
        skip.extend(file.skip);
    }
    Ok((rules, skip))
}
