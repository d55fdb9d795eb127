use core::fmt;

use metallib_archive::{AirVersion, ModuleKind};

use crate::error::ErrorKind;

/// Steps of one module's trip through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Payload written to scratch space.
    Extract,
    /// AIR turned into text.
    Decompile,
    /// Rules applied to the text.
    Patch,
    /// Text turned back into AIR.
    Recompile,
    /// Module placed in the output container.
    Pack,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Extract => "extract",
            Self::Decompile => "decompile",
            Self::Patch => "patch",
            Self::Recompile => "recompile",
            Self::Pack => "pack",
        })
    }
}

/// Where a module currently is. Only moves forward; `Failed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Extracted,
    Decompiled,
    Patched,
    Recompiled,
    Packed,
    Failed(Stage),
}

impl ModuleState {
    /// The stage that moves a module out of this state, if any.
    pub fn next_stage(self) -> Option<Stage> {
        match self {
            Self::Extracted => Some(Stage::Decompile),
            Self::Decompiled => Some(Stage::Patch),
            Self::Patched => Some(Stage::Recompile),
            Self::Recompiled => Some(Stage::Pack),
            Self::Packed | Self::Failed(_) => None,
        }
    }

    /// The state reached after `stage` completes.
    pub fn after(stage: Stage) -> Self {
        match stage {
            Stage::Extract => Self::Extracted,
            Stage::Decompile => Self::Decompiled,
            Stage::Patch => Self::Patched,
            Stage::Recompile => Self::Recompiled,
            Stage::Pack => Self::Packed,
        }
    }
}

/// The final result for one module.
#[derive(Clone, PartialEq, Eq)]
pub enum ModuleOutcome {
    /// Patched and recompiled.
    Success {
        name: String,
        kind: ModuleKind,
        /// Recompiled AIR.
        bytes: Vec<u8>,
        /// `VERS` tag matching the patched text.
        air_version: Option<AirVersion>,
    },
    /// Dropped after a failing stage.
    Failure {
        name: String,
        stage: Stage,
        kind: ErrorKind,
        detail: String,
    },
    /// Deliberately not processed.
    Skipped { name: String, reason: String },
}

impl ModuleOutcome {
    /// Module name.
    pub fn name(&self) -> &str {
        match self {
            Self::Success { name, .. } | Self::Failure { name, .. } | Self::Skipped { name, .. } => {
                name
            }
        }
    }

    /// Returns `true` for [`ModuleOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl fmt::Debug for ModuleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success {
                name,
                kind,
                bytes,
                air_version,
            } => f
                .debug_struct("Success")
                .field("name", name)
                .field("kind", kind)
                .field("len", &bytes.len())
                .field("air_version", air_version)
                .finish(),
            Self::Failure {
                name,
                stage,
                kind,
                detail,
            } => f
                .debug_struct("Failure")
                .field("name", name)
                .field("stage", stage)
                .field("kind", kind)
                .field("detail", detail)
                .finish(),
            Self::Skipped { name, reason } => f
                .debug_struct("Skipped")
                .field("name", name)
                .field("reason", reason)
                .finish(),
        }
    }
}

impl fmt::Display for ModuleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { name, bytes, .. } => write!(f, "ok       {name} ({} bytes)", bytes.len()),
            Self::Failure {
                name,
                stage,
                kind,
                detail,
            } => write!(f, "FAILED   {name} at {stage} [{kind}]: {detail}"),
            Self::Skipped { name, reason } => write!(f, "skipped  {name}: {reason}"),
        }
    }
}

/// Everything that happened to one container.
#[derive(Debug, Clone)]
pub struct ContainerReport {
    /// Label the container was run under (usually its path).
    pub label: String,
    /// Whether the input was a universal container that had to be thinned first.
    pub thinned: bool,
    /// One outcome per module, in table order.
    pub outcomes: Vec<ModuleOutcome>,
    /// The packed container; `None` when no module succeeded.
    pub packed: Option<Vec<u8>>,
}

impl ContainerReport {
    /// Number of patched modules.
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Number of modules that failed a stage.
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ModuleOutcome::Failure { .. }))
            .count()
    }

    /// Number of skipped modules.
    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ModuleOutcome::Skipped { .. }))
            .count()
    }

    /// Modules missing from the output: failed plus skipped.
    pub fn excluded(&self) -> usize {
        self.failed() + self.skipped()
    }

    /// One-line summary.
    pub fn summary(&self) -> String {
        format!(
            "{}: {} patched, {} failed, {} skipped{}",
            self.label,
            self.succeeded(),
            self.failed(),
            self.skipped(),
            if self.packed.is_some() {
                ""
            } else {
                " (nothing packed)"
            }
        )
    }
}
