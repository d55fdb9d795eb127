use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use metallib_archive::{pack, unpack, AirVersion, Metallib, Module};
use metallib_fat::{is_fat, thin, ArchSelector, FatError};
use metallib_ir::{apply, DowngradeTarget, IrModule, RuleSet, Version};
use tempfile::TempDir;

use crate::error::{ErrorKind, PipelineError};
use crate::files::module_file_stem;
use crate::report::{ContainerReport, ModuleOutcome, ModuleState, Stage};
use crate::skip::SkipList;
use crate::tool::{invoke_with_retry, ExternalTool};

/// Default number of extra attempts for a failed tool invocation.
pub const DEFAULT_TOOL_RETRIES: u32 = 1;

/// Worker count used when none is configured.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Knobs for one [`Pipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Extra attempts for a failed decompile or recompile.
    pub tool_retries: u32,
    /// Versions the built-in rules lower modules to.
    pub target: DowngradeTarget,
    /// Where per-container scratch directories are created (system temp dir if `None`).
    pub scratch_root: Option<PathBuf>,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            tool_retries: DEFAULT_TOOL_RETRIES,
            target: DowngradeTarget::default(),
            scratch_root: None,
        }
    }
}

/// Thin → unpack → decompile → patch → recompile → pack, for one container at a time.
pub struct Pipeline {
    config: PatchConfig,
    rules: Arc<RuleSet>,
    decompiler: Arc<dyn ExternalTool>,
    compiler: Arc<dyn ExternalTool>,
    skip: SkipList,
}

struct StageFailure {
    stage: Stage,
    kind: ErrorKind,
    detail: String,
}

impl StageFailure {
    fn new<E>(stage: Stage, err: &E) -> Self
    where
        E: std::error::Error,
        for<'a> ErrorKind: From<&'a E>,
    {
        Self {
            stage,
            kind: ErrorKind::from(err),
            detail: err.to_string(),
        }
    }

    fn io(stage: Stage, what: &str, path: &Path, err: std::io::Error) -> Self {
        Self {
            stage,
            kind: ErrorKind::ExternalTool,
            detail: format!("{what} {}: {err}", path.display()),
        }
    }
}

impl Pipeline {
    /// A pipeline with an empty skip list.
    pub fn new(
        config: PatchConfig,
        rules: Arc<RuleSet>,
        decompiler: Arc<dyn ExternalTool>,
        compiler: Arc<dyn ExternalTool>,
    ) -> Self {
        Self {
            config,
            rules,
            decompiler,
            compiler,
            skip: SkipList::empty(),
        }
    }

    /// Replaces the skip list.
    pub fn with_skip_list(mut self, skip: SkipList) -> Self {
        self.skip = skip;
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &PatchConfig {
        &self.config
    }

    /// Patches one container.
    ///
    /// `label` identifies the container in logs and is matched against the skip list, so it
    /// should be the container's path when there is one.
    pub fn run(&self, bytes: &[u8], label: &str) -> Result<ContainerReport, PipelineError> {
        let (container, thinned) = if is_fat(bytes) {
            let slice = thin(bytes, ArchSelector::air64()).map_err(|err| match err {
                FatError::NotFound(_) => PipelineError::NoAir64Slice,
                other => PipelineError::Thin(other),
            })?;
            tracing::debug!(container = label, len = slice.bytes.len(), "thinned to AIR64 slice");
            (Cow::Owned(slice.bytes), true)
        } else {
            (Cow::Borrowed(bytes), false)
        };

        let lib = unpack(&container).map_err(PipelineError::Unpack)?;
        tracing::info!(container = label, modules = lib.len(), thinned, "unpacked");

        let scratch = self.scratch_dir()?;
        let outcomes = self.process_all(lib.modules(), scratch.path(), label);
        let packed = self.repack(&lib, &outcomes)?;

        Ok(ContainerReport {
            label: label.to_owned(),
            thinned,
            outcomes,
            packed,
        })
    }

    fn scratch_dir(&self) -> Result<TempDir, PipelineError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("metallib-patch-");
        let (dir, root) = match &self.config.scratch_root {
            Some(root) => (builder.tempdir_in(root), root.clone()),
            None => (builder.tempdir(), std::env::temp_dir()),
        };
        dir.map_err(|source| PipelineError::Io {
            context: "create scratch directory in",
            path: root,
            source,
        })
    }

    fn process_all(&self, modules: &[Module], scratch: &Path, label: &str) -> Vec<ModuleOutcome> {
        let next = AtomicUsize::new(0);
        let sink = Mutex::new(Vec::with_capacity(modules.len()));
        let workers = self.config.workers.clamp(1, modules.len().max(1));

        thread::scope(|scope| {
            for worker in 0..workers {
                let (next, sink) = (&next, &sink);
                scope.spawn(move || {
                    let _span = tracing::debug_span!("worker", worker).entered();
                    loop {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        let Some(module) = modules.get(index) else {
                            break;
                        };
                        let outcome = self.process_module(index, module, scratch, label);
                        sink.lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push((index, outcome));
                    }
                });
            }
        });

        let mut results = sink.into_inner().unwrap_or_else(PoisonError::into_inner);
        results.sort_unstable_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, outcome)| outcome).collect()
    }

    fn process_module(
        &self,
        index: usize,
        module: &Module,
        scratch: &Path,
        label: &str,
    ) -> ModuleOutcome {
        let name = module.name.clone();
        if module.bytes.is_empty() {
            return ModuleOutcome::Skipped {
                name,
                reason: "empty payload".into(),
            };
        }
        if self.skip.contains(label, &module.name) {
            tracing::info!(container = label, module = %name, "skipping known-broken module");
            return ModuleOutcome::Skipped {
                name,
                reason: "known broken".into(),
            };
        }

        match self.module_chain(index, module, scratch) {
            Ok((bytes, air_version)) => ModuleOutcome::Success {
                name,
                kind: module.kind,
                bytes,
                air_version,
            },
            Err(failure) => {
                tracing::warn!(
                    container = label,
                    module = %name,
                    state = ?ModuleState::Failed(failure.stage),
                    kind = %failure.kind,
                    "{}",
                    failure.detail
                );
                ModuleOutcome::Failure {
                    name,
                    stage: failure.stage,
                    kind: failure.kind,
                    detail: failure.detail,
                }
            }
        }
    }

    fn module_chain(
        &self,
        index: usize,
        module: &Module,
        scratch: &Path,
    ) -> Result<(Vec<u8>, Option<AirVersion>), StageFailure> {
        let reached = |stage: Stage| {
            tracing::trace!(module = %module.name, state = ?ModuleState::after(stage));
        };
        let retries = self.config.tool_retries;

        let stem = scratch.join(format!("{index:04}-{}", module_file_stem(&module.name)));
        let air = stem.with_extension("air");
        fs::write(&air, &module.bytes)
            .map_err(|e| StageFailure::io(Stage::Extract, "write", &air, e))?;
        reached(Stage::Extract);

        let listing = invoke_with_retry(self.decompiler.as_ref(), &air, retries)
            .map_err(|e| StageFailure::new(Stage::Decompile, &e))?;
        let raw = fs::read_to_string(&listing)
            .map_err(|e| StageFailure::io(Stage::Decompile, "read", &listing, e))?;
        let ir = IrModule::from_disassembly(&raw)
            .map_err(|e| StageFailure::new(Stage::Decompile, &e))?;
        reached(Stage::Decompile);

        let outcome = apply(&ir, &self.rules).map_err(|e| StageFailure::new(Stage::Patch, &e))?;
        let patched = stem.with_extension("patched.ll");
        fs::write(&patched, outcome.module.text())
            .map_err(|e| StageFailure::io(Stage::Patch, "write", &patched, e))?;
        let air_version = declared_air_version(&outcome.module, module.air_version);
        reached(Stage::Patch);

        let object = invoke_with_retry(self.compiler.as_ref(), &patched, retries)
            .map_err(|e| StageFailure::new(Stage::Recompile, &e))?;
        let bytes = fs::read(&object)
            .map_err(|e| StageFailure::io(Stage::Recompile, "read", &object, e))?;
        if bytes.is_empty() {
            return Err(StageFailure {
                stage: Stage::Recompile,
                kind: ErrorKind::Malformed,
                detail: format!("{} produced an empty module", self.compiler.name()),
            });
        }
        reached(Stage::Recompile);

        Ok((bytes, air_version))
    }

    /// Packs successful modules in table order; `None` if there are none.
    fn repack(
        &self,
        lib: &Metallib,
        outcomes: &[ModuleOutcome],
    ) -> Result<Option<Vec<u8>>, PipelineError> {
        let mut patched = Metallib::new(lib.info);
        patched.extension = lib.extension.clone();
        for (module, outcome) in lib.modules().iter().zip(outcomes) {
            let ModuleOutcome::Success {
                bytes, air_version, ..
            } = outcome
            else {
                continue;
            };
            let mut module = module.with_bytes(bytes.clone());
            module.air_version = *air_version;
            patched.push(module).map_err(PipelineError::Pack)?;
        }
        if patched.is_empty() {
            return Ok(None);
        }
        let bytes = pack(&patched).map_err(PipelineError::Pack)?;
        tracing::debug!(modules = patched.len(), len = bytes.len(), "packed");
        Ok(Some(bytes))
    }
}

/// The `VERS` tag for a patched module: each version pair is taken from what the patched text
/// declares, or kept from `original` when the text declares none. Modules without a tag stay
/// without one.
pub fn declared_air_version(ir: &IrModule, original: Option<AirVersion>) -> Option<AirVersion> {
    let original = original?;
    let pair = |version: Option<Version>, fallback: (u16, u16)| {
        version.map_or(fallback, |v| {
            let clamp = |n: u32| u16::try_from(n).unwrap_or(u16::MAX);
            (clamp(v.major), clamp(v.minor))
        })
    };
    let (air_major, air_minor) = pair(
        ir.air_version(),
        (original.air_major, original.air_minor),
    );
    let (language_major, language_minor) = pair(
        ir.language_version(),
        (original.language_major, original.language_minor),
    );
    Some(AirVersion {
        air_major,
        air_minor,
        language_major,
        language_minor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGINAL: AirVersion = AirVersion {
        air_major: 2,
        air_minor: 7,
        language_major: 3,
        language_minor: 2,
    };

    #[test]
    fn vers_follows_the_patched_text() {
        let lowered = IrModule::new(
            "!air.version = !{!0}\n!air.language_version = !{!1}\n\
             !0 = !{i32 2, i32 6, i32 0}\n!1 = !{!\"Metal\", i32 3, i32 1, i32 0}\n",
        );
        let version = declared_air_version(&lowered, Some(ORIGINAL)).unwrap();
        assert_eq!(
            (version.air_major, version.air_minor, version.language_major, version.language_minor),
            (2, 6, 3, 1)
        );

        let undeclared = IrModule::new("define void @f() {\n  ret void\n}\n");
        assert_eq!(declared_air_version(&undeclared, Some(ORIGINAL)), Some(ORIGINAL));
        assert_eq!(declared_air_version(&lowered, None), None);
    }
}
