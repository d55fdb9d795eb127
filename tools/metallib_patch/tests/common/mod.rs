#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use metallib_archive::{AirVersion, LibraryInfo, Metallib, Module, ModuleKind};
use metallib_ir::{DowngradeTarget, RuleSet};
use metallib_patch::{ExternalTool, PatchConfig, Pipeline, ToolError};

/// Prefix the fake compiler puts in front of the text it "compiles".
pub const COMPILED_PREFIX: &[u8] = b"AIR:";

/// Disassembly of a module built for a newer OS.
pub fn listing(function: &str) -> String {
    format!(
        r#"; ModuleID = '{function}.air'
source_filename = "{function}.metal"
target triple = "air64_v27-apple-macosx15.0.0"

define void @{function}() local_unnamed_addr #0 {{
  ret void
}}

attributes #0 = {{ convergent nounwind }}

!air.version = !{{!0}}
!air.language_version = !{{!1}}

!0 = !{{i32 2, i32 7, i32 0}}
!1 = !{{!"Metal", i32 3, i32 2, i32 0}}
"#
    )
}

/// Like [`listing`] but without `!air.version`, which the built-in rules require.
pub fn listing_without_air_version(function: &str) -> String {
    listing(function)
        .lines()
        .filter(|line| !line.starts_with("!air.version") && !line.starts_with("!0 ="))
        .map(|line| format!("{line}\n"))
        .collect()
}

/// A container whose payloads are the given listings, so the fake decompiler can pass them on.
pub fn text_library(modules: &[(&str, ModuleKind, String)]) -> Metallib {
    let modules = modules.iter().map(|(name, kind, text)| {
        let mut module = Module::new(*name, *kind, text.clone().into_bytes());
        module.air_version = Some(AirVersion {
            air_major: 2,
            air_minor: 7,
            language_major: 3,
            language_minor: 2,
        });
        module
    });
    Metallib::from_modules(LibraryInfo::default(), modules).unwrap()
}

/// "Decompiles" by copying the payload behind an objdump-style banner.
#[derive(Default)]
pub struct CopyDecompiler {
    pub calls: AtomicU32,
}

impl ExternalTool for CopyDecompiler {
    fn invoke(&self, input: &Path) -> Result<PathBuf, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let io = |source| ToolError::Io {
            context: format!("fake decompile {}", input.display()),
            source,
        };
        let payload = fs::read(input).map_err(io)?;
        let output = input.with_extension("ll");
        let mut text = format!("{}:\tfile format AIR64\n\n", input.display()).into_bytes();
        text.extend_from_slice(&payload);
        fs::write(&output, text).map_err(io)?;
        Ok(output)
    }

    fn name(&self) -> &str {
        "copy-decompiler"
    }
}

/// "Compiles" by prefixing the patched text with [`COMPILED_PREFIX`].
#[derive(Default)]
pub struct PrefixCompiler {
    pub calls: AtomicU32,
}

impl ExternalTool for PrefixCompiler {
    fn invoke(&self, input: &Path) -> Result<PathBuf, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let io = |source| ToolError::Io {
            context: format!("fake compile {}", input.display()),
            source,
        };
        let text = fs::read(input).map_err(io)?;
        let output = input.with_extension("air");
        let mut bytes = COMPILED_PREFIX.to_vec();
        bytes.extend_from_slice(&text);
        fs::write(&output, bytes).map_err(io)?;
        Ok(output)
    }

    fn name(&self) -> &str {
        "prefix-compiler"
    }
}

/// A compiler that always fails.
pub struct BrokenCompiler;

impl ExternalTool for BrokenCompiler {
    fn invoke(&self, _input: &Path) -> Result<PathBuf, ToolError> {
        Err(ToolError::Failed {
            program: "broken".into(),
            status: "exit status: 1".into(),
            stderr: "error: unsupported".into(),
        })
    }

    fn name(&self) -> &str {
        "broken"
    }
}

/// A pipeline with the built-in rules and the fake tools.
pub fn fake_pipeline(workers: usize) -> Pipeline {
    fake_pipeline_with(workers, Arc::new(PrefixCompiler::default()))
}

pub fn fake_pipeline_with(workers: usize, compiler: Arc<dyn ExternalTool>) -> Pipeline {
    let config = PatchConfig {
        workers,
        tool_retries: 0,
        ..PatchConfig::default()
    };
    let rules = RuleSet::builtin(&DowngradeTarget::default());
    Pipeline::new(
        config,
        Arc::new(rules),
        Arc::new(CopyDecompiler::default()),
        compiler,
    )
}

/// The patched text inside a module produced by [`PrefixCompiler`].
pub fn compiled_text(bytes: &[u8]) -> &str {
    let text = bytes
        .strip_prefix(COMPILED_PREFIX)
        .expect("module was not produced by the fake compiler");
    std::str::from_utf8(text).unwrap()
}
