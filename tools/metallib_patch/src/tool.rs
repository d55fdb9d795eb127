//! External decompiler/compiler invocation.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use metallib_ir::Version;
use thiserror::Error;

/// Placeholder replaced with the input path in [`CommandTool`] arguments.
pub const INPUT_PLACEHOLDER: &str = "{input}";
/// Placeholder replaced with the output path in [`CommandTool`] arguments.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Default per-invocation timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

// Captured stderr is cut to this many bytes in errors.
const STDERR_LIMIT: usize = 4096;

/// A tool that turns one file into another.
///
/// The pipeline only ever calls [`ExternalTool::invoke`]; how the work gets done is up to the
/// implementation.
pub trait ExternalTool: Send + Sync {
    /// Processes `input`, returning the path of the produced file.
    fn invoke(&self, input: &Path) -> Result<PathBuf, ToolError>;

    /// Short name for logs and reports.
    fn name(&self) -> &str;
}

/// Failures of an external tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The process could not be started.
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The process ran past its deadline and was killed.
    #[error("`{program}` timed out after {after:?}")]
    Timeout {
        /// Program that timed out.
        program: String,
        /// The configured timeout.
        after: Duration,
    },

    /// The process exited unsuccessfully.
    #[error("`{program}` exited with {status}: {stderr}")]
    Failed {
        /// Program that failed.
        program: String,
        /// Exit status as reported by the OS.
        status: String,
        /// Captured standard error, possibly cut short.
        stderr: String,
    },

    /// The process succeeded but did not produce its output file.
    #[error("`{program}` produced no output at {}", path.display())]
    MissingOutput {
        /// Program that was run.
        program: String,
        /// Where the output was expected.
        path: PathBuf,
    },

    /// Any other I/O failure around the invocation.
    #[error("{context}: {source}")]
    Io {
        /// What was being done.
        context: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl ToolError {
    fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Runs an OS process per invocation.
///
/// Standard output and error go to files next to the input. The process is polled until it
/// exits or its timeout passes.
#[derive(Debug, Clone)]
pub struct CommandTool {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    output_extension: String,
    capture_stdout: bool,
    timeout: Duration,
}

impl CommandTool {
    /// A tool running `program` with `args`; `{input}` and `{output}` are substituted per call.
    pub fn new(
        name: impl Into<String>,
        program: impl Into<PathBuf>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            output_extension: "out".to_owned(),
            capture_stdout: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Extension of the output file, which sits next to the input.
    pub fn output_extension(mut self, ext: impl Into<String>) -> Self {
        self.output_extension = ext.into();
        self
    }

    /// Writes the tool's standard output to the output file instead of a log.
    pub fn capture_stdout(mut self, capture: bool) -> Self {
        self.capture_stdout = capture;
        self
    }

    /// Kills the process once it has run this long.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The AIR decompiler: `xcrun metal-objdump --disassemble {input}`, or `program` with the
    /// same arguments minus the `xcrun` driver.
    pub fn metal_objdump(program: Option<&Path>) -> Self {
        let (program, mut args) = driver(program, "metal-objdump");
        args.extend(["--disassemble".to_owned(), INPUT_PLACEHOLDER.to_owned()]);
        Self::new("metal-objdump", program, args)
            .output_extension("ll")
            .capture_stdout(true)
    }

    /// The AIR compiler: `xcrun metal -c -mmacos-version-min=<os> {input} -o {output}`.
    pub fn metal(program: Option<&Path>, min_os: Version) -> Self {
        let (program, mut args) = driver(program, "metal");
        args.extend([
            "-c".to_owned(),
            format!("-mmacos-version-min={}.{}", min_os.major, min_os.minor),
            INPUT_PLACEHOLDER.to_owned(),
            "-o".to_owned(),
            OUTPUT_PLACEHOLDER.to_owned(),
        ]);
        Self::new("metal", program, args).output_extension("air")
    }

    fn expand_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(INPUT_PLACEHOLDER, &input)
                    .replace(OUTPUT_PLACEHOLDER, &output)
            })
            .collect()
    }

    fn run(&self, args: &[String], stdout: File, stderr: File) -> Result<ExitStatus, ToolError> {
        let program = self.program.display().to_string();
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: program.clone(),
                source,
            })?;

        let started = Instant::now();
        let mut poll = Duration::from_millis(5);
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(source) => return Err(ToolError::io(format!("wait for `{program}`"), source)),
            }
            if started.elapsed() >= self.timeout {
                // The process may have exited between the poll and the kill.
                let _ = child.kill();
                let _ = child.wait();
                return Err(ToolError::Timeout {
                    program,
                    after: self.timeout,
                });
            }
            thread::sleep(poll);
            poll = (poll * 2).min(Duration::from_millis(100));
        }
    }
}

impl ExternalTool for CommandTool {
    fn invoke(&self, input: &Path) -> Result<PathBuf, ToolError> {
        let output = input.with_extension(&self.output_extension);
        let stdout_path = if self.capture_stdout {
            output.clone()
        } else {
            log_path(input, "stdout")
        };
        let stderr_path = log_path(input, "stderr");

        let create = |path: &Path| {
            File::create(path)
                .map_err(|e| ToolError::io(format!("create {}", path.display()), e))
        };
        let stdout = create(&stdout_path)?;
        let stderr = create(&stderr_path)?;

        let args = self.expand_args(input, &output);
        tracing::debug!(tool = %self.name, program = %self.program.display(), ?args, "running");
        let status = self.run(&args, stdout, stderr)?;

        if !status.success() {
            return Err(ToolError::Failed {
                program: self.program.display().to_string(),
                status: status.to_string(),
                stderr: read_capped(&stderr_path),
            });
        }
        if !output.is_file() {
            return Err(ToolError::MissingOutput {
                program: self.program.display().to_string(),
                path: output,
            });
        }
        Ok(output)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Splits a tool override into program + leading args, defaulting to the `xcrun` driver.
fn driver(program: Option<&Path>, tool: &str) -> (PathBuf, Vec<String>) {
    match program {
        Some(program) => (program.to_path_buf(), Vec::new()),
        None => (find_xcrun(), vec![tool.to_owned()]),
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn find_xcrun() -> PathBuf {
    which::which("xcrun").unwrap_or_else(|_| PathBuf::from("/usr/bin/xcrun"))
}

#[cfg(target_arch = "wasm32")]
fn find_xcrun() -> PathBuf {
    PathBuf::from("/usr/bin/xcrun")
}

fn log_path(input: &Path, stream: &str) -> PathBuf {
    let mut name = input.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{stream}.log"));
    input.with_file_name(name)
}

fn read_capped(path: &Path) -> String {
    let mut buf = Vec::new();
    if let Ok(file) = File::open(path) {
        let _ = file.take(STDERR_LIMIT as u64).read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).trim_end().to_owned()
}

/// Invokes `tool`, retrying up to `retries` extra times on failure.
pub fn invoke_with_retry(
    tool: &dyn ExternalTool,
    input: &Path,
    retries: u32,
) -> Result<PathBuf, ToolError> {
    let mut attempt = 0u32;
    loop {
        match tool.invoke(input) {
            Ok(path) => return Ok(path),
            Err(err) if attempt < retries => {
                attempt += 1;
                tracing::warn!(
                    tool = tool.name(),
                    input = %input.display(),
                    attempt,
                    error = %err,
                    "retrying"
                );
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl ExternalTool for Flaky {
        fn invoke(&self, input: &Path) -> Result<PathBuf, ToolError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(ToolError::Timeout {
                    program: "flaky".into(),
                    after: Duration::ZERO,
                });
            }
            Ok(input.to_path_buf())
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[test]
    fn retries_are_bounded() {
        let tool = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        assert!(invoke_with_retry(&tool, Path::new("x"), 2).is_ok());
        assert_eq!(tool.calls.load(Ordering::SeqCst), 3);

        let tool = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        assert!(matches!(
            invoke_with_retry(&tool, Path::new("x"), 1),
            Err(ToolError::Timeout { .. })
        ));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn default_commands_use_placeholders() {
        let objdump = CommandTool::metal_objdump(Some(Path::new("/opt/metal-objdump")));
        let args = objdump.expand_args(Path::new("/s/a.air"), Path::new("/s/a.ll"));
        assert_eq!(args, ["--disassemble", "/s/a.air"]);
        assert!(objdump.capture_stdout);

        let metal = CommandTool::metal(Some(Path::new("/opt/metal")), Version::new(14, 0, 0));
        let args = metal.expand_args(Path::new("/s/a.ll"), Path::new("/s/a.air"));
        assert_eq!(
            args,
            ["-c", "-mmacos-version-min=14.0", "/s/a.ll", "-o", "/s/a.air"]
        );
    }

    #[test]
    fn log_files_sit_next_to_input() {
        assert_eq!(
            log_path(Path::new("/s/a.air"), "stderr"),
            Path::new("/s/a.air.stderr.log")
        );
    }
}
