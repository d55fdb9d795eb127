use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use metallib_archive::{unpack, MetallibFile};
use metallib_fat::{is_fat, thin, ArchSelector, FatFile};
use metallib_patch::files::{module_file_stem, write_atomic};
use metallib_patch::{
    default_workers, load_rules, patch_tree, CommandTool, FileStatus, PatchConfig, Pipeline,
    TreeOpts, TreeReport, DEFAULT_TOOL_RETRIES,
};

#[derive(Debug, Parser)]
#[command(name = "metallib_patch")]
#[command(about = "Downgrade Metal shader libraries (*.metallib) to load on an older macOS")]
struct Cli {
    /// Log filter, e.g. `info` or `metallib_patch=debug` (falls back to RUST_LOG, then `info`).
    #[arg(long, global = true, env = "METALLIB_PATCH_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Patch a container, or every *.metallib under a directory.
    Patch(PatchArgs),

    /// Extract one architecture slice from a universal container.
    Thin {
        /// Universal container to read.
        input: PathBuf,

        /// Where to write the slice.
        #[arg(long, short)]
        output: PathBuf,

        /// CPU type of the slice (hex); defaults to AIR64.
        #[arg(long, value_parser = parse_hex)]
        cpu_type: Option<u32>,

        /// CPU subtype of the slice (hex), needed when several slices share a CPU type.
        #[arg(long, value_parser = parse_hex)]
        cpu_subtype: Option<u32>,
    },

    /// Write every module of a container to `<DIR>/<index>-<name>.air`.
    Unpack {
        /// Container to read; universal containers are thinned to AIR64 first.
        input: PathBuf,

        /// Directory to write modules into (created if missing).
        #[arg(long, short)]
        output: PathBuf,
    },

    /// Print the structure of a container.
    Inspect {
        /// Container to read.
        input: PathBuf,
    },
}

#[derive(Debug, Args)]
struct PatchArgs {
    /// A *.metallib file or a directory to search recursively.
    path: PathBuf,

    /// Write patched containers under this directory instead of replacing them in place.
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Worker threads per container (default: available parallelism).
    #[arg(long, env = "METALLIB_PATCH_WORKERS")]
    workers: Option<usize>,

    /// JSON rule file; its rules run after the built-in ones.
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Only apply rules from `--rules`.
    #[arg(long)]
    no_builtin_rules: bool,

    /// Per-invocation timeout for the decompiler and compiler.
    #[arg(long, env = "METALLIB_PATCH_TIMEOUT_SECS", default_value_t = 120)]
    timeout_secs: u64,

    /// Extra attempts for a failed decompile or recompile.
    #[arg(long, default_value_t = DEFAULT_TOOL_RETRIES)]
    retries: u32,

    /// Delete containers for which no module could be patched.
    #[arg(long)]
    remove_unpatched: bool,

    /// Decompiler to run instead of `xcrun metal-objdump`.
    #[arg(long, value_name = "PROG")]
    objdump: Option<PathBuf>,

    /// Compiler to run instead of `xcrun metal`.
    #[arg(long, value_name = "PROG")]
    metal: Option<PathBuf>,
}

fn parse_hex(raw: &str) -> Result<u32, String> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid hex value `{raw}`: {e}"))
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let result = match cli.command {
        Commands::Patch(args) => run_patch(args),
        Commands::Thin {
            input,
            output,
            cpu_type,
            cpu_subtype,
        } => run_thin(&input, &output, cpu_type, cpu_subtype).map(|()| true),
        Commands::Unpack { input, output } => run_unpack(&input, &output).map(|()| true),
        Commands::Inspect { input } => run_inspect(&input).map(|()| true),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run_patch(args: PatchArgs) -> Result<bool> {
    let config = PatchConfig {
        workers: args.workers.unwrap_or_else(default_workers),
        tool_retries: args.retries,
        ..PatchConfig::default()
    };
    let (rules, skip) = load_rules(&config.target, args.rules.as_deref(), !args.no_builtin_rules)?;
    if rules.is_empty() {
        anyhow::bail!("no rules to apply (--no-builtin-rules without --rules)");
    }

    let timeout = Duration::from_secs(args.timeout_secs);
    let decompiler = CommandTool::metal_objdump(args.objdump.as_deref()).timeout(timeout);
    let compiler = CommandTool::metal(args.metal.as_deref(), config.target.os).timeout(timeout);
    let pipeline = Pipeline::new(config, Arc::new(rules), Arc::new(decompiler), Arc::new(compiler))
        .with_skip_list(skip);

    let opts = TreeOpts {
        output_dir: args.output,
        remove_unpatched: args.remove_unpatched,
    };
    let report = patch_tree(&args.path, &pipeline, &opts)?;
    print_tree_report(&report);
    Ok(!report.is_failure())
}

fn print_tree_report(report: &TreeReport) {
    for file in &report.files {
        match &file.status {
            FileStatus::Patched(container) => {
                println!("patched: {}", file.label);
                for outcome in container.outcomes.iter().filter(|o| !o.is_success()) {
                    println!("  {outcome}");
                }
            }
            FileStatus::NothingPacked {
                report: container,
                removed,
            } => {
                let action = if *removed { "removed" } else { "unchanged" };
                println!("{action}: {} (no module could be patched)", file.label);
                for outcome in &container.outcomes {
                    println!("  {outcome}");
                }
            }
            FileStatus::NoAir64Slice => println!("skipped: {} (no AIR64 slice)", file.label),
            FileStatus::Fatal(err) => eprintln!("error: {}: {err}", file.label),
        }
    }
    println!(
        "summary: {} container(s), {} module(s) patched, {} fatal",
        report.files.len(),
        report.modules_patched(),
        report.fatal()
    );
}

fn run_thin(
    input: &Path,
    output: &Path,
    cpu_type: Option<u32>,
    cpu_subtype: Option<u32>,
) -> Result<()> {
    let mut selector = cpu_type.map_or(ArchSelector::air64(), ArchSelector::cpu_type);
    if let Some(subtype) = cpu_subtype {
        selector = selector.with_subtype(subtype);
    }

    let bytes = fs::read(input).with_context(|| format!("read {}", input.display()))?;
    let slice = thin(&bytes, selector).with_context(|| format!("thin {}", input.display()))?;
    write_atomic(output, &slice.bytes)?;
    println!(
        "wrote {} bytes ({selector}) to {}",
        slice.bytes.len(),
        output.display()
    );
    Ok(())
}

fn run_unpack(input: &Path, output: &Path) -> Result<()> {
    let bytes = fs::read(input).with_context(|| format!("read {}", input.display()))?;
    let container = air64_container(&bytes).with_context(|| format!("thin {}", input.display()))?;
    let lib = unpack(&container).with_context(|| format!("unpack {}", input.display()))?;

    fs::create_dir_all(output).with_context(|| format!("create {}", output.display()))?;
    for (index, module) in lib.modules().iter().enumerate() {
        let path = output.join(format!("{index:04}-{}.air", module_file_stem(&module.name)));
        fs::write(&path, &module.bytes).with_context(|| format!("write {}", path.display()))?;
        println!("{} -> {}", module.name, path.display());
    }
    Ok(())
}

fn run_inspect(input: &Path) -> Result<()> {
    let bytes = fs::read(input).with_context(|| format!("read {}", input.display()))?;
    if is_fat(&bytes) {
        let fat = FatFile::parse(&bytes).with_context(|| format!("parse {}", input.display()))?;
        println!("{}", fat.debug_summary());
    }
    let container = air64_container(&bytes).with_context(|| format!("thin {}", input.display()))?;
    let file =
        MetallibFile::parse(&container).with_context(|| format!("parse {}", input.display()))?;
    println!("{}", file.debug_summary());
    Ok(())
}

fn air64_container(bytes: &[u8]) -> Result<Cow<'_, [u8]>, metallib_fat::FatError> {
    if is_fat(bytes) {
        Ok(Cow::Owned(thin(bytes, ArchSelector::air64())?.bytes))
    } else {
        Ok(Cow::Borrowed(bytes))
    }
}
