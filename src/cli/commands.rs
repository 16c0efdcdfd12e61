//! CLI command definitions for landmark-qc.
//!
//! `run` evaluates a dataset against a calculation manifest and writes the
//! report, `validate` checks a manifest without touching any data, and
//! `list-metrics` prints the registered metrics.

use crate::calculator::{Calculator, RunOptions, ShutdownSignal};
use crate::config::{ExecutionOptions, Manifest};
use crate::dataset::{Dataset, JsonDirDataset};
use crate::registry::MetricRegistry;
use crate::telemetry::{export_metrics, init_metrics};
use anyhow::Context;
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Quality metrics for pose and hand landmark datasets.
#[derive(Parser)]
#[command(name = "landmark-qc")]
#[command(about = "Compute aggregated quality metrics over landmark keypoint datasets")]
#[command(version)]
#[command(
    long_about = "landmark-qc evaluates configured metrics over every sample of a landmark dataset\nand aggregates them per category.\n\nExample usage:\n  landmark-qc run --dataset ./samples --manifest qc.yaml --output report.json --checkpoint run.ckpt.json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Evaluate a dataset and write the aggregated report.
    Run(RunArgs),

    /// Parse a manifest and build the calculator without reading any data.
    Validate(ValidateArgs),

    /// List registered metrics.
    #[command(name = "list-metrics")]
    ListMetrics,
}

/// Arguments for `landmark-qc run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory of JSON sample documents.
    #[arg(short = 'd', long)]
    pub dataset: PathBuf,

    /// Calculation manifest (YAML or JSON).
    #[arg(short = 'm', long)]
    pub manifest: PathBuf,

    /// Report path. `.yaml`/`.yml` writes YAML, anything else JSON.
    #[arg(short = 'o', long)]
    pub output: PathBuf,

    /// Worker count (overrides manifest and LANDMARK_QC_WORKERS).
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Checkpoint file written during the run.
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Continue from the checkpoint if it exists.
    #[arg(long, requires = "checkpoint")]
    pub resume: bool,

    /// Write Prometheus text metrics here when the run ends.
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,

    /// Stop dispatching after this many committed samples.
    #[arg(long)]
    pub stop_after: Option<usize>,
}

/// Arguments for `landmark-qc validate`.
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Calculation manifest (YAML or JSON).
    #[arg(short = 'm', long)]
    pub manifest: PathBuf,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse arguments and execute the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_calculation_command(args).await,
        Commands::Validate(args) => run_validate_command(args),
        Commands::ListMetrics => run_list_metrics_command(),
    }
}

/// Defaults, then the manifest `execution` section, then environment.
fn execution_options(manifest: &Manifest) -> anyhow::Result<ExecutionOptions> {
    ExecutionOptions::default()
        .with_section(&manifest.execution)
        .with_env_overrides(|key| std::env::var(key).ok())
        .context("Invalid execution options")
}

async fn run_calculation_command(args: RunArgs) -> anyhow::Result<()> {
    if let Err(e) = init_metrics() {
        warn!(error = %e, "Failed to initialize Prometheus metrics");
    }

    let manifest = Manifest::from_path(&args.manifest)
        .with_context(|| format!("Failed to load manifest {}", args.manifest.display()))?;

    let mut options = execution_options(&manifest)?;
    if let Some(workers) = args.workers {
        options = options.with_workers(workers);
    }

    let registry = MetricRegistry::builtin();
    let calculator = Calculator::from_manifest(&manifest, &registry, options)?;

    let dataset = JsonDirDataset::open(&args.dataset)
        .with_context(|| format!("Failed to open dataset {}", args.dataset.display()))?;
    info!(
        dataset = %dataset.identity(),
        samples = dataset.len(),
        "Dataset ready"
    );

    let shutdown = ShutdownSignal::new();
    let ctrl_c = shutdown.listen_for_ctrl_c();

    let mut run_options = RunOptions::new()
        .with_shutdown(shutdown)
        .with_resume(args.resume);
    if let Some(path) = &args.checkpoint {
        run_options = run_options.with_checkpoint(path.clone());
    }
    if let Some(commits) = args.stop_after {
        run_options = run_options.with_stop_after(commits);
    }

    let result = calculator.run(Arc::new(dataset), run_options).await;
    ctrl_c.abort();
    let report = result?;

    report
        .write(&args.output)
        .with_context(|| format!("Failed to write report {}", args.output.display()))?;

    if let Some(path) = &args.metrics_out {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, export_metrics())
            .with_context(|| format!("Failed to write metrics {}", path.display()))?;
    }

    print!("{}", report.summary());
    if report.metadata.interrupted {
        println!("Run interrupted; rerun with --resume to continue.");
    }

    Ok(())
}

fn run_validate_command(args: ValidateArgs) -> anyhow::Result<()> {
    let manifest = Manifest::from_path(&args.manifest)
        .with_context(|| format!("Failed to load manifest {}", args.manifest.display()))?;
    let options = execution_options(&manifest)?;
    let registry = MetricRegistry::builtin();
    let calculator = Calculator::from_manifest(&manifest, &registry, options)?;

    let plan = calculator.plan();
    println!(
        "Manifest OK: {} calculation(s), {} unit(s) per sample",
        plan.calculations().len(),
        plan.unit_count()
    );
    for calc in plan.calculations() {
        let categories: Vec<String> = calc
            .categories
            .iter()
            .map(|c| format!("{} ({} leaves)", c.name, c.leaves.len()))
            .collect();
        println!(
            "  [{}] {} -> {} via {}",
            calc.spec_index,
            calc.spec.metric,
            categories.join(", "),
            calc.factory.name()
        );
    }
    println!("Fingerprint: {}", plan.fingerprint());

    Ok(())
}

fn run_list_metrics_command() -> anyhow::Result<()> {
    let registry = MetricRegistry::builtin();
    let width = registry.ids().map(str::len).max().unwrap_or(0);
    for registration in registry.registrations() {
        println!(
            "{:width$}  {}",
            registration.id,
            registration.description,
            width = width
        );
    }
    Ok(())
}
