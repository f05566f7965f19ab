use anchor_model::{AnchorConfig, EngineKind, FillRequest, FillStats, PageScope, RunParams};
use anchorfill_core::{
    fill_file, locate_anchors, run_batch, BatchSummary, CancellationToken, MatchOutcome, PageDiagnostics,
    RecordStatus, RunContext,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pdf_engine::PdfDocument;
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storage::{Storage, StorageError};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "anchorfill")]
#[command(about = "Write values beside anchor phrases in fixed-layout PDF forms")]
pub struct Cli {
    /// Raise log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fill one document and print a JSON report.
    Fill {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Anchor value as KEY=VALUE; repeatable.
        #[arg(short = 's', long = "set", value_name = "KEY=VALUE", value_parser = parse_assignment)]
        values: Vec<(String, String)>,
        /// JSON object of anchor values. `--set` entries override it.
        #[arg(long, value_name = "FILE")]
        values_file: Option<PathBuf>,
        /// Defaults to `{stem}_filled.pdf` beside the input.
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Fill a template once per record of a JSON or CSV file.
    Batch {
        #[arg(value_name = "TEMPLATE")]
        template: PathBuf,
        #[arg(value_name = "RECORDS")]
        records: PathBuf,
        /// Defaults to the template's directory.
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Report where anchors are found without writing anything.
    Locate {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Anchor to look for; repeatable. Defaults to every configured anchor.
        #[arg(short, long = "anchor", value_name = "KEY")]
        anchors: Vec<String>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Anchor configuration JSON. Defaults to the user config directory.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Pages to search: `all`, `3`, or `1,3-5`.
    #[arg(long, default_value = "all")]
    pages: String,
    /// Minimum similarity for a match, 0..=1.
    #[arg(long)]
    threshold: Option<f64>,
    /// Engine order, comma separated.
    #[arg(long = "engine", value_delimiter = ',', value_name = "ENGINE")]
    engines: Vec<EngineKind>,
    /// Raster scale override, 0.5..=4.0.
    #[arg(long)]
    raster_scale: Option<f32>,
    /// TrueType/OpenType font for the embedded and raster engines.
    #[arg(long, value_name = "FILE")]
    font: Option<PathBuf>,
    #[arg(long)]
    font_size: Option<f32>,
}

impl RunArgs {
    fn params(&self) -> RunParams {
        let defaults = RunParams::default();
        RunParams {
            pages: PageScope::parse(&self.pages),
            fuzzy_threshold: self.threshold.unwrap_or(defaults.fuzzy_threshold),
            engines: if self.engines.is_empty() { defaults.engines.clone() } else { self.engines.clone() },
            raster_scale: self.raster_scale,
            font_size: self.font_size.unwrap_or(defaults.font_size),
            font_file: self.font.clone(),
            ..defaults
        }
    }

    fn context(&self) -> Result<RunContext> {
        let config = load_config(self.config.as_deref())?;
        RunContext::new(Arc::new(config), self.params()).context("invalid run parameters")
    }
}

#[derive(Debug, Serialize)]
struct FillReport {
    output: String,
    stats: FillStats,
    pages: Vec<PageDiagnostics>,
}

#[derive(Debug, Serialize)]
struct BatchRecordReport {
    index: usize,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    missing: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct BatchReport {
    summary: BatchSummary,
    records: Vec<BatchRecordReport>,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging(cli.verbose);

    match cli.command {
        Commands::Fill { file, values, values_file, output, run } => {
            run_fill(&file, values, values_file.as_deref(), output, &run)
        }
        Commands::Batch { template, records, output_dir, run } => {
            run_batch_command(&template, &records, output_dir, &run)
        }
        Commands::Locate { file, anchors, run } => run_locate(&file, &anchors, &run),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable. `RUST_LOG` applies unless `-v` is given.
fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run_fill(
    file: &Path,
    values: Vec<(String, String)>,
    values_file: Option<&Path>,
    output: Option<PathBuf>,
    run: &RunArgs,
) -> Result<()> {
    ensure_pdf_exists(file)?;

    let mut request = match values_file {
        Some(path) => storage::load_values(path)
            .with_context(|| format!("failed to read values from {}", path.display()))?,
        None => FillRequest::default(),
    };
    for (key, value) in values {
        request.insert(key, value);
    }
    if request.is_empty() {
        anyhow::bail!("no values to fill; pass --set KEY=VALUE or --values-file");
    }

    let context = run.context()?;
    let output = output.unwrap_or_else(|| storage::default_output_path(file));
    let outcome = fill_file(&context, file, &output, &request).context("failed to fill PDF")?;

    let report = FillReport {
        output: output.display().to_string(),
        stats: outcome.stats,
        pages: outcome.diagnostics,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

fn run_batch_command(template: &Path, records: &Path, output_dir: Option<PathBuf>, run: &RunArgs) -> Result<()> {
    ensure_pdf_exists(template)?;

    let requests = storage::load_records(records)
        .with_context(|| format!("failed to read batch records from {}", records.display()))?;
    let context = run.context()?;
    let output_dir = output_dir
        .or_else(|| template.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));

    let reports = run_batch(&context, template, &output_dir, &requests, &CancellationToken::new());
    let summary = BatchSummary::from_reports(&reports);

    let records = reports
        .into_iter()
        .map(|report| {
            let mut entry =
                BatchRecordReport { index: report.index, status: "", output: None, missing: None, error: None };
            match report.status {
                RecordStatus::Written { output, stats } => {
                    entry.status = "written";
                    entry.output = Some(output.display().to_string());
                    entry.missing = Some(stats.missing_names);
                }
                RecordStatus::Failed(err) => {
                    entry.status = "failed";
                    entry.error = Some(format!("{}: {err}", err.kind()));
                }
                RecordStatus::Cancelled => entry.status = "cancelled",
            }
            entry
        })
        .collect();

    let failed = summary.failed;
    println!("{}", serde_json::to_string_pretty(&BatchReport { summary, records })?);

    if failed > 0 {
        anyhow::bail!("{failed} batch record(s) failed");
    }
    Ok(())
}

fn run_locate(file: &Path, anchors: &[String], run: &RunArgs) -> Result<()> {
    ensure_pdf_exists(file)?;

    let context = run.context()?;
    if anchors.is_empty() && context.config().is_empty() {
        anyhow::bail!("nothing to locate; pass --anchor KEY or configure anchors");
    }

    let doc = PdfDocument::open(file).context("failed to open PDF")?;
    let outcomes: Vec<MatchOutcome> = locate_anchors(&context, &doc, anchors).context("failed to locate anchors")?;
    println!("{}", serde_json::to_string_pretty(&outcomes)?);

    Ok(())
}

/// `--config` when given, otherwise the user config directory. A platform without a config
/// directory behaves like an empty configuration.
fn load_config(path: Option<&Path>) -> Result<AnchorConfig> {
    if let Some(path) = path {
        return storage::load_config(path)
            .with_context(|| format!("failed to load anchor configuration from {}", path.display()));
    }

    match Storage::from_default_project() {
        Ok(store) => store.load_config().with_context(|| {
            format!("failed to load anchor configuration from {}", store.config_path().display())
        }),
        Err(StorageError::NoConfigDirectory) => Ok(AnchorConfig::default()),
        Err(err) => Err(err.into()),
    }
}

fn parse_assignment(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_owned(), value.to_owned())),
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

fn ensure_pdf_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}
