//! Zephyrus Ingest - clinical bundle ingestion tool

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};
use zephyrus_common::logging::{init_logging, LogConfig, LogLevel};
use zephyrus_ingest::{
    CsvSink, DirectorySource, IngestConfig, IngestPipeline, MemorySink, MissingAmountPolicy,
    PipelineRun, ResourceKind, ShutdownCoordinator, Sink,
};

#[derive(Parser, Debug)]
#[command(name = "zephyrus-ingest")]
#[command(author, version, about = "Clinical bundle ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a directory of bundle files
    Run(RunArgs),

    /// List supported resource kinds and their output tables
    Kinds,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Directory of bundle files
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Directory for CSV tables
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bundle files processed concurrently
    #[arg(long)]
    bundle_workers: Option<usize>,

    /// Entries processed concurrently within one bundle
    #[arg(long)]
    resource_workers: Option<usize>,

    /// Records per kind buffered before a flush
    #[arg(long)]
    batch_size: Option<usize>,

    /// How missing monetary values are recorded (zero or absent)
    #[arg(long)]
    missing_amount: Option<MissingAmountPolicy>,

    /// Bundle file extension
    #[arg(long)]
    extension: Option<String>,

    /// Extract and batch without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    summary_json: Option<PathBuf>,

    /// PostgreSQL connection string; records go to the database instead of CSV
    #[cfg(feature = "database")]
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Create the record tables before ingesting
    #[cfg(feature = "database")]
    #[arg(long)]
    create_tables: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = match LogConfig::builder()
        .level(log_level)
        .log_file_prefix("zephyrus-ingest")
        .build()
        .merge_env()
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: invalid logging configuration: {e:#}");
            return ExitCode::from(2);
        }
    };

    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(2);
        }
    };

    let result = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Kinds => {
            list_kinds();
            Ok(ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn list_kinds() {
    println!("{:<24} TABLE", "RESOURCE KIND");
    for kind in ResourceKind::ALL {
        println!("{:<24} {}", kind.as_str(), kind.table_name());
    }
}

fn apply_overrides(mut config: IngestConfig, args: &RunArgs) -> IngestConfig {
    if let Some(input) = &args.input {
        config = config.with_input_dir(input);
    }
    if let Some(output) = &args.output {
        config = config.with_output_dir(output);
    }
    if let Some(workers) = args.bundle_workers {
        config = config.with_bundle_workers(workers);
    }
    if let Some(workers) = args.resource_workers {
        config = config.with_resource_workers(workers);
    }
    if let Some(size) = args.batch_size {
        config = config.with_batch_flush_threshold(size);
    }
    if let Some(policy) = args.missing_amount {
        config = config.with_missing_amount(policy);
    }
    if let Some(extension) = &args.extension {
        config = config.with_file_extension(extension);
    }
    #[cfg(feature = "database")]
    if let Some(url) = &args.database_url {
        config = config.with_database_url(url);
    }
    config
}

async fn build_sink(config: &IngestConfig, args: &RunArgs) -> Result<Arc<dyn Sink>> {
    if args.dry_run {
        info!("Dry run, batches are kept in memory only");
        return Ok(Arc::new(MemorySink::new()));
    }

    #[cfg(feature = "database")]
    if let Some(url) = &config.database_url {
        let sink = zephyrus_ingest::sink::PostgresSink::connect(url, ResourceKind::ALL.len() as u32)
            .await
            .context("Failed to connect to PostgreSQL")?;
        if args.create_tables {
            sink.ensure_schema()
                .await
                .context("Failed to create record tables")?;
        }
        return Ok(Arc::new(sink));
    }

    #[cfg(not(feature = "database"))]
    if config.database_url.is_some() {
        tracing::warn!("database_url is set but this build has no database support, writing CSV");
    }

    Ok(Arc::new(CsvSink::new(&config.output_dir)))
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::with_template(
        "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})",
    )
    .map(|style| style.progress_chars("#>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message("Ingesting bundles");
    pb
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let config = IngestConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let config = apply_overrides(config, &args);
    config.validate().context("Invalid configuration")?;

    let source = Arc::new(
        DirectorySource::new(&config.input_dir).with_extension(config.file_extension.clone()),
    );
    let sink = build_sink(&config, &args).await?;

    let run_state = Arc::new(PipelineRun::new());
    let listener = ShutdownCoordinator::new(Arc::clone(&run_state)).spawn_signal_listener();

    info!(
        run_id = %run_state.id(),
        input = %config.input_dir.display(),
        sink = sink.name(),
        bundle_workers = config.bundle_workers,
        resource_workers = config.resource_workers,
        "Starting ingestion"
    );

    let progress = (!args.no_progress).then(progress_bar);
    let mut pipeline = IngestPipeline::new(config, source, sink).with_run(run_state);
    if let Some(pb) = &progress {
        pipeline = pipeline.with_progress(pb.clone());
    }

    let result = pipeline.run().await;
    listener.abort();
    if let Some(pb) = &progress {
        pb.finish_and_clear();
    }
    let summary = result.context("Failed to list bundle files")?;

    println!("{summary}");

    if let Some(path) = &args.summary_json {
        let json = summary.to_json().context("Failed to serialize run summary")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write summary to {}", path.display()))?;
    }

    if let Some(fatal) = &summary.fatal_error {
        error!(%fatal, "Ingestion failed");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
