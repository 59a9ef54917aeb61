//! Neb-Harvest main entry point
//!
//! This is the command-line interface for the Neb-Harvest catalog crawler
//! and document downloader.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use neb_harvest::config::{load_config_with_hash, validate, Config};
use neb_harvest::output::{load_statistics, print_statistics};
use neb_harvest::{Coordinator, Request};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const EXIT_INTERRUPTED: u8 = 130;

/// Log levels accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "UPPER")]
enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error | Self::Critical => "error",
        }
    }
}

/// Neb-Harvest: a resumable catalog crawler and document downloader
///
/// Crawls the paginated catalog or search results of the national digital
/// library, collects document identifiers, and downloads the PDFs. Progress
/// is checkpointed per query, so an interrupted run resumes where it stopped.
#[derive(Parser, Debug)]
#[command(name = "neb-harvest")]
#[command(version)]
#[command(about = "A resumable catalog crawler and document downloader", long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Catalog identifier, or the search phrase with --search
    #[arg(long)]
    query: String,

    /// Treat the query as a full-text search instead of a catalog id
    #[arg(long)]
    search: bool,

    /// Proxy list, one `host:port[:user:password]` per line
    #[arg(long, value_name = "PATH")]
    proxy_file: Option<PathBuf>,

    /// Maximum number of pages a crawl worker claims at once
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Number of concurrent crawl workers
    #[arg(long)]
    parser_workers: Option<usize>,

    /// Number of concurrent download workers
    #[arg(long)]
    download_workers: Option<usize>,

    /// Log verbosity
    #[arg(long, value_enum, ignore_case = true, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Path to TOML configuration file
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Page request timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Directory for per-query results
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Root URL of the remote library
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Start from scratch, ignoring any saved progress
    #[arg(long, conflicts_with = "stats")]
    fresh: bool,

    /// Show statistics from the saved progress and exit
    #[arg(long)]
    stats: bool,

    /// Log to the console only
    #[arg(long)]
    no_log_file: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let (mut config, config_hash) = match &cli.config {
        Some(path) => {
            let (config, hash) = load_config_with_hash(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
            (config, Some(hash))
        }
        None => (Config::default(), None),
    };
    apply_overrides(&mut config, &cli);
    validate(&config).context("Invalid configuration")?;

    let log_dir = (!cli.no_log_file).then(|| PathBuf::from(&config.logging.log_dir));
    let _log_guard = setup_logging(cli.log_level, log_dir.as_deref())?;

    match (&cli.config, config_hash) {
        (Some(path), Some(hash)) => {
            tracing::info!("Configuration loaded from {} (hash: {})", path.display(), hash)
        }
        _ => tracing::info!("Using default configuration"),
    }

    let request = Request::new(cli.query.clone(), cli.search);

    if cli.stats {
        return handle_stats(&config, &request).await;
    }

    handle_harvest(config, request, cli.fresh).await
}

/// Applies command-line flags on top of the file configuration
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(chunk_size) = cli.chunk_size {
        config.harvest.chunk_size = chunk_size;
    }
    if let Some(workers) = cli.parser_workers {
        config.harvest.parser_workers = workers;
    }
    if let Some(workers) = cli.download_workers {
        config.harvest.download_workers = workers;
    }
    if let Some(dir) = &cli.output_dir {
        config.harvest.output_dir = dir.display().to_string();
    }
    if let Some(base_url) = &cli.base_url {
        config.harvest.base_url = base_url.clone();
    }
    if let Some(timeout) = cli.timeout {
        config.http.timeout_secs = timeout;
    }
    if let Some(proxy_file) = &cli.proxy_file {
        config.http.proxy_file = Some(proxy_file.display().to_string());
    }
}

/// Sets up console logging plus an optional daily rolling log file
///
/// `RUST_LOG` takes precedence over `--log-level` when set. The returned
/// guard must live until the end of `main` so buffered lines are flushed.
fn setup_logging(level: LogLevel, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()))
    };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_filter(filter());

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "neb-harvest.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Handles the --stats mode: shows statistics from the saved checkpoint
async fn handle_stats(config: &Config, request: &Request) -> Result<ExitCode> {
    let path = config.harvest.checkpoint_path(request);
    println!("Checkpoint: {}\n", path.display());

    match load_statistics(&path).await? {
        Some(stats) => print_statistics(&stats),
        None => println!("No saved progress for {}", request),
    }

    Ok(ExitCode::SUCCESS)
}

/// Handles the main harvest operation
async fn handle_harvest(config: Config, request: Request, fresh: bool) -> Result<ExitCode> {
    tracing::info!(
        "Harvesting {} with {} crawl workers (chunk size {}) and {} download workers",
        request,
        config.harvest.parser_workers,
        config.harvest.chunk_size,
        config.harvest.download_workers
    );

    let coordinator = Coordinator::new(config, request, fresh)
        .await
        .context("Failed to set up the harvest")?;
    setup_shutdown_handler(coordinator.cancellation_token());

    let report = coordinator.run().await?;

    if report.has_error {
        tracing::error!("Harvest ended with errors");
        return Ok(ExitCode::FAILURE);
    }
    if report.cancelled {
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    }
    if report.is_complete() {
        tracing::info!("Everything for this query has been downloaded");
    }

    Ok(ExitCode::SUCCESS)
}

/// First Ctrl+C stops the run gracefully. Second Ctrl+C exits immediately.
fn setup_shutdown_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Received Ctrl+C, saving progress and shutting down");
            tracing::warn!("Press Ctrl+C again to force quit");
            cancel.cancel();

            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nForce quit requested, exiting immediately...");
                std::process::exit(i32::from(EXIT_INTERRUPTED));
            }
        }
    });
}
