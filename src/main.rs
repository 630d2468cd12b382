#![forbid(unsafe_code)]

//! `riveter`: query suspension dispatcher binary.
//!
//! Loads configuration, fits the size regression, creates the shared
//! handshake segments, launches one engine run, and prints the run report
//! as JSON on stdout.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use riveter::audit::{AuditLogger, JsonlAuditWriter};
use riveter::config::GlobalConfig;
use riveter::cost_model::CostModel;
use riveter::estimator::HardwareProfile;
use riveter::handshake::shm::ShmSegments;
use riveter::handshake::HandshakeChannel;
use riveter::models::run::RunState;
use riveter::orchestrator::dispatcher::Dispatcher;
use riveter::orchestrator::launcher::RunRequest;
use riveter::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "riveter", about = "Query suspension strategy dispatcher", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Registered query identifier to run.
    #[arg(long)]
    query: String,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the engine database location.
    #[arg(long)]
    database: Option<String>,

    /// Override the dataset directory.
    #[arg(long)]
    data_source: Option<PathBuf>,

    /// Override the engine scratch directory.
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Override the engine worker thread count.
    #[arg(long)]
    threads: Option<u32>,

    /// Override the pipeline state persistence path.
    #[arg(long)]
    persistence_location: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("riveter dispatcher bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<ExitCode> {
    // ── Load configuration ──────────────────────────────
    let config = GlobalConfig::load_from_path(&args.config)?;
    info!(path = %args.config.display(), queries = config.queries.len(), "configuration loaded");
    log_hardware_profile();

    let registry = config.query_registry();
    let profile = registry.resolve(&args.query)?;
    let mut request = RunRequest::from_config(&config.engine, &args.query, profile);
    if let Some(database) = args.database {
        request.database = database;
    }
    if let Some(data_source) = args.data_source {
        request.data_source = data_source;
    }
    if let Some(temp_dir) = args.temp_dir {
        request.temp_dir = temp_dir;
    }
    if let Some(threads) = args.threads {
        if threads == 0 {
            return Err(AppError::Config("--threads must be greater than zero".into()));
        }
        request.threads = threads;
    }
    if let Some(location) = args.persistence_location {
        request.persistence_location = location;
    }

    // ── Cost model ──────────────────────────────────────
    let cost_model = CostModel::from_config(&config)?;

    // ── Shared segments ─────────────────────────────────
    let segments = ShmSegments::create_or_open(&config.segments)?;
    let channel = Arc::new(HandshakeChannel::new(segments));
    info!(
        ready = %config.segments.ready,
        strategy = %config.segments.strategy,
        state_size = %config.segments.state_size,
        sequence = %config.segments.sequence,
        "handshake segments ready"
    );

    let ct = CancellationToken::new();
    let mut dispatcher = match Dispatcher::new(Arc::clone(&channel), cost_model, &config, ct.clone()) {
        Ok(dispatcher) => dispatcher,
        Err(err) => {
            if let Err(teardown_err) = channel.teardown() {
                warn!(%teardown_err, "handshake teardown failed");
            }
            return Err(err);
        }
    };
    if let Some(log_dir) = &config.audit.log_dir {
        let writer: Arc<dyn AuditLogger> = Arc::new(JsonlAuditWriter::new(log_dir.clone())?);
        dispatcher = dispatcher.with_audit(writer);
        info!(log_dir = %log_dir.display(), "decision log enabled");
    }

    let shutdown_ct = ct.clone();
    let shutdown_handle = tokio::spawn(async move {
        tokio::select! {
            () = shutdown_signal() => {
                info!("shutdown signal received");
                shutdown_ct.cancel();
            }
            () = shutdown_ct.cancelled() => {}
        }
    });

    let features = profile.features();
    let outcome = dispatcher.run(&request, features).await;
    ct.cancel();
    let _ = shutdown_handle.await;

    let report = outcome?;
    let rendered = serde_json::to_string_pretty(&report)?;
    println!("{rendered}");

    if report.state == RunState::Completed {
        Ok(ExitCode::SUCCESS)
    } else {
        if let Some(err) = &report.error {
            error!(state = ?report.state, %err, "run did not complete");
        }
        Ok(ExitCode::FAILURE)
    }
}

#[allow(clippy::cast_precision_loss)]
fn log_hardware_profile() {
    let profile = HardwareProfile::detect();
    let gigabytes = |bytes: Option<u64>| bytes.map(|b| b as f64 / 1e9);
    info!(
        hardware_threads = ?profile.hardware_threads,
        total_memory_gb = ?gigabytes(profile.total_memory_bytes),
        available_memory_gb = ?gigabytes(profile.available_memory_bytes),
        "hardware profile"
    );
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
