//! Sensor Gateway - field sensor cleaning and FIWARE delivery
//!
//! # Usage
//!
//! ```bash
//! # Replay a dirty CSV (1.5 s between cycles)
//! sensor-gateway --csv sensor_data_raw_dirty.csv
//!
//! # Replay as fast as possible, logging payloads instead of sending them
//! sensor-gateway --csv data.csv --speed 0 --dry-run
//!
//! # Stream JSON batches from the field simulator
//! field-sim --cycles 200 | sensor-gateway --stdin
//! ```
//!
//! # Environment Variables
//!
//! - `GATEWAY_CONFIG`: Path to a gateway_config.toml
//! - `API_KEY`: IoT-agent API key (also read from `.env`)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sensor_gateway::config::GatewayConfig;
use sensor_gateway::delivery::{FiwareClient, LogSink};
use sensor_gateway::runner::{
    BatchSource, CsvReplaySource, CycleRunner, DeliverySinks, RunnerSettings, RunnerStats,
    StdinSource,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "sensor-gateway")]
#[command(about = "Streaming correction gateway for field sensor clusters")]
#[command(version)]
struct CliArgs {
    /// Replay readings from a CSV file (timestamp, cluster_id, metric columns)
    #[arg(long, value_name = "FILE", conflicts_with = "stdin")]
    csv: Option<PathBuf>,

    /// Read JSON batches from stdin, one per line
    #[arg(long)]
    stdin: bool,

    /// Explicit config file (overrides GATEWAY_CONFIG and ./gateway_config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// CSV replay speed multiplier (1 = configured delay, 0 = no delay)
    #[arg(long, default_value = "1")]
    speed: u64,

    /// Log payloads instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Write the effective configuration to FILE and exit
    #[arg(long, value_name = "FILE")]
    write_config: Option<PathBuf>,
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn load_config(args: &CliArgs) -> Result<GatewayConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let mut config = GatewayConfig::load_from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?;
            config.apply_env_overrides();
            info!(path = %path.display(), "Loaded gateway config");
            config
        }
        None => GatewayConfig::load(),
    };

    if args.dry_run {
        config.delivery.enabled = false;
    }
    Ok(config)
}

fn build_sinks(config: &GatewayConfig) -> Result<DeliverySinks> {
    if !config.delivery.enabled {
        info!("Delivery: dry run (payloads are logged only)");
        return Ok(DeliverySinks::uniform(Arc::new(LogSink)));
    }

    if config.delivery.api_key.is_empty() {
        warn!("delivery.api_key is empty; set API_KEY or the config value");
    }
    let client = FiwareClient::new(&config.delivery, &config.gateway)
        .context("Failed to build FIWARE client")?;
    info!(
        iot_agent = %config.delivery.iot_agent_url,
        orion = %client.orion_url(),
        service = %config.delivery.service,
        "Delivery: FIWARE"
    );
    Ok(DeliverySinks::uniform(Arc::new(client)))
}

fn open_source(args: &CliArgs, config: &GatewayConfig) -> Result<Box<dyn BatchSource>> {
    if args.stdin {
        info!("Input: stdin (JSON batches)");
        return Ok(Box::new(StdinSource::new()));
    }

    let Some(path) = &args.csv else {
        bail!("No input selected: pass --csv <FILE> or --stdin");
    };

    let delay_ms = if args.speed == 0 {
        0
    } else {
        config.replay.cycle_delay_ms / args.speed
    };
    let metrics: Vec<&str> = config.thresholds.metrics().collect();
    let source = CsvReplaySource::load(path, Some(&metrics), delay_ms)
        .with_context(|| format!("Failed to load CSV {}", path.display()))?;
    info!(
        batches = source.remaining(),
        delay_ms,
        "Input: CSV replay"
    );
    Ok(Box::new(source))
}

/// Wait for the runner task, cancelling everything if it fails.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<RunnerStats>>,
    cancel_token: CancellationToken,
) -> Result<RunnerStats> {
    let mut stats = RunnerStats::default();
    while let Some(result) = task_set.join_next().await {
        match result {
            Ok(Ok(task_stats)) => stats.merge(&task_stats),
            Ok(Err(e)) => {
                error!("Supervisor: task failed: {}", e);
                cancel_token.cancel();
                return Err(e);
            }
            Err(e) => {
                error!("Supervisor: task panicked: {}", e);
                cancel_token.cancel();
                return Err(anyhow::anyhow!("Task panicked: {}", e));
            }
        }
    }
    Ok(stats)
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    if dotenvy::dotenv().is_ok() {
        info!("Loaded environment from .env");
    }

    let config = load_config(&args)?;

    if let Some(path) = &args.write_config {
        config.save_to_file(path)?;
        return Ok(());
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Sensor Gateway: {}", config.gateway.name);
    info!(
        "  {} metrics | {} positioned devices | streak limit {}",
        config.thresholds.len(),
        config.devices.len(),
        config.correction.streak_limit
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let sinks = build_sinks(&config)?;
    let mut source = open_source(&args, &config)?;

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let runner = CycleRunner::new(
        RunnerSettings::from_config(&config),
        sinks,
        cancel_token.clone(),
    );

    let mut task_set: JoinSet<Result<RunnerStats>> = JoinSet::new();
    task_set.spawn(async move {
        info!("[CycleRunner] Task starting");
        Ok(runner.run(source.as_mut()).await)
    });

    let stats = run_supervisor(&mut task_set, cancel_token).await?;

    if stats.payloads_dropped > 0 {
        warn!(dropped = stats.payloads_dropped, "Some payloads were not delivered");
    }
    info!("Sensor gateway shutdown complete");
    Ok(())
}
