//! Learning bridge replay daemon.
//!
//! Runs the bridge over the in-memory platform, feeding it a JSON-lines
//! event trace, and prints the final counters as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use learnbridge::daemon::ReplayDaemon;
use learnbridge::{BridgeConfig, LearningBridge, MemoryPlatform, SystemClock, DEFAULT_CONFIG_PATH};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Reactive learning bridge controller
#[derive(Parser, Debug)]
#[command(name = "learnbridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// JSON-lines event trace to replay ("-" for stdin)
    #[arg(short = 'e', long, default_value = "-")]
    events: String,

    /// Override the connection stats log path
    #[arg(long)]
    stats_log: Option<PathBuf>,

    /// Override the per-host fan-out limit
    #[arg(long)]
    max_connections: Option<usize>,

    /// Number of event workers
    #[arg(short = 'w', long, default_value = "4")]
    workers: usize,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let mut config = BridgeConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(path) = args.stats_log {
        config.stats_log_path = path;
    }
    if let Some(limit) = args.max_connections {
        config.max_connections_per_host = limit;
    }

    let platform = Arc::new(MemoryPlatform::new());
    platform.set_record_packet_outs(false);
    let bridge = Arc::new(
        LearningBridge::start(config, platform.clone(), Arc::new(SystemClock))
            .context("starting learning bridge")?,
    );
    let daemon = ReplayDaemon::new(Arc::clone(&bridge), Arc::clone(&platform), args.workers);

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = if args.events == "-" {
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        let file = tokio::fs::File::open(&args.events)
            .await
            .with_context(|| format!("opening trace {}", args.events))?;
        Box::new(BufReader::new(file))
    };
    info!(events = %args.events, workers = args.workers, "Replaying event trace");

    let report = tokio::select! {
        result = daemon.run(reader) => match result {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "Trace replay failed");
                None
            }
        },
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => warn!("Received SIGINT, shutting down"),
                Err(e) => error!(error = %e, "Failed to listen for ctrl-c"),
            }
            None
        }
    };

    let summary = bridge.stop().await;
    let output = serde_json::json!({
        "replay": report,
        "shutdown": summary,
        "stats": bridge.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    info!("learnbridge exiting");
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to set logger: {}", e))?;
    Ok(())
}
