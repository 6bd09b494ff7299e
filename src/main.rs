//! Latency Watch Service
//!
//! Monitors round-trip latency to a set of endpoints, flags spikes against a
//! per-endpoint forecast and suggests faster servers. Exposes Prometheus
//! metrics, a JSON status snapshot and lifecycle control over HTTP.
//!
//! Usage:
//!   latency-watch --endpoint example.com --endpoint example.org --metrics-port 9090
//!
//! Environment Variables:
//!   LATENCY_WATCH_CONFIG - Path to TOML config file
//!   LATENCY_WATCH_METRICS_PORT - HTTP port (default: 9090)
//!   LATENCY_WATCH_ENDPOINTS - Comma-separated endpoints
//!   RUST_LOG - Overrides --log-level

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use latency_watch::api::monitor_router;
use latency_watch::monitor::{MonitorConfig, PingProbe, StartOutcome, Supervisor, SystemResolver};

#[derive(Parser, Debug)]
#[command(name = "latency-watch")]
#[command(about = "Adaptive latency monitoring with spike detection and reroute suggestions")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "LATENCY_WATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Endpoint to monitor (repeatable)
    #[arg(short, long = "endpoint", env = "LATENCY_WATCH_ENDPOINTS", value_delimiter = ',')]
    endpoints: Vec<String>,

    /// HTTP port for the metrics, status and control routes
    #[arg(short, long, default_value = "9090", env = "LATENCY_WATCH_METRICS_PORT")]
    metrics_port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Directory for per-endpoint CSV journals
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Disable the CSV journal
    #[arg(long)]
    no_journal: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();
    let args = Args::parse();

    init_tracing(&args.log_level);
    info!("Starting Latency Watch");

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config from {}", path.display());
            MonitorConfig::load(path)?
        }
        None => MonitorConfig::from_env(),
    };
    if let Some(dir) = &args.log_dir {
        config.journal.dir = dir.clone();
        config.journal.enabled = true;
    }
    if args.no_journal {
        config.journal.enabled = false;
    }

    let supervisor = Arc::new(Supervisor::new(
        config.clone(),
        Arc::new(PingProbe::new(config.probe.clone())),
        Arc::new(SystemResolver),
    ));

    for endpoint in &args.endpoints {
        if supervisor.add(endpoint) {
            info!("  - {}", endpoint.trim());
        }
    }
    if supervisor.endpoints().is_empty() {
        warn!("No endpoints configured; pass --endpoint to monitor something");
    }

    if let StartOutcome::Started(n) = supervisor.start().await {
        info!("Monitoring {} endpoints", n);
    }

    let app = monitor_router().with_state(supervisor.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], args.metrics_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Prometheus metrics available at http://{}/metrics", addr);

    let http_server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = http_server => {
            info!("HTTP server exited");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    supervisor.shutdown().await;
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("latency_watch={}", level.to_lowercase())));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
