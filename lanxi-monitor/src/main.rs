//! LAN-XI Monitor Sidecar
//!
//! Prometheus sidecar for a LAN-XI data-acquisition module.
//! It uses the lanxi-stream library and adds:
//! - Recording lifecycle over the module's REST API
//! - Liveness probing (ICMP ping)
//! - A Prometheus scrape endpoint for liveness and amplitude gauges
//! - Offline replay of captured streams

use anyhow::{Context, Result};
use clap::Parser;
use lanxi_stream::{MetricsSink, RecordingSink, SessionEnd};
use prometheus::Registry;
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

mod config;
mod lifecycle;
mod liveness;
mod measurement;
mod metrics;
#[cfg(test)]
mod test_support;

use config::AppConfig;
use lifecycle::LanxiClient;
use liveness::LivenessMonitor;
use measurement::{run_measurement, StreamTarget};
use metrics::{MetricsServer, PrometheusMetrics};

/// LAN-XI Monitor - liveness and amplitude metrics for a LAN-XI module
#[derive(Parser, Debug)]
#[command(name = "lanxi-monitor")]
#[command(about = "Expose LAN-XI liveness and live amplitude extrema as Prometheus metrics", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// LAN-XI module host (overrides config)
    #[arg(long, value_name = "HOST")]
    lanxi_host: Option<String>,

    /// Port for the /metrics endpoint (overrides config)
    #[arg(long, value_name = "PORT")]
    http_port: Option<u16>,

    /// Device identifier label (overrides config)
    #[arg(long, value_name = "ID")]
    device_id: Option<String>,

    /// Device location label (overrides config)
    #[arg(long, value_name = "LOCATION")]
    location: Option<String>,

    /// Decode a captured stream offline and print the published values
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("LAN-XI Monitor v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using stream library v{}", lanxi_stream::VERSION);

    let config = resolve_config(&args)?;

    if let Some(path) = &args.replay {
        return replay_mode(path, &config);
    }

    run_sidecar(config).await
}

/// Load the config file (if any) and apply command-line overrides
fn resolve_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => AppConfig::default(),
    };

    if let Some(host) = &args.lanxi_host {
        config.device.host = host.clone();
    }
    if let Some(port) = args.http_port {
        config.http.port = port;
    }
    if let Some(id) = &args.device_id {
        config.device.id = id.clone();
    }
    if let Some(location) = &args.location {
        config.device.location = location.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Offline mode: flushes follow stream time, output goes to stdout
fn replay_mode(path: &Path, config: &AppConfig) -> Result<()> {
    let sink = RecordingSink::new();
    let report = lanxi_stream::replay_file(path, &config.stream_config(), &sink)
        .with_context(|| format!("Failed to replay {:?}", path))?;

    for publication in sink.take() {
        println!(
            "{}{{device_id=\"{}\",location=\"{}\",channel=\"{}\"}} {}",
            publication.name,
            publication.labels.device_id,
            publication.labels.location,
            publication.labels.channel,
            publication.value
        );
    }

    let stats = report.stats;
    println!(
        "\n{} frames ({} signal, {} interpretation, {} quality, {} unknown, {} malformed), {} flush cycles",
        stats.frames,
        stats.signal_frames,
        stats.interpretation_frames,
        stats.quality_frames,
        stats.unknown_frames,
        stats.malformed_frames,
        report.flushes
    );
    if let (Some(first), Some(last)) = (stats.first_stream_time, stats.last_stream_time) {
        println!("stream time {} .. {}", first.to_rfc3339(), last.to_rfc3339());
    }

    match report.end {
        SessionEnd::Closed => Ok(()),
        SessionEnd::Failed(e) => Err(e).context("Capture ended with a stream error"),
    }
}

/// Live mode: serve metrics, drive the recording, stream until a signal
async fn run_sidecar(config: AppConfig) -> Result<()> {
    // Handlers go in before anything the stop sequence would have to undo
    let shutdown = shutdown_signal()?;

    let registry = Registry::new();
    let metrics =
        PrometheusMetrics::with_registry(&registry).context("Failed to register metrics")?;

    let server = MetricsServer::start(SocketAddr::from(([0, 0, 0, 0], config.http.port)), registry)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let liveness = tokio::spawn(
        LivenessMonitor::new(
            config.device.host.clone(),
            config.device.id.clone(),
            config.device.location.clone(),
            config.liveness_interval(),
            std::time::Duration::from_secs(config.liveness.timeout_secs),
            metrics.clone(),
        )
        .run(shutdown_rx),
    );

    let client = LanxiClient::new(&config.device.host, config.request_timeout())?;
    let target = StreamTarget {
        host: config.device.host.clone(),
        config: config.stream_config(),
        connect_timeout: config.request_timeout(),
    };
    let sink: Arc<dyn MetricsSink> = Arc::new(metrics);

    run_measurement(&client, &target, sink, shutdown).await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = liveness.await {
        log::error!("Liveness task failed: {}", e);
    }

    server.shutdown().await;
    log::info!("Shutdown complete");
    Ok(())
}

/// Install SIGINT and SIGTERM handlers; the future resolves on either
#[cfg(unix)]
fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt =
        signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => log::info!("SIGINT received"),
            _ = terminate.recv() => log::info!("SIGTERM received"),
        }
    })
}

/// Install the Ctrl+C handler; the future resolves when it fires
#[cfg(windows)]
fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    let mut ctrl_c =
        tokio::signal::windows::ctrl_c().context("Failed to install Ctrl+C handler")?;

    Ok(async move {
        ctrl_c.recv().await;
        log::info!("Ctrl+C received");
    })
}

/// Initialize logging based on verbosity
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
