use anyhow::{Context, Result};
use clap::Parser;
use cotrelay_client::{ClientConfig, EgressTransport};
use cotrelay_core::config::{LogFormat, LoggingConfig, RelayConfig};
use cotrelay_core::metrics::RelayMetrics;
use cotrelay_cot::{CotConverter, CotSettings};
use cotrelay_pool::{
    spawn_stats_reporter, DeviceTracker, IngressConfig, IngressListener, RelayPipeline,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// cotrelay - relays GPGGA position sentences to a TAK server as CoT events
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "COTRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Override the UDP listen address
    #[arg(long)]
    listen_address: Option<String>,

    /// Override the UDP listen port
    #[arg(short = 'p', long)]
    listen_port: Option<u16>,

    /// Override the TAK server target (tcp://, tls:// or udp://)
    #[arg(short, long)]
    target: Option<String>,

    /// Override the log level
    #[arg(long)]
    log_level: Option<String>,

    /// Override the log format
    #[arg(long, value_parser = ["text", "json"])]
    log_format: Option<String>,

    /// Disable the Prometheus endpoint
    #[arg(long)]
    no_metrics: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

impl Args {
    fn apply(&self, config: &mut RelayConfig) {
        if let Some(host) = &self.listen_address {
            config.listener.host = host.clone();
        }
        if let Some(port) = self.listen_port {
            config.listener.port = port;
        }
        if let Some(target) = &self.target {
            config.egress.target = target.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        match self.log_format.as_deref() {
            Some("json") => config.logging.format = LogFormat::Json,
            Some("text") => config.logging.format = LogFormat::Text,
            _ => {}
        }
        if self.no_metrics {
            config.metrics.enabled = false;
        }
    }
}

fn init_logging(config: &LoggingConfig) -> Result<()> {
    let level = config.parse_level()?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.with_target(false).init(),
    }

    Ok(())
}

fn start_metrics_exporter(config: &RelayConfig) -> Result<()> {
    if !config.metrics.enabled {
        info!("Metrics export disabled");
        return Ok(());
    }

    let addr: SocketAddr = config
        .metrics
        .bind_address()
        .parse()
        .with_context(|| format!("Invalid metrics address: {}", config.metrics.bind_address()))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to start Prometheus exporter")?;

    info!(bind_address = %addr, "Prometheus metrics exporter started");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = RelayConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    if args.check {
        println!("Configuration OK");
        return Ok(());
    }

    init_logging(&config.logging)?;

    info!("Starting cotrelay");
    if let Some(path) = &args.config {
        info!("Configuration loaded from {:?}", path);
    }
    info!(
        listen = %config.listener.bind_address(),
        target = %config.egress.target,
        device_type = %config.cot.device_type,
        stale_seconds = config.cot.stale_seconds,
        workers = config.performance.max_concurrent_messages,
        queue_capacity = config.performance.queue_capacity,
        "Relay configuration"
    );

    start_metrics_exporter(&config)?;

    let metrics = Arc::new(RelayMetrics::new());
    let tracker = Arc::new(DeviceTracker::new(config.cot.stale_window()));

    let client_config =
        ClientConfig::from_relay_config(&config).context("Invalid egress configuration")?;
    let egress = Arc::new(
        EgressTransport::start(client_config, Arc::clone(&metrics))
            .context("Failed to start egress transport")?,
    );

    let pipeline = Arc::new(RelayPipeline::new(
        Arc::clone(&tracker),
        CotConverter::new(CotSettings::from(&config.cot)),
        egress.clone(),
        Arc::clone(&metrics),
    ));

    let listener = IngressListener::bind(IngressConfig::from_relay_config(&config))
        .context("Failed to start UDP listener")?;

    let cancel = CancellationToken::new();
    let background = cancel.child_token();

    let sweeper = tracker.spawn_sweeper(
        config.metrics.stats_interval(),
        Arc::clone(&metrics),
        background.clone(),
    );
    let stats = spawn_stats_reporter(
        config.metrics.stats_interval(),
        Arc::clone(&metrics),
        Arc::clone(&tracker),
        egress.clone(),
        background.clone(),
    );

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    info!(address = %listener.local_addr(), "cotrelay started");

    // Returns once cancelled and the workers have drained the queue
    listener.run(pipeline, cancel.clone()).await;

    info!("Draining egress buffer");
    egress.shutdown().await;

    background.cancel();
    for task in [sweeper, stats] {
        if let Err(e) = task.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }

    let snapshot = metrics.snapshot();
    info!(
        messages_received = snapshot.messages_received,
        messages_sent = snapshot.messages_sent,
        messages_dropped = snapshot.messages_dropped,
        "cotrelay stopped"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let args = Args::parse_from([
            "cotrelay",
            "--listen-port",
            "6000",
            "--target",
            "udp://tak.example:9000",
            "--log-format",
            "json",
            "--no-metrics",
        ]);

        let mut config = RelayConfig::default();
        args.apply(&mut config);

        assert_eq!(config.listener.port, 6000);
        assert_eq!(config.egress.target, "udp://tak.example:9000");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(!config.metrics.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_override_fails_validation() {
        let args = Args::parse_from(["cotrelay", "--target", "http://tak.example"]);
        let mut config = RelayConfig::default();
        args.apply(&mut config);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
