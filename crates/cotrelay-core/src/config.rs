//! Configuration management for the CoT relay.
//!
//! Settings are resolved in three layers:
//! - built-in defaults (serde default functions below)
//! - an optional YAML file
//! - `COTRELAY__*` environment variables (`__` separates nested keys)
//!
//! The binary applies CLI flags on top and calls [`RelayConfig::validate`]
//! once before binding any socket.

use crate::error::{ConfigError, Result};
use crate::types::{EgressTarget, Protocol, TlsConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "COTRELAY";

/// Root configuration structure.
///
/// # Examples
///
/// ```no_run
/// use cotrelay_core::config::RelayConfig;
///
/// let config = RelayConfig::load(Some("cotrelay.yaml".as_ref())).unwrap();
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// UDP ingress settings
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Egress link to the TAK server
    #[serde(default)]
    pub egress: EgressConfig,

    /// TLS material, required when the egress target uses `tls://`
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// CoT document settings
    #[serde(default)]
    pub cot: CotConfig,

    /// Worker pool and queue sizing
    #[serde(default)]
    pub performance: PerformanceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl RelayConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::from_yaml(&contents)
    }

    /// Loads configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML cannot be parsed.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Loads configuration from an optional file merged with `COTRELAY__*`
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, or if the merged sources
    /// cannot be deserialized.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, Self::environment())
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
    }

    fn load_with_env(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        let origin = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::file_not_found(path.display().to_string()).into());
                }
                builder = builder.add_source(
                    config::File::from(path)
                        .format(config::FileFormat::Yaml)
                        .required(true),
                );
                path.display().to_string()
            }
            None => "<environment>".to_string(),
        };

        let config = builder
            .add_source(env)
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                path: origin,
                reason: e.to_string(),
            })?;

        config.try_deserialize().map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Parses the configured egress target.
    pub fn target(&self) -> Result<EgressTarget> {
        Ok(self.egress.target.parse::<EgressTarget>()?)
    }

    /// Validates the configuration.
    ///
    /// Checks value ranges, the egress target URL and TLS material
    /// consistency.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.listener.validate()?;
        self.egress.validate()?;
        self.cot.validate()?;
        self.performance.validate()?;
        self.metrics.validate()?;
        self.logging.parse_level()?;

        let target = self.target()?;
        match (&target.protocol, &self.tls) {
            (Protocol::Tls, None) => {
                return Err(ConfigError::missing_tls(
                    "tls:// target requires ca_cert_path, client_cert_path and client_key_path",
                )
                .into());
            }
            (Protocol::Tls, Some(tls)) => Self::validate_tls_config(tls)?,
            (_, Some(_)) => {
                return Err(ConfigError::invalid_value(
                    "tls",
                    format!("TLS material configured but target {} is not tls://", target),
                )
                .into());
            }
            (_, None) => {}
        }

        Ok(())
    }

    fn validate_tls_config(tls: &TlsConfig) -> Result<()> {
        let files = [
            ("CA certificate", &tls.ca_cert_path),
            ("client certificate", &tls.client_cert_path),
            ("client key", &tls.client_key_path),
        ];

        for (what, path) in files {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::missing_tls(format!("{} path is empty", what)).into());
            }
            if !path.exists() {
                return Err(
                    ConfigError::missing_tls(format!("{} not found: {:?}", what, path)).into(),
                );
            }
        }

        Ok(())
    }
}

fn check_range<T>(field: &str, value: T, min: T, max: T) -> Result<()>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if value < min || value > max {
        return Err(ConfigError::invalid_value(
            field,
            format!("{} is outside {}..={}", value, min, max),
        )
        .into());
    }
    Ok(())
}

/// UDP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Bind address
    #[serde(default = "default_listen_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Largest datagram accepted, in bytes
    #[serde(default = "default_max_datagram_size")]
    pub max_datagram_size: usize,

    /// Kernel receive buffer (SO_RCVBUF), 0 keeps the OS default
    #[serde(default)]
    pub recv_buffer_bytes: usize,
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    5005
}

fn default_max_datagram_size() -> usize {
    1024
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: default_listen_host(),
            port: default_listen_port(),
            max_datagram_size: default_max_datagram_size(),
            recv_buffer_bytes: 0,
        }
    }
}

impl ListenerConfig {
    /// Returns `host:port` for binding.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::missing_field("listener.host").into());
        }
        check_range("listener.port", self.port, 1, u16::MAX)?;
        check_range("listener.max_datagram_size", self.max_datagram_size, 256, 65536)
    }
}

/// How the egress buffer behaves when full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowMode {
    /// Reject the incoming event immediately
    #[default]
    DropNewest,
    /// Wait up to `block_timeout_ms` for space, then reject
    Block,
}

/// Egress link settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EgressConfig {
    /// Target URL (`tcp://`, `tls://` or `udp://`)
    #[serde(default = "default_target")]
    pub target: String,

    /// Timeout for connect plus TLS handshake, in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Timeout for a single event write, in milliseconds
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// First backoff after a failure, in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling, in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Growth factor applied per consecutive failure
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Maximum events held while disconnected
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Full-buffer policy
    #[serde(default)]
    pub overflow: OverflowMode,

    /// Wait bound for [`OverflowMode::Block`], in milliseconds
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,

    /// Time allowed to flush buffered events on shutdown, in seconds
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_target() -> String {
    "tcp://localhost:8087".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_write_timeout_ms() -> u64 {
    5_000
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_buffer_capacity() -> usize {
    1000
}

fn default_block_timeout_ms() -> u64 {
    100
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            target: default_target(),
            connect_timeout_ms: default_connect_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            buffer_capacity: default_buffer_capacity(),
            overflow: OverflowMode::default(),
            block_timeout_ms: default_block_timeout_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl EgressConfig {
    /// Returns the connect timeout as a Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Returns the write timeout as a Duration.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Returns the initial backoff as a Duration.
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Returns the backoff ceiling as a Duration.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Returns the blocking-send wait bound as a Duration.
    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }

    /// Returns the shutdown grace period as a Duration.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    fn validate(&self) -> Result<()> {
        check_range("egress.connect_timeout_ms", self.connect_timeout_ms, 100, 300_000)?;
        check_range("egress.write_timeout_ms", self.write_timeout_ms, 100, 60_000)?;
        check_range("egress.initial_backoff_ms", self.initial_backoff_ms, 1, 300_000)?;
        check_range("egress.buffer_capacity", self.buffer_capacity, 1, 1_000_000)?;
        check_range("egress.shutdown_grace_secs", self.shutdown_grace_secs, 0, 300)?;

        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::invalid_value(
                "egress.max_backoff_ms",
                "must not be smaller than initial_backoff_ms",
            )
            .into());
        }

        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid_value(
                "egress.backoff_multiplier",
                format!("{} must be a finite value >= 1.0", self.backoff_multiplier),
            )
            .into());
        }

        Ok(())
    }
}

/// CoT document settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CotConfig {
    /// CoT type applied to every device
    #[serde(default = "default_device_type")]
    pub device_type: String,

    /// Seconds until an emitted event goes stale
    #[serde(default = "default_stale_seconds")]
    pub stale_seconds: u64,
}

fn default_device_type() -> String {
    "a-f-G-U-C".to_string()
}

fn default_stale_seconds() -> u64 {
    300
}

impl Default for CotConfig {
    fn default() -> Self {
        Self {
            device_type: default_device_type(),
            stale_seconds: default_stale_seconds(),
        }
    }
}

impl CotConfig {
    /// Returns the stale window as a Duration. Also used as the tracker's
    /// activity window.
    pub fn stale_window(&self) -> Duration {
        Duration::from_secs(self.stale_seconds)
    }

    fn validate(&self) -> Result<()> {
        let device_type = self.device_type.trim();
        if device_type.is_empty() {
            return Err(ConfigError::missing_field("cot.device_type").into());
        }
        if device_type.split('-').any(str::is_empty) {
            return Err(ConfigError::invalid_value(
                "cot.device_type",
                format!("'{}' is not a dash-separated CoT type", self.device_type),
            )
            .into());
        }
        check_range("cot.stale_seconds", self.stale_seconds, 10, 3600)
    }
}

/// Worker pool and queue sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Number of pipeline workers
    #[serde(default = "default_max_concurrent_messages")]
    pub max_concurrent_messages: usize,

    /// Capacity of the datagram queue between the socket and the workers
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Time allowed for workers to finish the backlog on shutdown, in seconds
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_max_concurrent_messages() -> usize {
    100
}

fn default_queue_capacity() -> usize {
    1000
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_messages: default_max_concurrent_messages(),
            queue_capacity: default_queue_capacity(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl PerformanceConfig {
    /// Returns the worker shutdown grace period as a Duration.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    fn validate(&self) -> Result<()> {
        check_range(
            "performance.max_concurrent_messages",
            self.max_concurrent_messages,
            1,
            1000,
        )?;
        check_range("performance.queue_capacity", self.queue_capacity, 10, 10_000)?;
        check_range("performance.shutdown_grace_secs", self.shutdown_grace_secs, 0, 300)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    /// Parses the log level string to a tracing Level.
    ///
    /// Accepts the tracing names case-insensitively plus `warning` and
    /// `critical`.
    pub fn parse_level(&self) -> Result<Level> {
        let level = match self.level.trim().to_ascii_lowercase().as_str() {
            "warning" => "warn".to_string(),
            "critical" => "error".to_string(),
            other => other.to_string(),
        };

        level.parse().map_err(|_| {
            ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                reason: format!("Invalid log level: {}", self.level),
            }
            .into()
        })
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON format for structured logging
    Json,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the Prometheus endpoint is served
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bind address for the Prometheus endpoint
    #[serde(default = "default_metrics_host")]
    pub host: String,

    /// Port for the Prometheus endpoint
    #[serde(default = "default_metrics_port")]
    pub port: u16,

    /// Seconds between statistics log lines
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_metrics_host() -> String {
    "0.0.0.0".to_string()
}

fn default_metrics_port() -> u16 {
    8089
}

fn default_stats_interval() -> u64 {
    30
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_metrics_host(),
            port: default_metrics_port(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

impl MetricsConfig {
    /// Returns the stats interval as a Duration.
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    /// Returns `host:port` for the exporter listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> Result<()> {
        check_range("metrics.port", self.port, 1, u16::MAX)?;
        check_range("metrics.stats_interval_secs", self.stats_interval_secs, 5, 300)
    }
}
