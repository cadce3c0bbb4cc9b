use cotrelay_core::config::{EgressConfig, OverflowMode, RelayConfig};
use cotrelay_core::error::ConfigError;
use cotrelay_core::types::{EgressTarget, Protocol, TlsConfig};
use std::time::Duration;

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier (for exponential backoff)
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from(&EgressConfig::default())
    }
}

impl From<&EgressConfig> for ReconnectConfig {
    fn from(config: &EgressConfig) -> Self {
        Self {
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            backoff_multiplier: config.backoff_multiplier,
        }
    }
}

/// What `send` does when the buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Reject the incoming event
    #[default]
    DropNewest,
    /// Wait up to `timeout` for space, then reject
    Block { timeout: Duration },
}

impl OverflowPolicy {
    pub fn from_config(config: &EgressConfig) -> Self {
        match config.overflow {
            OverflowMode::DropNewest => OverflowPolicy::DropNewest,
            OverflowMode::Block => OverflowPolicy::Block {
                timeout: config.block_timeout(),
            },
        }
    }
}

/// Result of handing an event to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Buffered for delivery
    Queued,
    /// Discarded (buffer full, or transport shutting down)
    Dropped,
}

impl SendOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, SendOutcome::Queued)
    }
}

/// Configuration for the egress client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Remote endpoint
    pub target: EgressTarget,
    /// Client certificate material, required for `tls://`
    pub tls: Option<TlsConfig>,
    /// Bound on connect plus TLS handshake
    pub connect_timeout: Duration,
    /// Bound on a single event write
    pub write_timeout: Duration,
    /// Auto-reconnect configuration
    pub reconnect: ReconnectConfig,
    /// Maximum buffered events
    pub buffer_capacity: usize,
    /// Full-buffer behavior
    pub overflow: OverflowPolicy,
    /// Time allowed to flush the buffer on shutdown
    pub shutdown_grace: Duration,
}

impl ClientConfig {
    /// Config for `target` with default timeouts and buffering.
    pub fn new(target: EgressTarget) -> Self {
        Self::with_egress(target, None, &EgressConfig::default())
    }

    fn with_egress(target: EgressTarget, tls: Option<TlsConfig>, egress: &EgressConfig) -> Self {
        Self {
            target,
            tls,
            connect_timeout: egress.connect_timeout(),
            write_timeout: egress.write_timeout(),
            reconnect: ReconnectConfig::from(egress),
            buffer_capacity: egress.buffer_capacity,
            overflow: OverflowPolicy::from_config(egress),
            shutdown_grace: egress.shutdown_grace(),
        }
    }

    /// Builds the client config from the relay config.
    pub fn from_relay_config(config: &RelayConfig) -> Result<Self, ConfigError> {
        let target = config.egress.target.parse::<EgressTarget>()?;
        let tls = match target.protocol {
            Protocol::Tls => Some(config.tls.clone().ok_or_else(|| {
                ConfigError::missing_tls("tls:// target requires a tls section")
            })?),
            _ => None,
        };

        Ok(Self::with_egress(target, tls, &config.egress))
    }
}

/// Calculate backoff duration for reconnect attempt
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let backoff_secs =
        config.initial_backoff.as_secs_f64() * config.backoff_multiplier.powi(attempt as i32);
    let capped_secs = backoff_secs.min(config.max_backoff.as_secs_f64());
    Duration::from_secs_f64(capped_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let config = ReconnectConfig {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        };

        assert_eq!(calculate_backoff(0, &config), Duration::from_secs(1));
        assert_eq!(calculate_backoff(1, &config), Duration::from_secs(2));
        assert_eq!(calculate_backoff(2, &config), Duration::from_secs(4));
        assert_eq!(calculate_backoff(3, &config), Duration::from_secs(8));
        assert_eq!(calculate_backoff(10, &config), Duration::from_secs(60)); // capped
        assert_eq!(calculate_backoff(500, &config), Duration::from_secs(60));
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::new("tcp://localhost".parse().unwrap());
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.write_timeout, Duration::from_secs(5));
        assert_eq!(config.reconnect.initial_backoff, Duration::from_secs(1));
        assert_eq!(config.buffer_capacity, 1000);
        assert_eq!(config.overflow, OverflowPolicy::DropNewest);
    }

    #[test]
    fn test_from_relay_config() {
        let mut relay = RelayConfig::default();
        relay.egress.target = "udp://10.0.0.5:6969".to_string();
        relay.egress.overflow = OverflowMode::Block;
        relay.egress.block_timeout_ms = 250;

        let config = ClientConfig::from_relay_config(&relay).unwrap();
        assert_eq!(config.target.protocol, Protocol::Udp);
        assert_eq!(config.target.port, 6969);
        assert!(config.tls.is_none());
        assert_eq!(
            config.overflow,
            OverflowPolicy::Block {
                timeout: Duration::from_millis(250)
            }
        );
    }

    #[test]
    fn test_tls_target_requires_material() {
        let mut relay = RelayConfig::default();
        relay.egress.target = "tls://tak.example.com".to_string();

        let err = ClientConfig::from_relay_config(&relay).unwrap_err();
        assert!(matches!(err, ConfigError::MissingTlsMaterial { .. }));
    }
}
