//! # CoT Relay Core
//!
//! Configuration, error types, egress target types and the shared metrics
//! sink for the GPGGA to CoT relay.
//!
//! - **Config**: `RelayConfig` loaded from YAML plus `COTRELAY__*` environment
//!   overrides, validated once at startup.
//! - **Errors**: `RelayError` and `ConfigError` built with `thiserror`.
//! - **Types**: `Protocol`, `EgressTarget` parsed from `scheme://host:port`, and
//!   `TlsConfig`.
//! - **Metrics**: `RelayMetrics`, atomic counters mirrored into the `metrics`
//!   facade.
//!
//! ## Example
//!
//! ```
//! use cotrelay_core::config::RelayConfig;
//! use cotrelay_core::types::Protocol;
//!
//! let config = RelayConfig::default();
//! config.validate().unwrap();
//! assert_eq!(config.target().unwrap().protocol, Protocol::Tcp);
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

pub use config::RelayConfig;
pub use error::{ConfigError, RelayError, Result};
pub use metrics::{DropStage, MetricsSnapshot, RelayMetrics};
pub use types::{EgressTarget, Protocol, TlsConfig};
