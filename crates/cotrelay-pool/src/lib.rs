//! Relay ingress and processing pipeline
//!
//! Receives GPGGA sentences over UDP, tracks the reporting devices, and
//! hands converted CoT events to the egress transport.
//!
//! # Architecture
//!
//! ```text
//!      UDP datagrams
//!            │
//!  ┌─────────▼──────────┐
//!  │  IngressListener   │
//!  │  (ingress.rs)      │
//!  │  - One recv task   │
//!  │  - try_send, drop  │
//!  │    when full       │
//!  └─────────┬──────────┘
//!            │ flume bounded queue
//!  ┌─────────▼──────────┐      ┌──────────────────┐
//!  │  Worker pool       │      │  DeviceTracker   │
//!  │  RelayPipeline     ├─────►│  (tracker.rs)    │
//!  │  (pipeline.rs)     │      │  - DashMap       │
//!  │  - parse           │      │  - stale sweep   │
//!  │  - track           │      └──────────────────┘
//!  │  - convert         │
//!  └─────────┬──────────┘
//!            │ EventSink
//!  ┌─────────▼──────────┐      ┌──────────────────┐
//!  │  EgressTransport   │      │  Stats reporter  │
//!  │  (cotrelay-client) │      │  (stats.rs)      │
//!  └────────────────────┘      └──────────────────┘
//! ```
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use cotrelay_client::{ClientConfig, EgressTransport};
//! use cotrelay_core::{config::RelayConfig, metrics::RelayMetrics};
//! use cotrelay_cot::{CotConverter, CotSettings};
//! use cotrelay_pool::{DeviceTracker, IngressConfig, IngressListener, RelayPipeline};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RelayConfig::default();
//!     let metrics = Arc::new(RelayMetrics::new());
//!     let tracker = Arc::new(DeviceTracker::new(config.cot.stale_window()));
//!
//!     let egress = Arc::new(EgressTransport::start(
//!         ClientConfig::from_relay_config(&config)?,
//!         metrics.clone(),
//!     )?);
//!
//!     let pipeline = Arc::new(RelayPipeline::new(
//!         tracker,
//!         CotConverter::new(CotSettings::from(&config.cot)),
//!         egress.clone(),
//!         metrics,
//!     ));
//!
//!     let listener = IngressListener::bind(IngressConfig::from_relay_config(&config))?;
//!     listener.run(pipeline, CancellationToken::new()).await;
//!
//!     egress.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod ingress;
pub mod pipeline;
pub mod stats;
pub mod tracker;

pub use error::{IngressError, TrackerError};
pub use ingress::{InboundDatagram, IngressConfig, IngressListener};
pub use pipeline::{EventSink, ProcessOutcome, RelayPipeline};
pub use stats::{parse_error_rate, spawn_stats_reporter, ConnectionSource};
pub use tracker::{DeviceState, DeviceTracker};
