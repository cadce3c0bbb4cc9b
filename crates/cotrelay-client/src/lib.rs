//! # cotrelay-client
//!
//! Egress transport that carries CoT events to a TAK server over a
//! long-lived link:
//!
//! - **TCP**: newline-delimited XML documents
//! - **TLS**: the same framing over rustls with client certificate
//!   authentication
//! - **UDP**: one document per datagram
//!
//! ## Features
//!
//! - One owner task per link running the connection state machine
//! - Auto-reconnect with exponential backoff
//! - Bounded buffer with a drop-newest or bounded-blocking overflow policy
//! - Ordered, write-confirmed delivery within a connection
//! - Draining shutdown with a grace period
//!
//! ## Example
//!
//! ```rust,no_run
//! use cotrelay_client::{ClientConfig, EgressTransport};
//! use cotrelay_core::RelayMetrics;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("tcp://127.0.0.1:8087".parse()?);
//!     let transport = EgressTransport::start(config, Arc::new(RelayMetrics::new()))?;
//!
//!     // transport.send(event).await ...
//!
//!     transport.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod client;
pub mod egress;
pub mod error;
mod link;
pub mod state;
pub mod tcp;
pub mod tls;
pub mod udp;

// Re-export commonly used types
pub use buffer::EventBuffer;
pub use client::{calculate_backoff, ClientConfig, OverflowPolicy, ReconnectConfig, SendOutcome};
pub use egress::EgressTransport;
pub use error::TransportError;
pub use state::{ConnectionSnapshot, ConnectionState, ConnectionStatus};
