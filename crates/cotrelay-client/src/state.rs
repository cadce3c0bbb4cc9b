use cotrelay_core::metrics::RelayMetrics;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Connection state of the egress link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No link; waiting for the next attempt
    Disconnected,
    /// Connect (and TLS handshake) in progress
    Connecting,
    /// Link is up and buffered events are being written
    Connected,
    /// Shutdown requested; flushing what is buffered
    Draining,
    /// Terminal
    Closed,
}

impl ConnectionState {
    /// Numeric code published on the `connection_state` gauge.
    pub fn code(&self) -> i64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Draining => 3,
            ConnectionState::Closed => 4,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Draining => write!(f, "Draining"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Point-in-time view of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    /// Wait before the next attempt; zero while connected
    pub backoff: Duration,
    pub consecutive_failures: u32,
}

impl Default for ConnectionSnapshot {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            backoff: Duration::ZERO,
            consecutive_failures: 0,
        }
    }
}

const SNAPSHOT_CHANNEL_CAPACITY: usize = 64;

/// Shared connection status.
///
/// Written only by the egress task; every change is mirrored to the
/// metrics sink and broadcast to subscribers.
#[derive(Debug)]
pub struct ConnectionStatus {
    current: RwLock<ConnectionSnapshot>,
    updates: broadcast::Sender<ConnectionSnapshot>,
    metrics: Arc<RelayMetrics>,
}

impl ConnectionStatus {
    pub fn new(metrics: Arc<RelayMetrics>) -> Self {
        let (updates, _) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);
        let status = Self {
            current: RwLock::new(ConnectionSnapshot::default()),
            updates,
            metrics,
        };
        status.publish(ConnectionSnapshot::default());
        status
    }

    /// Get current snapshot
    pub fn snapshot(&self) -> ConnectionSnapshot {
        *self.current.read()
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.current.read().state
    }

    /// Check if currently connected
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionSnapshot> {
        self.updates.subscribe()
    }

    /// Changes the state, keeping backoff and failure count.
    pub(crate) fn set_state(&self, state: ConnectionState) {
        let snapshot = ConnectionSnapshot {
            state,
            ..self.snapshot()
        };
        self.publish(snapshot);
    }

    pub(crate) fn mark_connected(&self) {
        self.publish(ConnectionSnapshot {
            state: ConnectionState::Connected,
            backoff: Duration::ZERO,
            consecutive_failures: 0,
        });
    }

    pub(crate) fn mark_disconnected(&self, backoff: Duration, consecutive_failures: u32) {
        self.publish(ConnectionSnapshot {
            state: ConnectionState::Disconnected,
            backoff,
            consecutive_failures,
        });
    }

    fn publish(&self, snapshot: ConnectionSnapshot) {
        *self.current.write() = snapshot;
        self.metrics
            .set_connection_state(snapshot.state.code(), snapshot.state.is_connected());
        self.metrics.set_backoff(snapshot.backoff);
        // No subscribers is fine
        let _ = self.updates.send(snapshot);
    }
}
