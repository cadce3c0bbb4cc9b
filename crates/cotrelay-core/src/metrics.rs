//! Relay metrics
//!
//! Every pipeline stage records into one shared [`RelayMetrics`]. Each
//! mutation updates a local atomic, which [`RelayMetrics::snapshot`] reads
//! back, and forwards to the `metrics` facade so an installed exporter
//! (Prometheus in the binary) can render it.

use metrics::{counter, describe_counter, describe_gauge, gauge};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Parse failure labels, matching `parse_errors_total{kind}`.
pub const PARSE_ERROR_KINDS: [&str; 4] = [
    "malformed_structure",
    "checksum_mismatch",
    "field_range",
    "empty_device_id",
];

/// Stage at which a message was dropped, used as the `stage` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropStage {
    /// Ingress queue was full
    Ingress,
    /// Egress buffer was full
    EgressBuffer,
    /// Left in the egress buffer when the transport closed
    Shutdown,
}

impl DropStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropStage::Ingress => "ingress",
            DropStage::EgressBuffer => "egress_buffer",
            DropStage::Shutdown => "shutdown",
        }
    }
}

/// Shared metrics sink for the relay.
#[derive(Debug)]
pub struct RelayMetrics {
    messages_received: AtomicU64,
    messages_parsed: AtomicU64,
    parse_errors: [AtomicU64; 4],
    conversions: AtomicU64,
    messages_sent: AtomicU64,
    send_failures: AtomicU64,
    dropped_ingress: AtomicU64,
    dropped_egress: AtomicU64,
    dropped_shutdown: AtomicU64,
    connection_attempts: AtomicU64,
    active_devices: AtomicU64,
    connected: AtomicU64,
    connection_state: AtomicI64,
    backoff_millis: AtomicU64,
    buffered_events: AtomicU64,
}

impl RelayMetrics {
    pub fn new() -> Self {
        describe_counter!("messages_received_total", "Datagrams received on the UDP listener");
        describe_counter!("messages_parsed_total", "Sentences that parsed and validated");
        describe_counter!("parse_errors_total", "Rejected sentences by failure kind");
        describe_counter!("conversions_total", "Position reports converted to CoT events");
        describe_counter!("messages_sent_total", "CoT events written to the egress link");
        describe_counter!("send_failures_total", "Failed egress writes");
        describe_counter!("messages_dropped_total", "Messages discarded by stage");
        describe_counter!("connection_attempts_total", "Egress connection attempts");
        describe_gauge!("active_devices_count", "Devices updated within the stale window");
        describe_gauge!("connection_status", "1 when the egress link is connected");
        describe_gauge!(
            "connection_state",
            "Egress state (0 disconnected, 1 connecting, 2 connected, 3 draining, 4 closed)"
        );
        describe_gauge!("backoff_seconds", "Current egress reconnection backoff");
        describe_gauge!("egress_buffered_events", "Events waiting in the egress buffer");

        Self {
            messages_received: AtomicU64::new(0),
            messages_parsed: AtomicU64::new(0),
            parse_errors: Default::default(),
            conversions: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            dropped_ingress: AtomicU64::new(0),
            dropped_egress: AtomicU64::new(0),
            dropped_shutdown: AtomicU64::new(0),
            connection_attempts: AtomicU64::new(0),
            active_devices: AtomicU64::new(0),
            connected: AtomicU64::new(0),
            connection_state: AtomicI64::new(0),
            backoff_millis: AtomicU64::new(0),
            buffered_events: AtomicU64::new(0),
        }
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        counter!("messages_received_total").increment(1);
    }

    pub fn record_parsed(&self) {
        self.messages_parsed.fetch_add(1, Ordering::Relaxed);
        counter!("messages_parsed_total").increment(1);
    }

    /// Records a parse failure. Unknown labels are folded into
    /// `malformed_structure`.
    pub fn record_parse_error(&self, kind: &'static str) {
        let index = PARSE_ERROR_KINDS
            .iter()
            .position(|k| *k == kind)
            .unwrap_or(0);
        self.parse_errors[index].fetch_add(1, Ordering::Relaxed);
        counter!("parse_errors_total", "kind" => PARSE_ERROR_KINDS[index]).increment(1);
    }

    pub fn record_conversion(&self) {
        self.conversions.fetch_add(1, Ordering::Relaxed);
        counter!("conversions_total").increment(1);
    }

    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        counter!("messages_sent_total").increment(1);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
        counter!("send_failures_total").increment(1);
    }

    pub fn record_dropped(&self, stage: DropStage, count: u64) {
        let slot = match stage {
            DropStage::Ingress => &self.dropped_ingress,
            DropStage::EgressBuffer => &self.dropped_egress,
            DropStage::Shutdown => &self.dropped_shutdown,
        };
        slot.fetch_add(count, Ordering::Relaxed);
        counter!("messages_dropped_total", "stage" => stage.as_str()).increment(count);
    }

    pub fn record_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
        counter!("connection_attempts_total").increment(1);
    }

    pub fn set_active_devices(&self, count: usize) {
        self.active_devices.store(count as u64, Ordering::Relaxed);
        gauge!("active_devices_count").set(count as f64);
    }

    /// Publishes the egress state as a numeric code and the derived
    /// connected flag.
    pub fn set_connection_state(&self, code: i64, connected: bool) {
        self.connection_state.store(code, Ordering::Relaxed);
        self.connected.store(connected as u64, Ordering::Relaxed);
        gauge!("connection_state").set(code as f64);
        gauge!("connection_status").set(if connected { 1.0 } else { 0.0 });
    }

    pub fn set_backoff(&self, backoff: std::time::Duration) {
        self.backoff_millis
            .store(backoff.as_millis() as u64, Ordering::Relaxed);
        gauge!("backoff_seconds").set(backoff.as_secs_f64());
    }

    pub fn set_buffered_events(&self, count: usize) {
        self.buffered_events.store(count as u64, Ordering::Relaxed);
        gauge!("egress_buffered_events").set(count as f64);
    }

    pub fn parse_errors(&self, kind: &str) -> u64 {
        PARSE_ERROR_KINDS
            .iter()
            .position(|k| *k == kind)
            .map(|i| self.parse_errors[i].load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn dropped(&self, stage: DropStage) -> u64 {
        match stage {
            DropStage::Ingress => self.dropped_ingress.load(Ordering::Relaxed),
            DropStage::EgressBuffer => self.dropped_egress.load(Ordering::Relaxed),
            DropStage::Shutdown => self.dropped_shutdown.load(Ordering::Relaxed),
        }
    }

    /// Reads every counter and gauge into a plain struct.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_parsed: self.messages_parsed.load(Ordering::Relaxed),
            parse_errors: self
                .parse_errors
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .sum(),
            conversions: self.conversions.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            messages_dropped: self.dropped_ingress.load(Ordering::Relaxed)
                + self.dropped_egress.load(Ordering::Relaxed)
                + self.dropped_shutdown.load(Ordering::Relaxed),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            active_devices: self.active_devices.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed) == 1,
            backoff_seconds: self.backoff_millis.load(Ordering::Relaxed) as f64 / 1000.0,
            buffered_events: self.buffered_events.load(Ordering::Relaxed),
        }
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`RelayMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub messages_parsed: u64,
    pub parse_errors: u64,
    pub conversions: u64,
    pub messages_sent: u64,
    pub send_failures: u64,
    pub messages_dropped: u64,
    pub connection_attempts: u64,
    pub active_devices: u64,
    pub connected: bool,
    pub backoff_seconds: f64,
    pub buffered_events: u64,
}
