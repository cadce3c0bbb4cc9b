//! Per-datagram processing: parse, track, convert, hand to egress

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cotrelay_client::{EgressTransport, SendOutcome};
use cotrelay_core::metrics::RelayMetrics;
use cotrelay_cot::{CotConverter, Event};
use cotrelay_nmea::{parse_sentence, SentenceErrorKind};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::tracker::DeviceTracker;

/// Destination for converted events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, event: Event) -> SendOutcome;
}

#[async_trait]
impl EventSink for EgressTransport {
    async fn send(&self, event: Event) -> SendOutcome {
        EgressTransport::send(self, event).await
    }
}

/// What happened to one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Converted and accepted by the egress buffer
    Forwarded,
    /// Converted but dropped by the egress buffer
    Dropped,
    /// Rejected by the sentence parser
    Rejected(SentenceErrorKind),
}

/// Shared pipeline run by every ingress worker.
pub struct RelayPipeline {
    tracker: Arc<DeviceTracker>,
    converter: CotConverter,
    sink: Arc<dyn EventSink>,
    metrics: Arc<RelayMetrics>,
}

impl RelayPipeline {
    pub fn new(
        tracker: Arc<DeviceTracker>,
        converter: CotConverter,
        sink: Arc<dyn EventSink>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            tracker,
            converter,
            sink,
            metrics,
        }
    }

    pub fn tracker(&self) -> &Arc<DeviceTracker> {
        &self.tracker
    }

    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    /// Processes a datagram that arrived now.
    pub async fn process(&self, data: &[u8], source: SocketAddr) -> ProcessOutcome {
        self.process_at(data, source, Utc::now()).await
    }

    /// Processes a datagram that arrived at `received_at`. The arrival time
    /// orders tracker updates and stamps the CoT event.
    pub async fn process_at(
        &self,
        data: &[u8],
        source: SocketAddr,
        received_at: DateTime<Utc>,
    ) -> ProcessOutcome {
        let report = match parse_sentence(data) {
            Ok(report) => report,
            Err(e) => {
                let kind = e.kind();
                self.metrics.record_parse_error(kind.label());
                debug!(
                    source = %source,
                    kind = kind.label(),
                    error = %e,
                    "Discarding invalid sentence"
                );
                return ProcessOutcome::Rejected(kind);
            }
        };
        self.metrics.record_parsed();

        let state = self.tracker.update_at(&report, received_at);
        trace!(
            device_id = %state.device_id,
            update_count = state.update_count,
            source = %source,
            "Device updated"
        );

        let event = self.converter.convert_at(&report, received_at);
        self.metrics.record_conversion();

        match self.sink.send(event).await {
            SendOutcome::Queued => ProcessOutcome::Forwarded,
            SendOutcome::Dropped => ProcessOutcome::Dropped,
        }
    }
}
