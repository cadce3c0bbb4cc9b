//! Periodic statistics log

use chrono::Utc;
use cotrelay_client::ConnectionSnapshot;
use cotrelay_core::metrics::{MetricsSnapshot, RelayMetrics};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::tracker::DeviceTracker;

/// Source of the current egress connection state.
pub trait ConnectionSource: Send + Sync {
    fn connection(&self) -> ConnectionSnapshot;
}

impl ConnectionSource for cotrelay_client::EgressTransport {
    fn connection(&self) -> ConnectionSnapshot {
        self.snapshot()
    }
}

/// Parse errors per received datagram, 0.0 before any traffic.
pub fn parse_error_rate(snapshot: &MetricsSnapshot) -> f64 {
    snapshot.parse_errors as f64 / snapshot.messages_received.max(1) as f64
}

/// Logs a statistics line every `interval` until cancelled.
pub fn spawn_stats_reporter(
    interval: Duration,
    metrics: Arc<RelayMetrics>,
    tracker: Arc<DeviceTracker>,
    connection: Arc<dyn ConnectionSource>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let snapshot = metrics.snapshot();
            let link = connection.connection();
            info!(
                messages_received = snapshot.messages_received,
                messages_parsed = snapshot.messages_parsed,
                parse_errors = snapshot.parse_errors,
                parse_error_rate = parse_error_rate(&snapshot),
                conversions = snapshot.conversions,
                messages_sent = snapshot.messages_sent,
                send_failures = snapshot.send_failures,
                messages_dropped = snapshot.messages_dropped,
                buffered_events = snapshot.buffered_events,
                active_devices = tracker.active_count(Utc::now()),
                known_devices = tracker.count(),
                connection_state = %link.state,
                consecutive_failures = link.consecutive_failures,
                backoff_secs = link.backoff.as_secs_f64(),
                "Relay statistics"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(ConnectionSnapshot);

    impl ConnectionSource for Fixed {
        fn connection(&self) -> ConnectionSnapshot {
            self.0
        }
    }

    #[test]
    fn test_parse_error_rate() {
        let mut snapshot = MetricsSnapshot::default();
        assert_eq!(parse_error_rate(&snapshot), 0.0);

        snapshot.messages_received = 4;
        snapshot.parse_errors = 1;
        assert_eq!(parse_error_rate(&snapshot), 0.25);
    }

    #[tokio::test]
    async fn test_reporter_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let handle = spawn_stats_reporter(
            Duration::from_millis(5),
            Arc::new(RelayMetrics::new()),
            Arc::new(DeviceTracker::new(Duration::from_secs(300))),
            Arc::new(Fixed(ConnectionSnapshot::default())),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reporter stopped")
            .unwrap();
    }
}
