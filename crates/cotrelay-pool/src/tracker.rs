//! Device Tracker
//!
//! Keeps the latest position report per device id. Entries are created on
//! first sighting and never removed; staleness is computed when read.

use chrono::{DateTime, Duration, Utc};
use cotrelay_core::metrics::RelayMetrics;
use cotrelay_nmea::PositionReport;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::TrackerError;

/// Per-device state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceState {
    pub device_id: String,
    pub last_report: PositionReport,
    /// Arrival time of `last_report`
    pub last_update: DateTime<Utc>,
    /// Reports applied so far, starting at 1
    pub update_count: u64,
    pub first_seen: DateTime<Utc>,
}

impl DeviceState {
    fn new(report: &PositionReport, now: DateTime<Utc>) -> Self {
        Self {
            device_id: report.device_id.clone(),
            last_report: report.clone(),
            last_update: now,
            update_count: 1,
            first_seen: now,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_update
    }

    /// Stale once strictly more than `window` has passed.
    pub fn is_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.age(now) > window
    }
}

/// Concurrent per-device registry.
///
/// Updates to one id serialize on its shard lock; different ids rarely
/// contend.
#[derive(Debug)]
pub struct DeviceTracker {
    devices: DashMap<String, DeviceState>,
    stale_window: Duration,
}

impl DeviceTracker {
    pub fn new(stale_window: std::time::Duration) -> Self {
        Self {
            devices: DashMap::new(),
            stale_window: Duration::from_std(stale_window).unwrap_or(Duration::MAX),
        }
    }

    pub fn stale_window(&self) -> Duration {
        self.stale_window
    }

    /// Records a report arriving now.
    pub fn update(&self, report: &PositionReport) -> DeviceState {
        self.update_at(report, Utc::now())
    }

    /// Records a report that arrived at `now`.
    ///
    /// A report that arrived before the one already stored (workers can
    /// finish out of order) is counted but does not replace it.
    pub fn update_at(&self, report: &PositionReport, now: DateTime<Utc>) -> DeviceState {
        let mut created = false;
        let state = self
            .devices
            .entry(report.device_id.clone())
            .and_modify(|state| {
                state.update_count += 1;
                if now >= state.last_update {
                    state.last_report = report.clone();
                    state.last_update = now;
                }
            })
            .or_insert_with(|| {
                created = true;
                DeviceState::new(report, now)
            })
            .value()
            .clone();

        if created {
            info!(device_id = %state.device_id, "New device detected");
        }

        state
    }

    /// Returns a copy of the device's state.
    pub fn snapshot(&self, device_id: &str) -> Result<DeviceState, TrackerError> {
        self.devices
            .get(device_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TrackerError::NotFound(device_id.to_string()))
    }

    /// Devices updated within the stale window.
    pub fn all_active(&self, now: DateTime<Utc>) -> Vec<DeviceState> {
        self.devices
            .iter()
            .filter(|entry| !entry.is_stale(now, self.stale_window))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Devices ever seen.
    pub fn count(&self) -> usize {
        self.devices.len()
    }

    pub fn active_count(&self, now: DateTime<Utc>) -> usize {
        self.devices
            .iter()
            .filter(|entry| !entry.is_stale(now, self.stale_window))
            .count()
    }

    fn active_ids(&self, now: DateTime<Utc>) -> HashSet<String> {
        self.devices
            .iter()
            .filter(|entry| !entry.is_stale(now, self.stale_window))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Spawns the background staleness sweep.
    ///
    /// Every `interval` it publishes the active count and logs devices that
    /// went stale since the previous sweep. Nothing is deleted.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: std::time::Duration,
        metrics: Arc<RelayMetrics>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let tracker = Arc::clone(self);

        tokio::spawn(async move {
            debug!("Device sweeper started");
            let mut ticker = tokio::time::interval(interval);
            let mut previously_active = HashSet::new();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let active = tracker.active_ids(Utc::now());
                for device_id in previously_active.difference(&active) {
                    info!(device_id = %device_id, "Device went stale");
                }
                metrics.set_active_devices(active.len());
                previously_active = active;
            }

            debug!("Device sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use cotrelay_nmea::parse_str;

    const EXAMPLE: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,TEST001*60";

    fn report_for(device_id: &str) -> PositionReport {
        let mut report = parse_str(EXAMPLE).unwrap();
        report.device_id = device_id.to_string();
        report
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
    }

    fn tracker() -> DeviceTracker {
        DeviceTracker::new(std::time::Duration::from_secs(300))
    }

    #[test]
    fn test_first_sighting_creates_state() {
        let tracker = tracker();
        let state = tracker.update_at(&report_for("TEST001"), t0());

        assert_eq!(state.device_id, "TEST001");
        assert_eq!(state.update_count, 1);
        assert_eq!(state.first_seen, t0());
        assert_eq!(state.last_update, t0());
        assert_eq!(tracker.count(), 1);
    }

    #[test]
    fn test_updates_replace_last_report() {
        let tracker = tracker();
        tracker.update_at(&report_for("TEST001"), t0());

        let mut moved = report_for("TEST001");
        moved.latitude = 10.0;
        let later = t0() + Duration::seconds(5);
        let state = tracker.update_at(&moved, later);

        assert_eq!(state.update_count, 2);
        assert_eq!(state.first_seen, t0());
        assert_eq!(state.last_update, later);
        assert_eq!(state.last_report.latitude, 10.0);
    }

    #[test]
    fn test_older_arrival_does_not_overwrite() {
        let tracker = tracker();
        let mut newer = report_for("TEST001");
        newer.latitude = 20.0;
        tracker.update_at(&newer, t0() + Duration::seconds(10));

        let state = tracker.update_at(&report_for("TEST001"), t0());
        assert_eq!(state.update_count, 2);
        assert_eq!(state.last_report.latitude, 20.0);
        assert_eq!(state.last_update, t0() + Duration::seconds(10));
    }

    #[test]
    fn test_ids_are_case_sensitive() {
        let tracker = tracker();
        tracker.update_at(&report_for("dev"), t0());
        tracker.update_at(&report_for("DEV"), t0());
        assert_eq!(tracker.count(), 2);
    }

    #[test]
    fn test_snapshot_unknown_device() {
        let tracker = tracker();
        assert_eq!(
            tracker.snapshot("missing"),
            Err(TrackerError::NotFound("missing".to_string()))
        );

        tracker.update_at(&report_for("TEST001"), t0());
        assert_eq!(tracker.snapshot("TEST001").unwrap().update_count, 1);
    }

    #[test]
    fn test_staleness_boundary() {
        let tracker = tracker();
        tracker.update_at(&report_for("A"), t0());
        tracker.update_at(&report_for("B"), t0() + Duration::seconds(200));

        let at_window = t0() + Duration::seconds(300);
        assert_eq!(tracker.active_count(at_window), 2);

        let past_window = t0() + Duration::seconds(301);
        let active = tracker.all_active(past_window);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].device_id, "B");

        // Stale devices are kept
        assert_eq!(tracker.count(), 2);
        assert!(tracker.snapshot("A").is_ok());
    }

    #[test]
    fn test_concurrent_updates_keep_latest_report() {
        const THREADS: u64 = 8;
        const ROUNDS: u64 = 250;

        let sequenced = |device_id: &str, seq: u64| {
            let mut report = report_for(device_id);
            report.latitude = seq as f64 / 100.0;
            (report, t0() + Duration::milliseconds(seq as i64))
        };

        let tracker = Arc::new(tracker());
        let handles: Vec<_> = (0..THREADS)
            .map(|thread| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    let own = format!("dev-{}", thread);
                    for round in 0..ROUNDS {
                        let (report, at) = sequenced(&own, round);
                        tracker.update_at(&report, at);

                        // Shared sequence numbers are unique across threads
                        let (report, at) = sequenced("shared", round * THREADS + thread);
                        tracker.update_at(&report, at);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.count(), THREADS as usize + 1);

        let last = THREADS * ROUNDS - 1;
        let shared = tracker.snapshot("shared").unwrap();
        assert_eq!(shared.update_count, THREADS * ROUNDS);
        assert_eq!(shared.last_update, t0() + Duration::milliseconds(last as i64));
        assert_eq!(shared.last_report.latitude, last as f64 / 100.0);

        for thread in 0..THREADS {
            let state = tracker.snapshot(&format!("dev-{}", thread)).unwrap();
            assert_eq!(state.update_count, ROUNDS);
            assert_eq!(state.first_seen, t0());
            assert_eq!(state.last_update, t0() + Duration::milliseconds(ROUNDS as i64 - 1));
            assert_eq!(state.last_report.latitude, (ROUNDS - 1) as f64 / 100.0);
            assert_eq!(state.last_report.device_id, format!("dev-{}", thread));
        }
    }

    #[tokio::test]
    async fn test_sweeper_publishes_active_count() {
        let tracker = Arc::new(tracker());
        tracker.update(&report_for("A"));
        tracker.update(&report_for("B"));

        let metrics = Arc::new(RelayMetrics::new());
        let cancel = CancellationToken::new();
        let handle = tracker.spawn_sweeper(
            std::time::Duration::from_millis(10),
            metrics.clone(),
            cancel.clone(),
        );

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(metrics.snapshot().active_devices, 2);

        cancel.cancel();
        handle.await.unwrap();
    }
}
