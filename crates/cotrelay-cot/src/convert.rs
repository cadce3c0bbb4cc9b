//! Position report to CoT event conversion
//!
//! The mapping is deterministic apart from the clock: the uid is derived
//! from the device id, `time` and `start` are the conversion instant, and
//! `stale` trails them by the configured window.

use crate::event::{Contact, DeviceInfo, Detail, Event, GpsStatus, Point, PrecisionLocation, Track};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use cotrelay_core::config::CotConfig;
use cotrelay_nmea::{FixQuality, PositionReport};
use tracing::trace;
use uuid::Uuid;

/// Prefix of every uid emitted by the relay.
pub const UID_PREFIX: &str = "GPGGA-";

/// Settings applied to every converted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CotSettings {
    /// CoT type given to every device
    pub device_type: String,
    /// Seconds from `time` to `stale`
    pub stale_seconds: u64,
}

impl CotSettings {
    pub fn new(device_type: impl Into<String>, stale_seconds: u64) -> Self {
        Self {
            device_type: device_type.into(),
            stale_seconds,
        }
    }
}

impl Default for CotSettings {
    fn default() -> Self {
        Self::from(&CotConfig::default())
    }
}

impl From<&CotConfig> for CotSettings {
    fn from(config: &CotConfig) -> Self {
        Self::new(config.device_type.trim(), config.stale_seconds)
    }
}

/// Stable CoT uid for a device: `GPGGA-` followed by a UUIDv5 (URL
/// namespace) of `gpgga-device-<id>`.
pub fn device_uid(device_id: &str) -> String {
    let name = format!("gpgga-device-{}", device_id);
    let uuid = Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes());
    format!("{}{}", UID_PREFIX, uuid)
}

/// CoT `how` value for a fix quality.
pub fn how_for(quality: FixQuality) -> &'static str {
    match quality {
        FixQuality::Invalid => "h-g-i-g-o",
        FixQuality::Gps => "h-gps",
        FixQuality::Dgps => "h-dgps",
        FixQuality::Pps => "h-pps",
        FixQuality::Rtk | FixQuality::FloatRtk => "h-rtk",
        FixQuality::Estimated => "h-e",
        FixQuality::Manual => "h-m",
        FixQuality::Simulation => "h-s",
    }
}

/// Converts position reports into CoT events.
#[derive(Debug, Clone)]
pub struct CotConverter {
    settings: CotSettings,
    stale_window: Duration,
}

impl CotConverter {
    pub fn new(settings: CotSettings) -> Self {
        // Out-of-range windows saturate instead of wrapping negative
        let stale_window = i64::try_from(settings.stale_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        Self {
            settings,
            stale_window,
        }
    }

    pub fn settings(&self) -> &CotSettings {
        &self.settings
    }

    /// Converts using the current time.
    pub fn convert(&self, report: &PositionReport) -> Event {
        self.convert_at(report, Utc::now())
    }

    /// Converts with an explicit generation time, truncated to whole
    /// seconds so the event matches its serialized form.
    pub fn convert_at(&self, report: &PositionReport, now: DateTime<Utc>) -> Event {
        let time = now.trunc_subsecs(0);
        let uid = device_uid(&report.device_id);

        trace!(
            device_id = %report.device_id,
            uid = %uid,
            lat = report.latitude,
            lon = report.longitude,
            alt = report.altitude,
            "Converted position report"
        );

        Event {
            version: "2.0".to_string(),
            uid,
            event_type: self.settings.device_type.clone(),
            time,
            start: time,
            stale: time
                .checked_add_signed(self.stale_window)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            how: how_for(report.fix_quality).to_string(),
            point: Point::new(report.latitude, report.longitude, report.altitude),
            detail: Some(build_detail(report)),
        }
    }
}

fn build_detail(report: &PositionReport) -> Detail {
    // GGA carries no velocity, so a valid fix reports a stationary track.
    let track = report.has_valid_fix().then_some(Track {
        speed: 0.0,
        course: 0.0,
    });

    let mut remarks = format!("GPGGA Device: {}", report.device_id);
    if let Some(utc) = report.utc_time {
        remarks.push_str(&format!(", GPS Time: {}", utc.format("%H:%M:%S%.f")));
    }

    Detail {
        contact: Some(Contact {
            endpoint: None,
            callsign: report.device_id.clone(),
        }),
        precision_location: Some(PrecisionLocation {
            geopointsrc: "GPS".to_string(),
            altsrc: "GPS".to_string(),
        }),
        track,
        gps: Some(GpsStatus {
            num_sats: report.satellites,
            hdop: report.hdop,
            fix_quality: report.fix_quality.code(),
            fix_quality_desc: report.fix_quality.description().to_string(),
        }),
        device: Some(DeviceInfo {
            uid: report.device_id.clone(),
            device_type: "GPS Tracker".to_string(),
        }),
        remarks: Some(remarks),
    }
}
