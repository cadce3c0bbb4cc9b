//! CoT Event structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// CoT value for an unknown circular or linear error.
pub const UNKNOWN_ERROR: f64 = 9999999.0;

/// CoT Event represents a Cursor on Target message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// CoT version (always "2.0" here)
    pub version: String,
    /// Unique identifier for the tracked entity
    pub uid: String,
    /// CoT type (e.g., "a-f-G-U-C" for a friendly ground unit)
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event timestamp
    pub time: DateTime<Utc>,
    /// Event start time
    pub start: DateTime<Utc>,
    /// Event stale time (when the event becomes invalid)
    pub stale: DateTime<Utc>,
    /// How the position was obtained (e.g., "h-gps")
    pub how: String,
    /// Geographic location and accuracy
    pub point: Point,
    /// Optional structured detail section
    pub detail: Option<Detail>,
}

/// Geographic point with accuracy metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Latitude in decimal degrees (-90 to 90)
    pub lat: f64,
    /// Longitude in decimal degrees (-180 to 180)
    pub lon: f64,
    /// Height in meters
    pub hae: f64,
    /// Circular error in meters (95% confidence)
    pub ce: f64,
    /// Linear error in meters (95% confidence)
    pub le: f64,
}

impl Point {
    /// Create a new Point with unknown accuracy
    pub fn new(lat: f64, lon: f64, hae: f64) -> Self {
        Self {
            lat,
            lon,
            hae,
            ce: UNKNOWN_ERROR,
            le: UNKNOWN_ERROR,
        }
    }

    /// Create a new Point with specified accuracy
    pub fn with_accuracy(lat: f64, lon: f64, hae: f64, ce: f64, le: f64) -> Self {
        Self {
            lat,
            lon,
            hae,
            ce,
            le,
        }
    }
}

/// Detail section with structured fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Detail {
    /// Contact information
    pub contact: Option<Contact>,
    /// Precision location source
    pub precision_location: Option<PrecisionLocation>,
    /// Track information
    pub track: Option<Track>,
    /// GPS receiver status (`__gps`)
    pub gps: Option<GpsStatus>,
    /// Reporting device (`__device`)
    pub device: Option<DeviceInfo>,
    /// Free text remarks
    pub remarks: Option<String>,
}

impl Detail {
    /// Create a new empty Detail
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the detail is empty
    pub fn is_empty(&self) -> bool {
        self.contact.is_none()
            && self.precision_location.is_none()
            && self.track.is_none()
            && self.gps.is_none()
            && self.device.is_none()
            && self.remarks.is_none()
    }
}

/// Contact information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Optional endpoint for communication
    pub endpoint: Option<String>,
    /// Callsign for display
    pub callsign: String,
}

/// Track information for moving entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Speed in meters per second
    pub speed: f64,
    /// Course/heading in degrees (0-360)
    pub course: f64,
}

/// Precision location source information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecisionLocation {
    /// Geopoint source (e.g., "GPS", "USER")
    pub geopointsrc: String,
    /// Altitude source (e.g., "GPS", "DTED")
    pub altsrc: String,
}

/// GPS receiver status carried alongside the fix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsStatus {
    pub num_sats: u8,
    pub hdop: f64,
    /// Numeric GGA fix quality (0-8)
    pub fix_quality: u8,
    pub fix_quality_desc: String,
}

/// Identity of the reporting hardware
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub uid: String,
    pub device_type: String,
}

impl Event {
    /// Get the callsign from the contact detail, if present
    pub fn callsign(&self) -> Option<&str> {
        self.detail
            .as_ref()
            .and_then(|d| d.contact.as_ref())
            .map(|c| c.callsign.as_str())
    }

    /// Get the GPS status detail, if present
    pub fn gps(&self) -> Option<&GpsStatus> {
        self.detail.as_ref().and_then(|d| d.gps.as_ref())
    }

    /// Seconds between `time` and `stale`
    pub fn stale_after_secs(&self) -> i64 {
        (self.stale - self.time).num_seconds()
    }

    /// True once `now` has passed the stale time
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        now > self.stale
    }
}
