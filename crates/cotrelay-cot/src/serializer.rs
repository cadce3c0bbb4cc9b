//! XML serialization for CoT messages
//!
//! Timestamps are ISO-8601 UTC with seconds precision, latitude and
//! longitude carry seven decimals, heights and errors one.

use crate::event::{Contact, DeviceInfo, Detail, Event, GpsStatus, PrecisionLocation, Track};
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::escape::escape;
use std::borrow::Cow;
use std::fmt::Write;

/// Serialize an Event to XML string
pub fn serialize_event(event: &Event) -> String {
    let mut xml = String::with_capacity(768);

    let _ = write!(xml, r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);

    let _ = write!(
        xml,
        r#"<event version="{}" uid="{}" type="{}" time="{}" start="{}" stale="{}" how="{}">"#,
        text(&event.version),
        text(&event.uid),
        text(&event.event_type),
        format_timestamp(&event.time),
        format_timestamp(&event.start),
        format_timestamp(&event.stale),
        text(&event.how)
    );

    let _ = write!(
        xml,
        r#"<point lat="{:.7}" lon="{:.7}" hae="{:.1}" ce="{:.1}" le="{:.1}"/>"#,
        event.point.lat, event.point.lon, event.point.hae, event.point.ce, event.point.le
    );

    if let Some(ref detail) = event.detail {
        xml.push_str("<detail>");
        serialize_detail(&mut xml, detail);
        xml.push_str("</detail>");
    }

    xml.push_str("</event>");
    xml
}

/// Formats a timestamp as `2024-01-15T10:30:00Z`.
pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Escapes markup and keeps the document on a single line. Tab, CR and LF
/// become character references; other control characters are not legal
/// XML 1.0 and are dropped.
fn text(value: &str) -> Cow<'_, str> {
    let escaped = escape(value);
    if !escaped.chars().any(char::is_control) {
        return escaped;
    }

    let mut cleaned = String::with_capacity(escaped.len() + 8);
    for c in escaped.chars() {
        match c {
            '\t' => cleaned.push_str("&#9;"),
            '\n' => cleaned.push_str("&#10;"),
            '\r' => cleaned.push_str("&#13;"),
            c if c.is_control() => {}
            c => cleaned.push(c),
        }
    }
    Cow::Owned(cleaned)
}

fn serialize_detail(xml: &mut String, detail: &Detail) {
    if let Some(ref contact) = detail.contact {
        serialize_contact(xml, contact);
    }

    if let Some(ref precision_location) = detail.precision_location {
        serialize_precision_location(xml, precision_location);
    }

    if let Some(ref track) = detail.track {
        serialize_track(xml, track);
    }

    if let Some(ref gps) = detail.gps {
        serialize_gps(xml, gps);
    }

    if let Some(ref device) = detail.device {
        serialize_device(xml, device);
    }

    if let Some(ref remarks) = detail.remarks {
        let _ = write!(xml, "<remarks>{}</remarks>", text(&remarks));
    }
}

fn serialize_contact(xml: &mut String, contact: &Contact) {
    let _ = write!(xml, r#"<contact callsign="{}""#, text(&contact.callsign));
    if let Some(ref endpoint) = contact.endpoint {
        let _ = write!(xml, r#" endpoint="{}""#, text(&endpoint));
    }
    xml.push_str("/>");
}

fn serialize_precision_location(xml: &mut String, pl: &PrecisionLocation) {
    let _ = write!(
        xml,
        r#"<precisionlocation geopointsrc="{}" altsrc="{}"/>"#,
        text(&pl.geopointsrc),
        text(&pl.altsrc)
    );
}

fn serialize_track(xml: &mut String, track: &Track) {
    let _ = write!(
        xml,
        r#"<track course="{:.1}" speed="{:.1}"/>"#,
        track.course, track.speed
    );
}

fn serialize_gps(xml: &mut String, gps: &GpsStatus) {
    let _ = write!(
        xml,
        r#"<__gps numSats="{}" hdop="{}" fixQuality="{}" fixQualityDesc="{}"/>"#,
        gps.num_sats,
        gps.hdop,
        gps.fix_quality,
        text(&gps.fix_quality_desc)
    );
}

fn serialize_device(xml: &mut String, device: &DeviceInfo) {
    let _ = write!(
        xml,
        r#"<__device uid="{}" type="{}"/>"#,
        text(&device.uid),
        text(&device.device_type)
    );
}
