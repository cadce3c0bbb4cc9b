//! Reader for the CoT XML this crate emits
//!
//! Used to check documents on the receiving side of a link. Only the
//! elements produced by the serializer are recognized; anything else inside
//! `<detail>` is skipped.

use crate::event::{Contact, DeviceInfo, Detail, Event, GpsStatus, Point, PrecisionLocation, Track, UNKNOWN_ERROR};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::Reader;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("XML parsing error: {0}")]
    XmlError(#[from] quick_xml::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid datetime format: {0}")]
    InvalidDateTime(String),

    #[error("Invalid number format: {0}")]
    InvalidNumber(String),
}

/// Parse a CoT message from an XML string
pub fn parse_cot(xml: &str) -> Result<Event, ParseError> {
    parse_cot_bytes(xml.as_bytes())
}

/// Parse a CoT message from XML bytes
pub fn parse_cot_bytes(xml: &[u8]) -> Result<Event, ParseError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();

    let mut version = None;
    let mut uid = None;
    let mut event_type = None;
    let mut time = None;
    let mut start = None;
    let mut stale = None;
    let mut how = None;
    let mut point = None;
    let mut detail: Option<Detail> = None;
    let mut in_remarks = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            XmlEvent::Start(e) | XmlEvent::Empty(e) => match e.name().as_ref() {
                b"event" => {
                    for (key, value) in attributes(&e)? {
                        match key.as_str() {
                            "version" => version = Some(value),
                            "uid" => uid = Some(value),
                            "type" => event_type = Some(value),
                            "time" => time = Some(parse_datetime(&value)?),
                            "start" => start = Some(parse_datetime(&value)?),
                            "stale" => stale = Some(parse_datetime(&value)?),
                            "how" => how = Some(value),
                            _ => {}
                        }
                    }
                }
                b"point" => point = Some(parse_point(&e)?),
                b"detail" => detail = Some(Detail::default()),
                b"contact" => {
                    let attrs = attributes(&e)?;
                    detail.get_or_insert_with(Detail::default).contact = Some(Contact {
                        callsign: required(&attrs, "callsign")?,
                        endpoint: optional(&attrs, "endpoint"),
                    });
                }
                b"precisionlocation" => {
                    let attrs = attributes(&e)?;
                    detail.get_or_insert_with(Detail::default).precision_location =
                        Some(PrecisionLocation {
                            geopointsrc: required(&attrs, "geopointsrc")?,
                            altsrc: required(&attrs, "altsrc")?,
                        });
                }
                b"track" => {
                    let attrs = attributes(&e)?;
                    detail.get_or_insert_with(Detail::default).track = Some(Track {
                        speed: parse_f64(&required(&attrs, "speed")?)?,
                        course: parse_f64(&required(&attrs, "course")?)?,
                    });
                }
                b"__gps" => {
                    let attrs = attributes(&e)?;
                    let num_sats = required(&attrs, "numSats")?;
                    let fix_quality = required(&attrs, "fixQuality")?;
                    detail.get_or_insert_with(Detail::default).gps = Some(GpsStatus {
                        num_sats: num_sats
                            .parse()
                            .map_err(|_| ParseError::InvalidNumber(num_sats.clone()))?,
                        hdop: parse_f64(&required(&attrs, "hdop")?)?,
                        fix_quality: fix_quality
                            .parse()
                            .map_err(|_| ParseError::InvalidNumber(fix_quality.clone()))?,
                        fix_quality_desc: optional(&attrs, "fixQualityDesc").unwrap_or_default(),
                    });
                }
                b"__device" => {
                    let attrs = attributes(&e)?;
                    detail.get_or_insert_with(Detail::default).device = Some(DeviceInfo {
                        uid: required(&attrs, "uid")?,
                        device_type: optional(&attrs, "type").unwrap_or_default(),
                    });
                }
                b"remarks" => {
                    in_remarks = true;
                    detail.get_or_insert_with(Detail::default).remarks = Some(String::new());
                }
                _ => {}
            },
            XmlEvent::Text(text) if in_remarks => {
                let text = text.unescape()?.into_owned();
                if let Some(remarks) = detail.as_mut().and_then(|d| d.remarks.as_mut()) {
                    remarks.push_str(&text);
                }
            }
            XmlEvent::End(e) if e.name().as_ref() == b"remarks" => in_remarks = false,
            XmlEvent::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(Event {
        version: version.ok_or_else(|| ParseError::MissingField("version".into()))?,
        uid: uid.ok_or_else(|| ParseError::MissingField("uid".into()))?,
        event_type: event_type.ok_or_else(|| ParseError::MissingField("type".into()))?,
        time: time.ok_or_else(|| ParseError::MissingField("time".into()))?,
        start: start.ok_or_else(|| ParseError::MissingField("start".into()))?,
        stale: stale.ok_or_else(|| ParseError::MissingField("stale".into()))?,
        how: how.ok_or_else(|| ParseError::MissingField("how".into()))?,
        point: point.ok_or_else(|| ParseError::MissingField("point".into()))?,
        detail,
    })
}

fn attributes(element: &BytesStart) -> Result<Vec<(String, String)>, ParseError> {
    element
        .attributes()
        .map(|attr| {
            let attr = attr.map_err(|e| ParseError::XmlError(quick_xml::Error::InvalidAttr(e)))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            Ok((key, value))
        })
        .collect()
}

fn optional(attrs: &[(String, String)], name: &str) -> Option<String> {
    attrs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.clone())
}

fn required(attrs: &[(String, String)], name: &str) -> Result<String, ParseError> {
    optional(attrs, name).ok_or_else(|| ParseError::MissingField(name.to_string()))
}

fn parse_point(element: &BytesStart) -> Result<Point, ParseError> {
    let attrs = attributes(element)?;
    let number = |name: &str| -> Result<Option<f64>, ParseError> {
        optional(&attrs, name).map(|v| parse_f64(&v)).transpose()
    };

    Ok(Point {
        lat: number("lat")?.ok_or_else(|| ParseError::MissingField("lat".into()))?,
        lon: number("lon")?.ok_or_else(|| ParseError::MissingField("lon".into()))?,
        hae: number("hae")?.unwrap_or(0.0),
        ce: number("ce")?.unwrap_or(UNKNOWN_ERROR),
        le: number("le")?.unwrap_or(UNKNOWN_ERROR),
    })
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, ParseError> {
    s.parse::<DateTime<Utc>>()
        .map_err(|_| ParseError::InvalidDateTime(s.to_string()))
}

fn parse_f64(s: &str) -> Result<f64, ParseError> {
    s.parse::<f64>()
        .map_err(|_| ParseError::InvalidNumber(s.to_string()))
}
