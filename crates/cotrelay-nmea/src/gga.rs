//! GPGGA sentence parser with a trailing device identifier.
//!
//! Wire layout, comma separated between `$` and `*`:
//!
//! ```text
//! GPGGA,time,lat,N|S,lon,E|W,fix,sats,hdop,alt,M,geoid,M,dgpsAge,deviceId
//! GPGGA,time,lat,N|S,lon,E|W,fix,sats,hdop,alt,M,geoid,M,dgpsAge,station,deviceId
//! ```
//!
//! The device identifier is always the last field before the checksum.

use crate::checksum::{calculate_checksum, parse_checksum};
use crate::error::SentenceError;
use chrono::NaiveTime;
use serde::Serialize;

const TALKER: &str = "GPGGA";
const FIELDS_WITHOUT_STATION: usize = 15;
const FIELDS_WITH_STATION: usize = 16;

/// GPS fix quality indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FixQuality {
    Invalid,
    Gps,
    Dgps,
    Pps,
    Rtk,
    FloatRtk,
    Estimated,
    Manual,
    Simulation,
}

impl FixQuality {
    /// Maps the numeric code (0..=8).
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Invalid,
            1 => Self::Gps,
            2 => Self::Dgps,
            3 => Self::Pps,
            4 => Self::Rtk,
            5 => Self::FloatRtk,
            6 => Self::Estimated,
            7 => Self::Manual,
            8 => Self::Simulation,
            _ => return None,
        })
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// True for every quality except `Invalid`.
    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Invalid)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Invalid => "Invalid",
            Self::Gps => "GPS fix",
            Self::Dgps => "DGPS fix",
            Self::Pps => "PPS fix",
            Self::Rtk => "Real Time Kinematic",
            Self::FloatRtk => "Float RTK",
            Self::Estimated => "Estimated",
            Self::Manual => "Manual input",
            Self::Simulation => "Simulation",
        }
    }
}

/// One validated position fix from a device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionReport {
    /// Opaque, case-sensitive device identifier
    pub device_id: String,
    /// UTC time of day, absent when the sentence leaves it empty
    pub utc_time: Option<NaiveTime>,
    /// Signed decimal degrees, negative south
    pub latitude: f64,
    /// Signed decimal degrees, negative west
    pub longitude: f64,
    pub fix_quality: FixQuality,
    pub satellites: u8,
    /// Horizontal dilution of precision, 0.0 when empty
    pub hdop: f64,
    /// Altitude above mean sea level in meters
    pub altitude: f64,
    /// Geoid separation in meters
    pub geoid_separation: Option<f64>,
    /// Seconds since the last DGPS update
    pub dgps_age: Option<f64>,
    pub dgps_station: Option<String>,
}

impl PositionReport {
    pub fn has_valid_fix(&self) -> bool {
        self.fix_quality.is_valid()
    }
}

/// Parses a raw datagram payload.
///
/// # Errors
///
/// Non-UTF-8 payloads are `MalformedStructure`; see [`parse_str`] for the
/// rest.
pub fn parse_sentence(bytes: &[u8]) -> Result<PositionReport, SentenceError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| SentenceError::malformed(format!("payload is not UTF-8: {}", e)))?;
    parse_str(text)
}

/// Parses one GPGGA sentence.
///
/// Surrounding whitespace (including CR/LF) is ignored. The checksum is
/// verified before any field is looked at.
pub fn parse_str(sentence: &str) -> Result<PositionReport, SentenceError> {
    let sentence = sentence.trim();

    let framed = sentence
        .strip_prefix('$')
        .ok_or_else(|| SentenceError::malformed("missing leading '$'"))?;
    let (body, transmitted) = framed
        .rsplit_once('*')
        .ok_or_else(|| SentenceError::malformed("missing '*' checksum delimiter"))?;
    let transmitted = parse_checksum(transmitted)
        .ok_or_else(|| SentenceError::malformed("checksum is not two hex digits"))?;

    let computed = calculate_checksum(body);
    if computed != transmitted {
        return Err(SentenceError::ChecksumMismatch {
            computed,
            transmitted,
        });
    }

    let fields: Vec<&str> = body.split(',').collect();
    if fields[0] != TALKER {
        return Err(SentenceError::malformed(format!(
            "unexpected sentence type '{}'",
            fields[0]
        )));
    }
    if fields.len() != FIELDS_WITHOUT_STATION && fields.len() != FIELDS_WITH_STATION {
        return Err(SentenceError::malformed(format!(
            "expected {} or {} fields, found {}",
            FIELDS_WITHOUT_STATION,
            FIELDS_WITH_STATION,
            fields.len()
        )));
    }

    let device_id = fields[fields.len() - 1].trim();
    if device_id.is_empty() {
        return Err(SentenceError::EmptyDeviceId);
    }
    if device_id.contains('$') {
        return Err(SentenceError::malformed("device identifier contains '$'"));
    }
    // The id ends up in line-framed XML; control characters would break it
    if device_id.chars().any(char::is_control) {
        return Err(SentenceError::malformed(
            "device identifier contains control characters",
        ));
    }

    let utc_time = parse_time(fields[1])?;
    let latitude = parse_coordinate(fields[2], "latitude", 90.0)?
        * hemisphere_sign(fields[3], 'N', 'S', "latitude hemisphere")?;
    let longitude = parse_coordinate(fields[4], "longitude", 180.0)?
        * hemisphere_sign(fields[5], 'E', 'W', "longitude hemisphere")?;

    let fix_code: u8 = parse_required(fields[6], "fix quality")?;
    let fix_quality = FixQuality::from_code(fix_code)
        .ok_or_else(|| SentenceError::range("fix quality", format!("{} is not in 0..=8", fix_code)))?;
    let satellites: u8 = parse_required(fields[7], "satellite count")?;

    let hdop = parse_optional_float(fields[8], "hdop")?.unwrap_or(0.0);
    if hdop < 0.0 {
        return Err(SentenceError::range("hdop", format!("{} is negative", hdop)));
    }

    let altitude = parse_optional_float(fields[9], "altitude")?
        .ok_or_else(|| SentenceError::malformed("missing altitude"))?;
    if fields[10] != "M" {
        return Err(SentenceError::malformed("altitude units must be 'M'"));
    }

    let geoid_separation = parse_optional_float(fields[11], "geoid separation")?;
    if !fields[12].is_empty() && fields[12] != "M" {
        return Err(SentenceError::malformed("geoid separation units must be 'M'"));
    }

    let dgps_age = parse_optional_float(fields[13], "dgps age")?;
    let dgps_station = if fields.len() == FIELDS_WITH_STATION {
        Some(fields[14].trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    } else {
        None
    };
    if dgps_station
        .as_deref()
        .is_some_and(|station| station.chars().any(char::is_control))
    {
        return Err(SentenceError::malformed(
            "dgps station contains control characters",
        ));
    }

    Ok(PositionReport {
        device_id: device_id.to_string(),
        utc_time,
        latitude,
        longitude,
        fix_quality,
        satellites,
        hdop,
        altitude,
        geoid_separation,
        dgps_age,
        dgps_station,
    })
}

/// `hhmmss` with an optional fractional second.
fn parse_time(raw: &str) -> Result<Option<NaiveTime>, SentenceError> {
    if raw.is_empty() {
        return Ok(None);
    }

    let (whole, frac) = raw.split_once('.').unwrap_or((raw, ""));
    if whole.len() != 6 || !all_digits(whole) || !all_digits(frac) {
        return Err(SentenceError::malformed(format!("bad time field '{}'", raw)));
    }

    let two = |i: usize| -> u32 {
        whole.as_bytes()[i..i + 2]
            .iter()
            .fold(0, |acc, b| acc * 10 + u32::from(b - b'0'))
    };
    let (hour, minute, second) = (two(0), two(2), two(4));

    // Keep six digits of precision; pad shorter fractions.
    let micros = frac
        .bytes()
        .chain(std::iter::repeat(b'0'))
        .take(6)
        .fold(0u32, |acc, b| acc * 10 + u32::from(b - b'0'));

    NaiveTime::from_hms_micro_opt(hour, minute, second, micros)
        .map(Some)
        .ok_or_else(|| SentenceError::range("time", format!("'{}' is not a time of day", raw)))
}

/// `(d)ddmm.mmmm` to unsigned decimal degrees.
fn parse_coordinate(raw: &str, field: &'static str, max_degrees: f64) -> Result<f64, SentenceError> {
    if raw.is_empty() {
        return Err(SentenceError::malformed(format!("missing {}", field)));
    }

    let (whole, frac) = raw.split_once('.').unwrap_or((raw, ""));
    if whole.len() < 2 || !all_digits(whole) || !all_digits(frac) {
        return Err(SentenceError::malformed(format!("bad {} '{}'", field, raw)));
    }

    let (deg_digits, min_digits) = whole.split_at(whole.len() - 2);
    let degrees: f64 = if deg_digits.is_empty() {
        0.0
    } else {
        deg_digits
            .parse()
            .map_err(|_| SentenceError::malformed(format!("bad {} degrees '{}'", field, raw)))?
    };
    let minutes: f64 = if frac.is_empty() {
        min_digits.parse()
    } else {
        format!("{}.{}", min_digits, frac).parse()
    }
    .map_err(|_| SentenceError::malformed(format!("bad {} minutes '{}'", field, raw)))?;

    if minutes >= 60.0 {
        return Err(SentenceError::range(field, format!("minutes {} >= 60", minutes)));
    }

    let value = degrees + minutes / 60.0;
    if value > max_degrees {
        return Err(SentenceError::range(
            field,
            format!("{:.6} exceeds {} degrees", value, max_degrees),
        ));
    }

    Ok(value)
}

fn hemisphere_sign(
    raw: &str,
    positive: char,
    negative: char,
    field: &'static str,
) -> Result<f64, SentenceError> {
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c == positive => Ok(1.0),
        (Some(c), None) if c == negative => Ok(-1.0),
        _ => Err(SentenceError::malformed(format!(
            "{} must be '{}' or '{}', found '{}'",
            field, positive, negative, raw
        ))),
    }
}

fn parse_required<T: std::str::FromStr>(raw: &str, field: &'static str) -> Result<T, SentenceError> {
    if raw.is_empty() {
        return Err(SentenceError::malformed(format!("missing {}", field)));
    }
    raw.parse()
        .map_err(|_| SentenceError::malformed(format!("bad {} '{}'", field, raw)))
}

fn parse_optional_float(raw: &str, field: &'static str) -> Result<Option<f64>, SentenceError> {
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(SentenceError::malformed(format!("bad {} '{}'", field, raw))),
    }
}

fn all_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::with_checksum;
    use crate::error::SentenceErrorKind;

    const EXAMPLE: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,TEST001*60";

    fn framed(body: &str) -> String {
        with_checksum(body)
    }

    #[test]
    fn test_parse_example() {
        let report = parse_str(EXAMPLE).unwrap();

        assert_eq!(report.device_id, "TEST001");
        assert_eq!(report.utc_time, NaiveTime::from_hms_opt(12, 35, 19));
        assert!((report.latitude - (48.0 + 7.038 / 60.0)).abs() < 1e-9);
        assert!((report.longitude - (11.0 + 31.0 / 60.0)).abs() < 1e-9);
        assert_eq!(report.fix_quality, FixQuality::Gps);
        assert_eq!(report.satellites, 8);
        assert_eq!(report.hdop, 0.9);
        assert_eq!(report.altitude, 545.4);
        assert_eq!(report.geoid_separation, Some(46.9));
        assert_eq!(report.dgps_age, None);
        assert_eq!(report.dgps_station, None);
        assert!(report.has_valid_fix());
    }

    #[test]
    fn test_published_checksum_is_rejected() {
        let sentence = EXAMPLE.replace("*60", "*47");
        assert_eq!(
            parse_str(&sentence),
            Err(SentenceError::ChecksumMismatch {
                computed: 0x60,
                transmitted: 0x47
            })
        );
    }

    #[test]
    fn test_lowercase_checksum_and_crlf() {
        let body = "GPGGA,000000,0000.000,N,00000.000,E,1,04,1.0,0.0,M,,,,dev-a";
        assert_eq!(framed(body), format!("${}*2F", body));

        let report = parse_str(&format!("  ${}*2f\r\n", body)).unwrap();
        assert_eq!(report.device_id, "dev-a");
        assert_eq!(report.geoid_separation, None);
    }

    #[test]
    fn test_southern_western_hemispheres() {
        let sentence = framed("GPGGA,235959.50,3351.510,S,15112.600,W,2,11,0.7,12.0,M,-3.5,M,1.2,0042,ALPHA");
        let report = parse_str(&sentence).unwrap();

        assert!((report.latitude + (33.0 + 51.51 / 60.0)).abs() < 1e-9);
        assert!((report.longitude + (151.0 + 12.6 / 60.0)).abs() < 1e-9);
        assert_eq!(report.fix_quality, FixQuality::Dgps);
        assert_eq!(report.geoid_separation, Some(-3.5));
        assert_eq!(report.dgps_age, Some(1.2));
        assert_eq!(report.dgps_station.as_deref(), Some("0042"));
        assert_eq!(report.device_id, "ALPHA");
        assert_eq!(
            report.utc_time,
            NaiveTime::from_hms_micro_opt(23, 59, 59, 500_000)
        );
    }

    #[test]
    fn test_empty_optional_fields() {
        let sentence = framed("GPGGA,,4807.038,N,01131.000,E,0,00,,545.4,M,,,,TEST002");
        let report = parse_str(&sentence).unwrap();

        assert_eq!(report.utc_time, None);
        assert_eq!(report.hdop, 0.0);
        assert_eq!(report.fix_quality, FixQuality::Invalid);
        assert!(!report.has_valid_fix());
    }

    #[test]
    fn test_empty_device_id() {
        let sentence = framed("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,");
        assert_eq!(parse_str(&sentence), Err(SentenceError::EmptyDeviceId));

        let sentence = framed("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,   ");
        assert_eq!(parse_str(&sentence), Err(SentenceError::EmptyDeviceId));
    }

    #[test]
    fn test_device_id_is_trimmed_and_case_preserved() {
        let sentence = framed("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,, Unit-7b ");
        assert_eq!(parse_str(&sentence).unwrap().device_id, "Unit-7b");
    }

    #[test]
    fn test_control_characters_in_identifiers() {
        let cases = [
            "GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,A\nB\u{1}C",
            "GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,TEST\r001",
            "GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,\u{7f}",
            "GPGGA,123519,4807.038,N,01131.000,E,2,08,0.9,545.4,M,46.9,M,1.5,00\n12,TEST001",
        ];

        for body in cases {
            let err = parse_str(&framed(body)).unwrap_err();
            assert_eq!(err.kind(), SentenceErrorKind::MalformedStructure, "{:?}", body);
        }
    }

    #[test]
    fn test_checksum_delimiter_is_the_last_star() {
        // A '*' inside the payload is covered by the checksum
        let sentence = framed("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,UNIT*7");
        assert_eq!(parse_str(&sentence).unwrap().device_id, "UNIT*7");
    }

    #[test]
    fn test_field_range_errors() {
        let cases = [
            "GPGGA,123519,9107.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,X",
            "GPGGA,123519,4807.038,N,18131.000,E,1,08,0.9,545.4,M,46.9,M,,X",
            "GPGGA,123519,4875.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,X",
            "GPGGA,123519,4807.038,N,01131.000,E,9,08,0.9,545.4,M,46.9,M,,X",
            "GPGGA,253519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,X",
        ];

        for body in cases {
            let err = parse_str(&framed(body)).unwrap_err();
            assert_eq!(err.kind(), SentenceErrorKind::FieldRange, "{}", body);
        }
    }

    #[test]
    fn test_malformed_structure() {
        let cases = [
            "GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,TEST001".to_string(),
            "GPRMC,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,TEST001".to_string(),
            "GPGGA,123519,4807.038,X,01131.000,E,1,08,0.9,545.4,M,46.9,M,,TEST001".to_string(),
            "GPGGA,123519,48O7.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,TEST001".to_string(),
            "GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,,M,46.9,M,,TEST001".to_string(),
            "GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,F,46.9,M,,TEST001".to_string(),
            "GPGGA,123519,,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,TEST001".to_string(),
            "GPGGA,123519,4807.038,N,01131.000,E,1,-8,0.9,545.4,M,46.9,M,,TEST001".to_string(),
        ];

        for body in &cases {
            let err = parse_str(&framed(body)).unwrap_err();
            assert_eq!(err.kind(), SentenceErrorKind::MalformedStructure, "{}", body);
        }
    }

    #[test]
    fn test_broken_framing() {
        let body = "GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,TEST001";
        let missing_dollar = framed(body)[1..].to_string();
        let missing_star = format!("${}", body);
        let short_checksum = format!("${}*6", body);

        for sentence in [missing_dollar, missing_star, short_checksum] {
            assert_eq!(
                parse_str(&sentence).unwrap_err().kind(),
                SentenceErrorKind::MalformedStructure
            );
        }
    }

    #[test]
    fn test_non_utf8_payload() {
        let err = parse_sentence(&[b'$', 0xFF, 0xFE, b'*', b'0', b'0']).unwrap_err();
        assert_eq!(err.kind(), SentenceErrorKind::MalformedStructure);
    }

    #[test]
    fn test_fix_quality_codes() {
        for code in 0..=8u8 {
            let quality = FixQuality::from_code(code).unwrap();
            assert_eq!(quality.code(), code);
        }
        assert_eq!(FixQuality::from_code(9), None);
        assert_eq!(FixQuality::Rtk.description(), "Real Time Kinematic");
    }
}
