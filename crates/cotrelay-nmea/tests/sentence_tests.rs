//! Sentence-level behavior of the GPGGA parser

use cotrelay_nmea::{
    calculate_checksum, parse_sentence, parse_str, with_checksum, FixQuality, SentenceError,
    SentenceErrorKind,
};

const BODY: &str = "GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,TEST001";

#[test]
fn test_fields_match_literal_input() {
    let devices = ["TEST001", "unit-42", "Δ-sensor", "a.b.c"];
    let fixes = [0u8, 1, 4, 8];

    for device in devices {
        for fix in fixes {
            let body = format!(
                "GPGGA,061500,5130.300,N,00007.500,W,{},12,1.4,35.2,M,47.0,M,,{}",
                fix, device
            );
            let report = parse_str(&with_checksum(&body)).expect("valid sentence");

            assert_eq!(report.device_id, device);
            assert_eq!(report.fix_quality.code(), fix);
            assert_eq!(report.satellites, 12);
            assert_eq!(report.hdop, 1.4);
            assert_eq!(report.altitude, 35.2);
            assert!((report.latitude - 51.505).abs() < 1e-9);
            assert!((report.longitude + 0.125).abs() < 1e-9);
        }
    }
}

#[test]
fn test_every_wrong_checksum_is_rejected() {
    let correct = calculate_checksum(BODY);

    for transmitted in 0..=u8::MAX {
        let sentence = format!("${}*{:02X}", BODY, transmitted);
        let result = parse_str(&sentence);

        if transmitted == correct {
            assert!(result.is_ok());
        } else {
            assert_eq!(
                result,
                Err(SentenceError::ChecksumMismatch {
                    computed: correct,
                    transmitted
                })
            );
        }
    }
}

#[test]
fn test_checksum_checked_before_fields() {
    // Garbage fields with a wrong checksum report the checksum, not the fields.
    let sentence = "$GPGGA,not,a,valid,sentence*00";
    assert_eq!(
        parse_str(sentence).unwrap_err().kind(),
        SentenceErrorKind::ChecksumMismatch
    );
}

#[test]
fn test_parsing_is_deterministic() {
    let sentence = with_checksum(BODY);
    let first = parse_sentence(sentence.as_bytes());
    let second = parse_sentence(sentence.as_bytes());
    assert_eq!(first, second);
}

#[test]
fn test_station_field_variant() {
    let sentence = with_checksum(
        "GPGGA,123519,4807.038,N,01131.000,E,2,08,0.9,545.4,M,46.9,M,3.0,0120,TEST001",
    );
    let report = parse_sentence(sentence.as_bytes()).unwrap();

    assert_eq!(report.device_id, "TEST001");
    assert_eq!(report.dgps_station.as_deref(), Some("0120"));
    assert_eq!(report.dgps_age, Some(3.0));
    assert_eq!(report.fix_quality, FixQuality::Dgps);
}

#[test]
fn test_error_labels() {
    let labels: Vec<&str> = [
        SentenceErrorKind::MalformedStructure,
        SentenceErrorKind::ChecksumMismatch,
        SentenceErrorKind::FieldRange,
        SentenceErrorKind::EmptyDeviceId,
    ]
    .iter()
    .map(|k| k.label())
    .collect();

    assert_eq!(
        labels,
        vec![
            "malformed_structure",
            "checksum_mismatch",
            "field_range",
            "empty_device_id"
        ]
    );
}
