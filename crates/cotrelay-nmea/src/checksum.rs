//! NMEA 0183 checksum helpers

/// XOR of every byte of `body`.
///
/// `body` is the text strictly between the leading `$` and the `*`.
pub fn calculate_checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, b| acc ^ b)
}

/// Renders a checksum as two uppercase hex digits.
pub fn format_checksum(checksum: u8) -> String {
    format!("{:02X}", checksum)
}

/// Parses a transmitted checksum, accepting either case.
///
/// Returns `None` unless `raw` is exactly two hex digits.
pub fn parse_checksum(raw: &str) -> Option<u8> {
    if raw.len() != 2 || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(raw, 16).ok()
}

/// Frames `body` as a full sentence: `$<body>*CC`.
pub fn with_checksum(body: &str) -> String {
    format!("${}*{}", body, format_checksum(calculate_checksum(body)))
}
