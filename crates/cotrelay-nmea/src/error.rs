use serde::Serialize;
use thiserror::Error;

/// Why a sentence was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SentenceError {
    /// Delimiters, talker, field count or field syntax is wrong
    #[error("Malformed sentence: {0}")]
    MalformedStructure(String),

    /// Transmitted checksum differs from the XOR of the body
    #[error("Checksum mismatch: computed {computed:02X}, transmitted {transmitted:02X}")]
    ChecksumMismatch { computed: u8, transmitted: u8 },

    /// A field parsed but its value is impossible
    #[error("Field '{field}' out of range: {reason}")]
    FieldRange { field: &'static str, reason: String },

    /// The trailing device identifier field is empty
    #[error("Device identifier is empty")]
    EmptyDeviceId,
}

impl SentenceError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedStructure(reason.into())
    }

    pub(crate) fn range(field: &'static str, reason: impl Into<String>) -> Self {
        Self::FieldRange {
            field,
            reason: reason.into(),
        }
    }

    /// Returns the failure class.
    pub fn kind(&self) -> SentenceErrorKind {
        match self {
            Self::MalformedStructure(_) => SentenceErrorKind::MalformedStructure,
            Self::ChecksumMismatch { .. } => SentenceErrorKind::ChecksumMismatch,
            Self::FieldRange { .. } => SentenceErrorKind::FieldRange,
            Self::EmptyDeviceId => SentenceErrorKind::EmptyDeviceId,
        }
    }
}

/// Failure class of a [`SentenceError`], used as a metrics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SentenceErrorKind {
    MalformedStructure,
    ChecksumMismatch,
    FieldRange,
    EmptyDeviceId,
}

impl SentenceErrorKind {
    /// Stable label for `parse_errors_total{kind}`.
    pub fn label(&self) -> &'static str {
        match self {
            Self::MalformedStructure => "malformed_structure",
            Self::ChecksumMismatch => "checksum_mismatch",
            Self::FieldRange => "field_range",
            Self::EmptyDeviceId => "empty_device_id",
        }
    }
}

impl std::fmt::Display for SentenceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
