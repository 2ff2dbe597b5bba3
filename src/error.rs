//! Error types for the frame log parser library.
//!
//! Two families exist:
//! - `ParseError`: whole-run failures (schema, I/O, columnar writer). These abort a run.
//! - `FrameRejection`: per-frame validation failures. These are logged and skipped.

use thiserror::Error;

/// Result type alias for frame log operations.
pub type Result<T> = std::result::Result<T, ParseError>;

/// Errors that abort a parse run.
#[derive(Error, Debug)]
pub enum ParseError {
    /// Malformed or unreadable schema source
    #[error("Schema error: {0}")]
    Schema(String),

    /// I/O error occurred while reading the source or writing the destination
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error during DataFrame construction or Parquet encoding
    #[error("Writer error: {0}")]
    Writer(#[from] polars::error::PolarsError),

    /// JSON decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The run was interrupted through its cancellation flag
    #[error("Parse cancelled")]
    Cancelled,

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

/// Reason a candidate frame was rejected by the decoder.
///
/// The `Display` form is the human-readable reason reported in logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameRejection {
    #[error("frame too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },

    #[error("invalid start marker: got {got:#04x}")]
    BadStartMarker { got: u8 },

    #[error("invalid end marker: got {got:#04x}")]
    BadEndMarker { got: u8 },

    #[error("unknown id {id:#04x}: no schema registered")]
    UnknownId { id: u8 },

    #[error("length mismatch for id {id:#04x}: got {got}, expected {expected}")]
    LengthMismatch { id: u8, got: usize, expected: usize },

    #[error("numbytes mismatch for id {id:#04x}: got {got}, expected {expected}")]
    NumBytesMismatch { id: u8, got: u8, expected: u8 },

    #[error("checksum mismatch for id {id:#04x}: got {got:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { id: u8, got: u16, computed: u16 },

    #[error("payload too short for field '{field}' of id {id:#04x}: need {needed} bytes, have {available}")]
    PayloadTooShort {
        id: u8,
        field: String,
        needed: usize,
        available: usize,
    },
}

impl FrameRejection {
    /// Stable short key used for rejection statistics.
    pub fn kind(&self) -> &'static str {
        match self {
            FrameRejection::TooShort { .. } => "too_short",
            FrameRejection::BadStartMarker { .. } => "bad_start_marker",
            FrameRejection::BadEndMarker { .. } => "bad_end_marker",
            FrameRejection::UnknownId { .. } => "unknown_id",
            FrameRejection::LengthMismatch { .. } => "length_mismatch",
            FrameRejection::NumBytesMismatch { .. } => "numbytes_mismatch",
            FrameRejection::ChecksumMismatch { .. } => "checksum_mismatch",
            FrameRejection::PayloadTooShort { .. } => "payload_too_short",
        }
    }

    /// Packet ID carried by the rejected frame, when it got far enough to read one.
    pub fn packet_id(&self) -> Option<u8> {
        match self {
            FrameRejection::TooShort { .. }
            | FrameRejection::BadStartMarker { .. }
            | FrameRejection::BadEndMarker { .. } => None,
            FrameRejection::UnknownId { id }
            | FrameRejection::LengthMismatch { id, .. }
            | FrameRejection::NumBytesMismatch { id, .. }
            | FrameRejection::ChecksumMismatch { id, .. }
            | FrameRejection::PayloadTooShort { id, .. } => Some(*id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_reason_text() {
        let r = FrameRejection::UnknownId { id: 0x42 };
        assert_eq!(r.to_string(), "unknown id 0x42: no schema registered");
        assert_eq!(r.kind(), "unknown_id");
        assert_eq!(r.packet_id(), Some(0x42));

        let r = FrameRejection::ChecksumMismatch {
            id: 1,
            got: 0x0102,
            computed: 0x0003,
        };
        assert!(r.to_string().contains("checksum mismatch"));
        assert!(r.to_string().contains("0x0102"));
    }

    #[test]
    fn test_marker_rejections_have_no_id() {
        assert_eq!(FrameRejection::TooShort { len: 3, min: 6 }.packet_id(), None);
        assert_eq!(FrameRejection::BadEndMarker { got: 0xff }.packet_id(), None);
    }
}
