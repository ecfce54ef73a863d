//! Error types for frame decoding and payload handling.
//!
//! Codec rejects are cheap values: the engine counts them and keeps running,
//! so every variant is `Clone` and carries enough structure for a diagnostic
//! line without holding onto the offending input.

use thiserror::Error;

use crate::code::Code;

/// Result alias used throughout the codec.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while decoding frames or building payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Structural violation of the line grammar
    #[error("malformed frame: {reason}")]
    Malformed {
        /// What part of the grammar was violated
        reason: &'static str,
    },

    /// Address field does not match `TT:NNNNNN` or a known sentinel
    #[error("invalid address {text:?}")]
    InvalidAddress {
        /// The rejected token
        text: String,
    },

    /// Verb field is not one of I/RQ/RP/W
    #[error("invalid verb {text:?}")]
    InvalidVerb {
        /// The rejected token
        text: String,
    },

    /// Code field is not four hex digits
    #[error("invalid code {text:?}")]
    InvalidCode {
        /// The rejected token
        text: String,
    },

    /// Declared length disagrees with the payload hex
    #[error("length mismatch: declared {declared} bytes, payload has {actual}")]
    Length {
        /// Byte count claimed by the length field
        declared: usize,
        /// Byte count actually present
        actual: usize,
    },

    /// Trailing checksum present but does not verify
    #[error("checksum mismatch: frame carries {carried:02X}, computed {computed:02X}")]
    Checksum {
        /// Checksum carried on the frame
        carried: u8,
        /// Checksum computed over the frame bytes
        computed: u8,
    },

    /// Payload bytes do not satisfy the code's shape
    #[error("invalid {code} payload: {reason}")]
    InvalidPayload {
        /// Code whose rules were violated
        code: Code,
        /// What rule was violated
        reason: &'static str,
    },

    /// No descriptor registered for this code
    ///
    /// Non-fatal by policy: callers keep the raw payload and move on.
    #[error("no descriptor for code {0}")]
    UnknownCode(Code),

    /// JSON wire form could not be produced or consumed
    #[error("json frame: {0}")]
    Json(String),
}

impl ProtocolError {
    /// Short stable label used for diagnostic counters.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Malformed { .. }
            | Self::InvalidAddress { .. }
            | Self::InvalidVerb { .. }
            | Self::InvalidCode { .. } => "malformed",
            Self::Length { .. } => "length",
            Self::Checksum { .. } => "checksum",
            Self::InvalidPayload { .. } => "payload",
            Self::UnknownCode(_) => "unknown-code",
            Self::Json(_) => "json",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(ProtocolError::Malformed { reason: "x" }.label(), "malformed");
        assert_eq!(ProtocolError::Length { declared: 3, actual: 2 }.label(), "length");
        assert_eq!(ProtocolError::Checksum { carried: 0, computed: 1 }.label(), "checksum");
        assert_eq!(ProtocolError::UnknownCode(Code::new(0x1234)).label(), "unknown-code");
    }
}
