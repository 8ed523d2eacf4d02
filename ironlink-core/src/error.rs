/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Error types for the IronLink gateway.
//!
//! This module provides a unified error hierarchy using `thiserror` for typed,
//! domain-specific errors across all IronLink operations.
//!
//! Back-pressure is deliberately *not* an error: transient sink unavailability
//! is modeled as a variant of [`crate::types::Offer`] and retried by the
//! worker without losing work.

use thiserror::Error;

/// Result type alias using [`EngineError`] as the error type.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Top-level error type for all IronLink operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error in session layer operations.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Error during message framing or socket configuration.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Error constructing or applying the request signing key.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// I/O error from an underlying socket.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An engine invariant was breached; routed to the error handler rather
    /// than propagated out of the worker.
    #[error("illegal state: {0}")]
    IllegalState(String),
}

/// Errors in session layer operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The session is not in the correct state for the operation.
    #[error("state should be {expected} in order to {operation} but is {current}")]
    IllegalState {
        /// State required by the operation.
        expected: String,
        /// Current session state.
        current: String,
        /// The attempted operation.
        operation: String,
    },

    /// A protocol response carried a UUID that does not belong to this session.
    #[error("uuid mismatch: expected {expected}, received {received}")]
    UuidMismatch {
        /// UUID of the local session.
        expected: u64,
        /// UUID carried by the response.
        received: u64,
    },

    /// A catch-up replay was requested from beyond the archived stream.
    #[error(
        "sequence number too high for {correlation_id}: wanted {wanted}, \
         but we've only archived {archived}"
    )]
    SequenceNumberTooHigh {
        /// Correlation id of the offending request.
        correlation_id: u64,
        /// Requested replay-from sequence number.
        wanted: i64,
        /// Last sequence number available in the archive.
        archived: i64,
    },
}

/// Errors that occur while framing bytes read from a socket.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Invalid BeginString field (tag 8).
    #[error("invalid begin string: message must start with 8=")]
    InvalidBeginString,

    /// Missing BodyLength field (tag 9).
    #[error("missing body length field (tag 9)")]
    MissingBodyLength,

    /// Invalid BodyLength value.
    #[error("invalid body length value")]
    InvalidBodyLength,

    /// Checksum mismatch between calculated and declared values.
    #[error("checksum mismatch: calculated {calculated}, declared {declared}")]
    ChecksumMismatch {
        /// Calculated checksum value.
        calculated: u8,
        /// Declared checksum value in message.
        declared: u8,
    },

    /// Message exceeds maximum allowed size.
    #[error("message too large: {size} bytes exceeds maximum {max_size}")]
    MessageTooLarge {
        /// Actual message size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max_size: usize,
    },

    /// A framing header declared an encoding this gateway does not speak.
    #[error("unsupported framing encoding: {encoding:#06x}")]
    UnsupportedEncoding {
        /// The declared encoding type.
        encoding: u16,
    },

    /// A required field is absent from a framed message.
    #[error("missing required field: tag {tag}")]
    MissingRequiredField {
        /// The tag number of the missing field.
        tag: u32,
    },

    /// A field value could not be interpreted.
    #[error("invalid field value for tag {tag}: {reason}")]
    InvalidFieldValue {
        /// The tag number of the field.
        tag: u32,
        /// Description of why the value is invalid.
        reason: String,
    },
}

/// Errors constructing or applying the HMAC signing key.
///
/// These indicate a fatal misconfiguration: a session cannot proceed safely
/// without a usable key, so construction fails instead of limping on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The base64url-encoded user key could not be decoded.
    #[error("malformed base64url user key: {0}")]
    MalformedKey(String),

    /// The decoded key was rejected by the MAC implementation.
    #[error("invalid hmac key: {0}")]
    InvalidKey(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_display() {
        let err = SessionError::IllegalState {
            expected: "ESTABLISHED".to_string(),
            current: "CONNECTED".to_string(),
            operation: "send".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "state should be ESTABLISHED in order to send but is CONNECTED"
        );
    }

    #[test]
    fn test_uuid_mismatch_display() {
        let err = SessionError::UuidMismatch {
            expected: 1,
            received: 2,
        };
        assert_eq!(err.to_string(), "uuid mismatch: expected 1, received 2");
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::ChecksumMismatch {
            calculated: 100,
            declared: 200,
        };
        assert_eq!(
            err.to_string(),
            "checksum mismatch: calculated 100, declared 200"
        );
    }

    #[test]
    fn test_engine_error_from_transport() {
        let err: EngineError = TransportError::InvalidBeginString.into();
        assert!(matches!(
            err,
            EngineError::Transport(TransportError::InvalidBeginString)
        ));
    }

    #[test]
    fn test_crypto_error_display() {
        let err = CryptoError::MalformedKey("bad padding".to_string());
        assert_eq!(err.to_string(), "malformed base64url user key: bad padding");
    }
}
