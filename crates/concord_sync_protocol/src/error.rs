//! Protocol errors.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// CBOR serialization failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// CBOR deserialization failed.
    #[error("decode error: {0}")]
    Decode(String),

    /// The frame has no type byte.
    #[error("empty frame")]
    EmptyFrame,

    /// The type byte is not a known message type.
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    /// The type byte disagrees with the decoded body.
    #[error("frame type {header} does not match body type {body}")]
    TypeMismatch {
        /// Code in the frame header.
        header: u8,
        /// Code of the decoded message.
        body: u8,
    },
}
