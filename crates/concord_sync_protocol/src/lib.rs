//! # Concord Sync Protocol
//!
//! Sync protocol messages and their CBOR framing.
//!
//! This crate provides:
//! - `SyncMessage` with one variant per message (handshake, push, fetch,
//!   remote operation, leave, error)
//! - `MessageType` wire codes
//! - `encode_frame` / `decode_frame`: a type byte followed by the CBOR body
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod frame;
mod messages;

pub use error::{ProtocolError, ProtocolResult};
pub use frame::{decode_frame, encode_frame};
pub use messages::{
    ErrorMessage, FetchRequest, FetchResult, Handshake, HandshakeAck, Leave, MessageType, PushAck,
    PushRequest, RemoteOperation, SyncMessage, PROTOCOL_VERSION,
};
