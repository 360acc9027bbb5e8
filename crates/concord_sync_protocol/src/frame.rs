//! Wire framing: one type byte followed by the CBOR body.

use crate::error::{ProtocolError, ProtocolResult};
use crate::messages::{MessageType, SyncMessage};

/// Encodes a message into a frame.
pub fn encode_frame(message: &SyncMessage) -> ProtocolResult<Vec<u8>> {
    let body = message.encode()?;
    let mut frame = Vec::with_capacity(body.len() + 1);
    frame.push(message.type_code());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decodes a frame, checking that the header matches the body.
pub fn decode_frame(frame: &[u8]) -> ProtocolResult<SyncMessage> {
    let (&header, body) = frame.split_first().ok_or(ProtocolError::EmptyFrame)?;
    MessageType::from_code(header).ok_or(ProtocolError::UnknownMessageType(header))?;

    let message = SyncMessage::decode(body)?;
    if message.type_code() != header {
        return Err(ProtocolError::TypeMismatch {
            header,
            body: message.type_code(),
        });
    }
    Ok(message)
}
