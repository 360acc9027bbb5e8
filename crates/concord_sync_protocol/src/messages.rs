//! Protocol messages for sync.

use crate::error::{ProtocolError, ProtocolResult};
use concord_ot::{DocumentId, DocumentState, Operation, OperationId, UserId};
use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Wire code of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Client opens a document.
    Handshake,
    /// Server answers a handshake with the authoritative state.
    HandshakeAck,
    /// Client sends pending operations.
    Push,
    /// Server answers a push.
    PushAck,
    /// Client asks for operations after a version.
    Fetch,
    /// Server answers a fetch.
    FetchResult,
    /// Server broadcasts an operation.
    RemoteOperation,
    /// Client closes a document.
    Leave,
    /// Either side reports an error.
    Error,
}

impl MessageType {
    /// Converts to a code.
    pub fn to_code(&self) -> u8 {
        match self {
            MessageType::Handshake => 1,
            MessageType::HandshakeAck => 2,
            MessageType::Push => 3,
            MessageType::PushAck => 4,
            MessageType::Fetch => 5,
            MessageType::FetchResult => 6,
            MessageType::RemoteOperation => 7,
            MessageType::Leave => 8,
            MessageType::Error => 9,
        }
    }

    /// Converts from a code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(MessageType::Handshake),
            2 => Some(MessageType::HandshakeAck),
            3 => Some(MessageType::Push),
            4 => Some(MessageType::PushAck),
            5 => Some(MessageType::Fetch),
            6 => Some(MessageType::FetchResult),
            7 => Some(MessageType::RemoteOperation),
            8 => Some(MessageType::Leave),
            9 => Some(MessageType::Error),
            _ => None,
        }
    }
}

/// A sync protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncMessage {
    /// Handshake request.
    Handshake(Handshake),
    /// Handshake response.
    HandshakeAck(HandshakeAck),
    /// Push request.
    Push(PushRequest),
    /// Push response.
    PushAck(PushAck),
    /// Fetch request.
    Fetch(FetchRequest),
    /// Fetch response.
    FetchResult(FetchResult),
    /// Broadcast operation.
    RemoteOperation(RemoteOperation),
    /// Document closed.
    Leave(Leave),
    /// Error report.
    Error(ErrorMessage),
}

impl SyncMessage {
    /// Returns the message type.
    pub fn message_type(&self) -> MessageType {
        match self {
            SyncMessage::Handshake(_) => MessageType::Handshake,
            SyncMessage::HandshakeAck(_) => MessageType::HandshakeAck,
            SyncMessage::Push(_) => MessageType::Push,
            SyncMessage::PushAck(_) => MessageType::PushAck,
            SyncMessage::Fetch(_) => MessageType::Fetch,
            SyncMessage::FetchResult(_) => MessageType::FetchResult,
            SyncMessage::RemoteOperation(_) => MessageType::RemoteOperation,
            SyncMessage::Leave(_) => MessageType::Leave,
            SyncMessage::Error(_) => MessageType::Error,
        }
    }

    /// Returns the message type code.
    pub fn type_code(&self) -> u8 {
        self.message_type().to_code()
    }

    /// Document the message is about, if any.
    pub fn document_id(&self) -> Option<&DocumentId> {
        match self {
            SyncMessage::Handshake(m) => Some(&m.document_id),
            SyncMessage::HandshakeAck(m) => Some(&m.document_id),
            SyncMessage::Push(m) => Some(&m.document_id),
            SyncMessage::PushAck(m) => Some(&m.document_id),
            SyncMessage::Fetch(m) => Some(&m.document_id),
            SyncMessage::FetchResult(m) => Some(&m.document_id),
            SyncMessage::RemoteOperation(m) => Some(&m.document_id),
            SyncMessage::Leave(m) => Some(&m.document_id),
            SyncMessage::Error(m) => m.document_id.as_ref(),
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes).map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(bytes)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

/// Handshake request from a client opening a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Document id.
    pub document_id: DocumentId,
    /// Connecting user.
    pub user_id: UserId,
    /// Client protocol version.
    pub protocol_version: u16,
    /// State the client starts from. Used to create unknown documents.
    pub initial_state: DocumentState,
    /// Operations the client still holds as pending.
    #[serde(default)]
    pub pending: Vec<OperationId>,
}

impl Handshake {
    /// Creates a handshake for the current protocol version.
    pub fn new(document_id: DocumentId, user_id: UserId, initial_state: DocumentState) -> Self {
        Self {
            document_id,
            user_id,
            protocol_version: PROTOCOL_VERSION,
            initial_state,
            pending: Vec::new(),
        }
    }

    /// Lists the client's pending operations, so that the server can say
    /// which of them it already holds.
    pub fn with_pending(mut self, pending: Vec<OperationId>) -> Self {
        self.pending = pending;
        self
    }
}

/// Handshake response carrying the authoritative state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeAck {
    /// Document id.
    pub document_id: DocumentId,
    /// Server protocol version.
    pub protocol_version: u16,
    /// Authoritative state.
    pub state: DocumentState,
    /// Number of operations in the server's history.
    pub server_version: u64,
    /// Pending operations of the client that `state` already contains.
    #[serde(default)]
    pub acknowledged: Vec<OperationId>,
}

/// Pending operations sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Document id.
    pub document_id: DocumentId,
    /// Operations in local order.
    pub operations: Vec<Operation>,
    /// Client's local version.
    pub local_version: u64,
    /// Server version the operations were generated against.
    pub server_version: u64,
}

/// Server answer to a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAck {
    /// Document id.
    pub document_id: DocumentId,
    /// Operations accepted into the server history (including ones it
    /// already had).
    pub accepted: Vec<OperationId>,
    /// Server version after the push.
    pub server_version: u64,
    /// Set when the server could not reconcile the push. The client must
    /// roll back and refetch.
    pub conflict: Option<String>,
}

impl PushAck {
    /// Returns true if the server reported a conflict.
    pub fn is_conflict(&self) -> bool {
        self.conflict.is_some()
    }
}

/// Request for operations after a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Document id.
    pub document_id: DocumentId,
    /// Return operations after this version.
    pub since: u64,
    /// Maximum number of operations.
    pub limit: u32,
}

/// Operations after a version. Operation `i` has version `since + i + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResult {
    /// Document id.
    pub document_id: DocumentId,
    /// Operations in server order.
    pub operations: Vec<Operation>,
    /// Current server version.
    pub server_version: u64,
    /// Whether more operations are available.
    pub has_more: bool,
}

/// An operation broadcast by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteOperation {
    /// Document id.
    pub document_id: DocumentId,
    /// The operation as stored in the server history.
    pub operation: Operation,
    /// Server version of this operation.
    pub server_version: u64,
}

/// A client closed a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leave {
    /// Document id.
    pub document_id: DocumentId,
    /// Leaving user.
    pub user_id: UserId,
}

/// Error report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Document concerned, if any.
    pub document_id: Option<DocumentId>,
    /// Human-readable message.
    pub message: String,
}

impl ErrorMessage {
    /// Creates an error message.
    pub fn new(document_id: Option<DocumentId>, message: impl Into<String>) -> Self {
        Self {
            document_id,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_ot::NodeSpec;
    use serde_json::json;

    fn doc() -> DocumentId {
        DocumentId::new("doc-1")
    }

    #[test]
    fn push_request_roundtrip() {
        let ops = vec![
            Operation::insert("alice", 10, 0, "héllo").with_id("op-1"),
            Operation::set_attribute("alice", 11, "p1", "style", json!({"bold": true, "size": 12}))
                .with_id("op-2"),
            Operation::create_node(
                "alice",
                12,
                None,
                0,
                NodeSpec::new("p2", "paragraph").with_field("text", json!("x")),
            )
            .with_id("op-3"),
        ];
        let msg = SyncMessage::Push(PushRequest {
            document_id: doc(),
            operations: ops,
            local_version: 3,
            server_version: 7,
        });

        let bytes = msg.encode().unwrap();
        let decoded = SyncMessage::decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn encoding_is_deterministic() {
        let op = Operation::update_node(
            "u",
            1,
            "n",
            [("b".to_string(), Some(json!(1))), ("a".to_string(), None)],
        )
        .with_id("op");
        let msg = SyncMessage::RemoteOperation(RemoteOperation {
            document_id: doc(),
            operation: op,
            server_version: 1,
        });
        assert_eq!(msg.encode().unwrap(), msg.clone().encode().unwrap());
    }

    #[test]
    fn message_type_codes() {
        let msg = SyncMessage::Fetch(FetchRequest {
            document_id: doc(),
            since: 0,
            limit: 100,
        });
        assert_eq!(msg.type_code(), 5);
        assert_eq!(msg.document_id(), Some(&doc()));

        for code in 1..=9 {
            assert_eq!(MessageType::from_code(code).unwrap().to_code(), code);
        }
        assert_eq!(MessageType::from_code(0), None);
        assert_eq!(MessageType::from_code(10), None);
    }

    #[test]
    fn push_ack_conflict_flag() {
        let ack = PushAck {
            document_id: doc(),
            accepted: vec![],
            server_version: 4,
            conflict: Some("base version ahead".into()),
        };
        assert!(ack.is_conflict());
    }

    #[test]
    fn garbage_fails_to_decode() {
        let err = SyncMessage::decode(&[0xff, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }
}
