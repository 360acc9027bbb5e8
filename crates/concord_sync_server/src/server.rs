//! In-memory sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::history::DocumentHistory;
use concord_ot::{DocumentId, DocumentState, Operation};
use concord_sync_protocol::{
    decode_frame, encode_frame, ErrorMessage, FetchRequest, FetchResult, Handshake, HandshakeAck,
    Leave, PushAck, PushRequest, RemoteOperation, SyncMessage, PROTOCOL_VERSION,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Reference sync authority.
///
/// Holds one [`DocumentHistory`] per document id. All handlers are
/// synchronous; the history of a document is locked for the duration of
/// one request.
pub struct SyncServer {
    config: ServerConfig,
    documents: RwLock<HashMap<DocumentId, DocumentHistory>>,
}

impl SyncServer {
    /// Creates a new sync server.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            documents: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Number of open documents.
    pub fn document_count(&self) -> usize {
        self.documents.read().len()
    }

    /// Current version of a document.
    pub fn version(&self, document_id: &DocumentId) -> Option<u64> {
        self.documents.read().get(document_id).map(|h| h.version())
    }

    /// Authoritative state of a document.
    pub fn state(&self, document_id: &DocumentId) -> Option<DocumentState> {
        self.documents.read().get(document_id).map(|h| h.state())
    }

    /// Retained operations of a document as broadcast messages, starting
    /// after `since`.
    pub fn broadcasts_since(&self, document_id: &DocumentId, since: u64) -> ServerResult<Vec<RemoteOperation>> {
        let documents = self.documents.read();
        let history = documents
            .get(document_id)
            .ok_or_else(|| ServerError::UnknownDocument(document_id.clone()))?;
        let (operations, _) = history.since(since, usize::MAX)?;
        Ok(operations
            .into_iter()
            .zip(since + 1..)
            .map(|(operation, server_version)| RemoteOperation {
                document_id: document_id.clone(),
                operation,
                server_version,
            })
            .collect())
    }

    /// Handles a handshake, creating the document if it is unknown.
    pub fn handle_handshake(&self, request: &Handshake) -> ServerResult<HandshakeAck> {
        if request.protocol_version != PROTOCOL_VERSION {
            warn!(
                client = request.protocol_version,
                server = PROTOCOL_VERSION,
                "protocol version differs"
            );
        }

        let mut documents = self.documents.write();
        if !documents.contains_key(&request.document_id) {
            let history = DocumentHistory::new(
                request.document_id.clone(),
                request.initial_state.clone(),
                self.config.history_limit,
            )?;
            info!(document = %request.document_id, user = %request.user_id, "document created");
            documents.insert(request.document_id.clone(), history);
        }

        let history = documents
            .get(&request.document_id)
            .ok_or_else(|| ServerError::UnknownDocument(request.document_id.clone()))?;
        let acknowledged = request
            .pending
            .iter()
            .filter(|id| history.document().has_applied(id))
            .cloned()
            .collect();
        Ok(HandshakeAck {
            document_id: request.document_id.clone(),
            protocol_version: PROTOCOL_VERSION,
            state: history.state(),
            server_version: history.version(),
            acknowledged,
        })
    }

    /// Handles a push.
    ///
    /// Reconciliation failures are reported in the ack rather than as an
    /// error so that the client can roll back.
    pub fn handle_push(&self, request: &PushRequest) -> ServerResult<PushAck> {
        let mut documents = self.documents.write();
        let history = documents
            .get_mut(&request.document_id)
            .ok_or_else(|| ServerError::UnknownDocument(request.document_id.clone()))?;

        match history.reconcile(&request.operations, request.server_version) {
            Ok(accepted) => {
                debug!(
                    document = %request.document_id,
                    pushed = request.operations.len(),
                    version = history.version(),
                    "push reconciled"
                );
                Ok(PushAck {
                    document_id: request.document_id.clone(),
                    accepted,
                    server_version: history.version(),
                    conflict: None,
                })
            }
            Err(e) if e.is_conflict() => {
                warn!(document = %request.document_id, error = %e, "push rejected");
                Ok(PushAck {
                    document_id: request.document_id.clone(),
                    accepted: Vec::new(),
                    server_version: history.version(),
                    conflict: Some(e.to_string()),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Handles a fetch.
    pub fn handle_fetch(&self, request: &FetchRequest) -> ServerResult<FetchResult> {
        let documents = self.documents.read();
        let history = documents
            .get(&request.document_id)
            .ok_or_else(|| ServerError::UnknownDocument(request.document_id.clone()))?;

        let limit = request.limit.min(self.config.max_fetch_batch).max(1) as usize;
        let (operations, has_more): (Vec<Operation>, bool) = history.since(request.since, limit)?;
        Ok(FetchResult {
            document_id: request.document_id.clone(),
            operations,
            server_version: history.version(),
            has_more,
        })
    }

    /// Handles a client leaving a document.
    pub fn handle_leave(&self, request: &Leave) {
        debug!(document = %request.document_id, user = %request.user_id, "client left");
    }

    /// Dispatches a client message. Returns `None` for fire-and-forget
    /// messages.
    pub fn handle_message(&self, message: SyncMessage) -> ServerResult<Option<SyncMessage>> {
        match message {
            SyncMessage::Handshake(req) => Ok(Some(SyncMessage::HandshakeAck(self.handle_handshake(&req)?))),
            SyncMessage::Push(req) => Ok(Some(SyncMessage::PushAck(self.handle_push(&req)?))),
            SyncMessage::Fetch(req) => Ok(Some(SyncMessage::FetchResult(self.handle_fetch(&req)?))),
            SyncMessage::Leave(req) => {
                self.handle_leave(&req);
                Ok(None)
            }
            other => Err(ServerError::UnexpectedMessage(other.message_type())),
        }
    }

    /// Like [`SyncServer::handle_message`], but reports failures as an
    /// [`ErrorMessage`].
    pub fn respond(&self, message: SyncMessage) -> Option<SyncMessage> {
        let document_id = message.document_id().cloned();
        match self.handle_message(message) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "request failed");
                Some(SyncMessage::Error(ErrorMessage::new(document_id, e.to_string())))
            }
        }
    }

    /// Handles a framed request and returns the framed response.
    pub fn handle_frame(&self, frame: &[u8]) -> ServerResult<Option<Vec<u8>>> {
        let message = decode_frame(frame)?;
        match self.respond(message) {
            Some(response) => Ok(Some(encode_frame(&response)?)),
            None => Ok(None),
        }
    }
}

impl Default for SyncServer {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_ot::{NodeSpec, UserId};
    use serde_json::json;

    fn doc() -> DocumentId {
        DocumentId::new("doc")
    }

    fn open(server: &SyncServer, user: &str, content: &str) -> HandshakeAck {
        server
            .handle_handshake(&Handshake::new(doc(), UserId::new(user), DocumentState::text(content)))
            .unwrap()
    }

    fn push(ops: Vec<Operation>, base: u64) -> PushRequest {
        PushRequest {
            document_id: doc(),
            operations: ops,
            local_version: 0,
            server_version: base,
        }
    }

    #[test]
    fn handshake_creates_once() {
        let server = SyncServer::default();
        let ack = open(&server, "alice", "hello");
        assert_eq!(ack.state.content, "hello");
        assert_eq!(ack.server_version, 0);

        // A second client's initial state is ignored.
        let ack = open(&server, "bob", "other");
        assert_eq!(ack.state.content, "hello");
        assert_eq!(server.document_count(), 1);
    }

    #[test]
    fn handshake_reports_known_pending() {
        let server = SyncServer::default();
        open(&server, "alice", "abc");
        server
            .handle_push(&push(vec![Operation::insert("alice", 1, 0, "x").with_id("a1")], 0))
            .unwrap();

        let request = Handshake::new(doc(), UserId::new("alice"), DocumentState::text("abc"))
            .with_pending(vec!["a1".into(), "a2".into()]);
        let ack = server.handle_handshake(&request).unwrap();
        assert_eq!(ack.acknowledged, vec![concord_ot::OperationId::new("a1")]);
        assert_eq!(ack.state.content, "xabc");
        assert_eq!(ack.server_version, 1);
    }

    #[test]
    fn full_sync_flow() {
        let server = SyncServer::default();
        open(&server, "alice", "abc");

        let ack = server
            .handle_push(&push(vec![Operation::insert("alice", 1, 3, "!").with_id("a1")], 0))
            .unwrap();
        assert!(!ack.is_conflict());
        assert_eq!(ack.server_version, 1);

        let result = server
            .handle_fetch(&FetchRequest {
                document_id: doc(),
                since: 0,
                limit: 10,
            })
            .unwrap();
        assert_eq!(result.operations.len(), 1);
        assert_eq!(result.server_version, 1);
        assert!(!result.has_more);
        assert_eq!(server.state(&doc()).unwrap().content, "abc!");
    }

    #[test]
    fn push_conflicts_are_reported_in_ack() {
        let server = SyncServer::default();
        open(&server, "alice", "abc");

        let ack = server
            .handle_push(&push(vec![Operation::insert("alice", 1, 0, "x")], 5))
            .unwrap();
        assert!(ack.is_conflict());
        assert!(ack.accepted.is_empty());
        assert_eq!(ack.server_version, 0);
    }

    #[test]
    fn unknown_document() {
        let server = SyncServer::default();
        let err = server.handle_push(&push(vec![], 0)).unwrap_err();
        assert!(matches!(err, ServerError::UnknownDocument(_)));
    }

    #[test]
    fn fetch_respects_batch_limit() {
        let server = SyncServer::new(ServerConfig::new().with_max_fetch_batch(2));
        open(&server, "alice", "");
        let ops = (0..5).map(|i| Operation::insert("alice", i, i as usize, "x")).collect();
        server.handle_push(&push(ops, 0)).unwrap();

        let result = server
            .handle_fetch(&FetchRequest {
                document_id: doc(),
                since: 1,
                limit: 100,
            })
            .unwrap();
        assert_eq!(result.operations.len(), 2);
        assert!(result.has_more);
        assert_eq!(result.server_version, 5);
    }

    #[test]
    fn structured_push() {
        let server = SyncServer::default();
        open(&server, "alice", "");
        let ops = vec![
            Operation::create_node("alice", 1, None, 0, NodeSpec::new("p1", "paragraph")),
            Operation::set_attribute("alice", 2, "p1", "align", json!("left")),
        ];
        server.handle_push(&push(ops, 0)).unwrap();
        let state = server.state(&doc()).unwrap();
        assert_eq!(state.nodes.len(), 1);
        assert_eq!(state.nodes[0].attributes.get("align"), Some(&json!("left")));

        let broadcasts = server.broadcasts_since(&doc(), 1).unwrap();
        assert_eq!(broadcasts.len(), 1);
        assert_eq!(broadcasts[0].server_version, 2);
    }

    #[test]
    fn message_dispatch() {
        let server = SyncServer::default();
        let response = server
            .handle_message(SyncMessage::Handshake(Handshake::new(
                doc(),
                UserId::new("alice"),
                DocumentState::text("x"),
            )))
            .unwrap();
        assert!(matches!(response, Some(SyncMessage::HandshakeAck(_))));

        let leave = SyncMessage::Leave(Leave {
            document_id: doc(),
            user_id: UserId::new("alice"),
        });
        assert!(server.handle_message(leave).unwrap().is_none());

        let response = server.respond(SyncMessage::Fetch(FetchRequest {
            document_id: DocumentId::new("missing"),
            since: 0,
            limit: 1,
        }));
        match response {
            Some(SyncMessage::Error(e)) => {
                assert_eq!(e.document_id, Some(DocumentId::new("missing")));
                assert!(e.message.contains("unknown document"));
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn framed_roundtrip() {
        let server = SyncServer::default();
        let request = SyncMessage::Handshake(Handshake::new(doc(), UserId::new("alice"), DocumentState::text("hi")));
        let frame = encode_frame(&request).unwrap();
        let response = server.handle_frame(&frame).unwrap().unwrap();
        match decode_frame(&response).unwrap() {
            SyncMessage::HandshakeAck(ack) => assert_eq!(ack.state.content, "hi"),
            other => panic!("unexpected response: {other:?}"),
        }
        assert!(server.handle_frame(&[]).is_err());
    }
}
