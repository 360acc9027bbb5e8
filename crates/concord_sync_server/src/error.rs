//! Server error types.

use concord_ot::{DocumentId, OperationId, OtError};
use concord_sync_protocol::{MessageType, ProtocolError};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The document was never opened with a handshake.
    #[error("unknown document: {0}")]
    UnknownDocument(DocumentId),

    /// The client claims a base version the server has not reached.
    #[error("base version {base} is ahead of server version {server}")]
    VersionAhead {
        /// Client's base version.
        base: u64,
        /// Current server version.
        server: u64,
    },

    /// The client's base version is older than the retained history.
    #[error("base version {base} predates retained history starting at {oldest}")]
    HistoryTruncated {
        /// Client's base version.
        base: u64,
        /// Oldest version still covered by the history.
        oldest: u64,
    },

    /// A pushed operation does not fit the authoritative document.
    #[error("operation {operation} rejected: {source}")]
    InvalidOperation {
        /// Offending operation.
        operation: OperationId,
        /// Validation failure.
        #[source]
        source: OtError,
    },

    /// The initial state of a new document is malformed.
    #[error("invalid initial state: {0}")]
    InvalidState(#[source] OtError),

    /// Malformed frame.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A message only the server sends was received.
    #[error("unexpected message type: {0:?}")]
    UnexpectedMessage(MessageType),
}

impl ServerError {
    /// Returns true if the client must roll back and refetch.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ServerError::VersionAhead { .. }
                | ServerError::HistoryTruncated { .. }
                | ServerError::InvalidOperation { .. }
        )
    }

    /// Returns true if this is a client error.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::UnknownDocument(_)
                | ServerError::InvalidState(_)
                | ServerError::Protocol(_)
                | ServerError::UnexpectedMessage(_)
        ) || self.is_conflict()
    }
}
