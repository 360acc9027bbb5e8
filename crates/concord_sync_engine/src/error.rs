//! Error types for the sync engine.

use concord_conflict::ResolveError;
use concord_ot::{DocumentId, OtError};
use concord_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The operation does not fit the document. Never retried.
    #[error("validation error: {0}")]
    Validation(#[from] OtError),

    /// Send or fetch failure. Pending operations stay queued.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Whether the next cycle may succeed.
        retryable: bool,
    },

    /// No response arrived within the request timeout.
    #[error("request timed out")]
    Timeout,

    /// A conflict was detected and is waiting for a manual resolution.
    #[error("unresolved conflict: {0}")]
    Conflict(String),

    /// Versions could not be reconciled after repeated attempts.
    #[error("fatal sync error on {document}: {reason}")]
    FatalSync {
        /// Affected document.
        document: DocumentId,
        /// Reason.
        reason: String,
    },

    /// The server could not reconcile a push.
    #[error("server reported a conflict: {0}")]
    ServerConflict(String),

    /// The server answered with an error message.
    #[error("server error: {0}")]
    Rejected(String),

    /// The document is not open.
    #[error("document not found: {0}")]
    DocumentNotFound(DocumentId),

    /// The document is already open.
    #[error("document already initialized: {0}")]
    AlreadyInitialized(DocumentId),

    /// Unexpected or malformed message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Conflict resolution failed.
    #[error("resolution error: {0}")]
    Resolve(#[from] ResolveError),
}

impl SyncError {
    /// Creates a retryable network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable network error.
    pub fn network_fatal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried on a later cycle.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::ServerConflict(_) => true,
            SyncError::Rejected(_) => true,
            _ => false,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}
