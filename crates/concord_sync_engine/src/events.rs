//! Engine events.
//!
//! Subscribers receive every event published after they subscribed, in
//! publication order, over a std channel.

use concord_conflict::{ConflictId, ConflictKind};
use concord_ot::{now_millis, DocumentId, OperationId};
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// Where an applied operation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOrigin {
    /// Produced by the local editing surface.
    Local,
    /// Received from the server.
    Remote,
}

/// What happened.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEventKind {
    /// A sync cycle started.
    SyncStart,
    /// A sync cycle finished.
    SyncComplete {
        /// Operations pushed.
        pushed: usize,
        /// Remote operations integrated.
        fetched: usize,
    },
    /// A sync step failed.
    SyncError {
        /// Error description.
        message: String,
        /// Whether the next cycle may succeed.
        retryable: bool,
    },
    /// A conflict was detected between a remote and a pending operation.
    ConflictDetected {
        /// Conflict id.
        conflict_id: ConflictId,
        /// Matched rule.
        kind: ConflictKind,
    },
    /// An operation changed the local document.
    OperationApplied {
        /// Applied operation.
        operation_id: OperationId,
        /// Its origin.
        origin: OperationOrigin,
    },
}

impl SyncEventKind {
    /// Event name as used by editing surfaces.
    pub fn name(&self) -> &'static str {
        match self {
            SyncEventKind::SyncStart => "sync-start",
            SyncEventKind::SyncComplete { .. } => "sync-complete",
            SyncEventKind::SyncError { .. } => "sync-error",
            SyncEventKind::ConflictDetected { .. } => "conflict-detected",
            SyncEventKind::OperationApplied { .. } => "operation-applied",
        }
    }
}

/// An event about one document.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncEvent {
    /// Document concerned.
    pub document_id: DocumentId,
    /// Time in milliseconds.
    pub timestamp: u64,
    /// Payload.
    pub kind: SyncEventKind,
}

impl SyncEvent {
    /// Creates an event stamped with the current time.
    pub fn new(document_id: DocumentId, kind: SyncEventKind) -> Self {
        Self {
            document_id,
            timestamp: now_millis(),
            kind,
        }
    }
}

/// Distributes events to subscribers.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Sender<SyncEvent>>>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Sends an event to every live subscriber and drops the others.
    pub fn publish(&self, event: SyncEvent) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Shorthand for [`EventBus::publish`].
    pub fn emit(&self, document_id: &DocumentId, kind: SyncEventKind) {
        self.publish(SyncEvent::new(document_id.clone(), kind));
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
