//! Per-document sync state.

use concord_ot::{Operation, OperationId};
use std::collections::VecDeque;

/// Lifecycle of an open document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Not open.
    Uninitialized,
    /// Open, waiting for the first successful handshake.
    Initializing,
    /// Idle and consistent with the last known server version.
    Synced,
    /// A sync cycle is running.
    Syncing,
    /// A conflict is waiting for a manual resolution.
    Conflicted,
}

impl SyncPhase {
    /// Returns true if a new sync cycle may start.
    pub fn can_start_sync(&self) -> bool {
        !matches!(self, SyncPhase::Uninitialized | SyncPhase::Syncing)
    }
}

/// Versions and queues of one document.
#[derive(Debug, Clone)]
pub struct SyncState {
    /// Local operations applied on this replica.
    pub local_version: u64,
    /// Server operations integrated on this replica.
    pub server_version: u64,
    /// Local operations not yet acknowledged, in creation order.
    pub pending_operations: VecDeque<Operation>,
    /// Recently acknowledged operations, oldest first.
    pub acknowledged_operations: VecDeque<Operation>,
    /// Completion time of the last successful cycle, in milliseconds.
    pub last_sync_timestamp: Option<u64>,
    /// Whether a cycle is running.
    pub is_syncing: bool,
    /// Whether a conflict is waiting for a manual resolution.
    pub has_conflicts: bool,
    acknowledged_limit: usize,
}

impl SyncState {
    /// Creates an empty state.
    pub fn new(acknowledged_limit: usize) -> Self {
        Self {
            local_version: 0,
            server_version: 0,
            pending_operations: VecDeque::new(),
            acknowledged_operations: VecDeque::new(),
            last_sync_timestamp: None,
            is_syncing: false,
            has_conflicts: false,
            acknowledged_limit: acknowledged_limit.max(1),
        }
    }

    /// Moves a pending operation to the acknowledged queue. Returns false
    /// if it was not pending.
    pub fn acknowledge(&mut self, id: &OperationId) -> bool {
        let Some(index) = self.pending_operations.iter().position(|op| op.id == *id) else {
            return false;
        };
        if let Some(op) = self.pending_operations.remove(index) {
            self.push_acknowledged(op);
        }
        true
    }

    /// Records an operation the server is known to hold.
    pub fn push_acknowledged(&mut self, op: Operation) {
        self.acknowledged_operations.push_back(op);
        while self.acknowledged_operations.len() > self.acknowledged_limit {
            self.acknowledged_operations.pop_front();
        }
    }

    /// Returns true if the operation was acknowledged recently.
    pub fn is_acknowledged(&self, id: &OperationId) -> bool {
        self.acknowledged_operations.iter().any(|op| op.id == *id)
    }
}
