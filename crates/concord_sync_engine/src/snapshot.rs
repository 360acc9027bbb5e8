//! Document snapshots for crash recovery and branch switching.

use concord_ot::{now_millis, Document, DocumentId, DocumentState, Operation, OtResult};
use serde::{Deserialize, Serialize};

/// Full copy of a document replica and its versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    /// Document id.
    pub document_id: DocumentId,
    /// Content and nodes.
    pub state: DocumentState,
    /// Replica version.
    pub version: u64,
    /// Server version integrated at capture time.
    pub server_version: u64,
    /// Local version at capture time.
    pub local_version: u64,
    /// Retained history, oldest first.
    pub operations: Vec<Operation>,
    /// Capture time in milliseconds.
    pub timestamp: u64,
}

impl DocumentSnapshot {
    /// Captures a document together with its sync versions.
    pub fn capture(document: &Document, server_version: u64, local_version: u64) -> Self {
        Self {
            document_id: document.id().clone(),
            state: document.state(),
            version: document.version(),
            server_version,
            local_version,
            operations: document.log().iter().cloned().collect(),
            timestamp: now_millis(),
        }
    }

    /// Rebuilds the document.
    pub fn to_document(&self, history_limit: usize, compress_window_ms: u64) -> OtResult<Document> {
        Ok(
            Document::from_state(self.document_id.clone(), self.state.clone(), self.version)?
                .with_history(history_limit, compress_window_ms)
                .with_recorded(self.operations.iter().cloned()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_and_rebuild() {
        let mut doc = Document::new("doc", "abc");
        let op = Operation::insert("a", 1, 3, "d");
        doc.apply_in_place(&op).unwrap();

        let snapshot = DocumentSnapshot::capture(&doc, 7, 1);
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.operations.len(), 1);

        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: DocumentSnapshot = serde_json::from_str(&json).unwrap();
        let mut rebuilt = restored.to_document(100, 0).unwrap();
        assert_eq!(rebuilt.content(), "abcd");
        assert_eq!(rebuilt.version(), 1);
        assert!(rebuilt.has_applied(&op.id));
        assert_eq!(rebuilt.apply_in_place(&op).unwrap(), concord_ot::ApplyOutcome::Duplicate);
    }
}
