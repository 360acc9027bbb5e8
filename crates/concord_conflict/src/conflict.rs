//! Conflict records and resolution strategies.

use concord_ot::{DocumentId, Operation, OperationId, UserId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Deterministic conflict identifier derived from the conflicting
/// operation ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictId(String);

impl ConflictId {
    /// Wraps an existing id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derives the id from a set of operation ids. Order does not matter.
    pub fn from_operations<'a>(ids: impl IntoIterator<Item = &'a OperationId>) -> Self {
        let mut ids: Vec<&str> = ids.into_iter().map(|id| id.as_str()).collect();
        ids.sort_unstable();

        let mut hasher = Sha256::new();
        for id in ids {
            hasher.update(id.as_bytes());
            hasher.update([0u8]);
        }
        let digest = hasher.finalize();
        let hex: String = digest[..16].iter().map(|b| format!("{:02x}", b)).collect();
        Self(format!("conflict-{hex}"))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The detection rule that matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    /// Two text ranges intersect.
    OverlappingText,
    /// Two deletes target the same position or node.
    ConcurrentDelete,
    /// Two writes to the same attribute of the same element.
    Attribute,
    /// A node is deleted while another operation updates it.
    Structural,
}

impl ConflictKind {
    /// Returns the kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::OverlappingText => "overlapping-text",
            ConflictKind::ConcurrentDelete => "concurrent-delete",
            ConflictKind::Attribute => "attribute",
            ConflictKind::Structural => "structural",
        }
    }

    /// Converts to a wire code.
    pub fn to_code(&self) -> u8 {
        match self {
            ConflictKind::OverlappingText => 1,
            ConflictKind::ConcurrentDelete => 2,
            ConflictKind::Attribute => 3,
            ConflictKind::Structural => 4,
        }
    }

    /// Converts from a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ConflictKind::OverlappingText),
            2 => Some(ConflictKind::ConcurrentDelete),
            3 => Some(ConflictKind::Attribute),
            4 => Some(ConflictKind::Structural),
            _ => None,
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conflict severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    /// Cosmetic (attributes).
    Low,
    /// Redundant but harmless (duplicate deletes).
    Medium,
    /// Content or structure at stake.
    High,
}

/// How a conflict is resolved.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    /// The latest operation wins (timestamp, then id).
    LastWriterWins,
    /// The earliest operation wins (timestamp, then id).
    FirstWriterWins,
    /// The author with the highest priority wins.
    UserPriority,
    /// Both operations are kept and transformed against each other.
    #[default]
    OperationalTransform,
    /// A handler registered for the element type merges the operations.
    SemanticMerge,
    /// An externally supplied operation resolves the conflict.
    Manual,
}

impl ResolutionStrategy {
    /// Returns the kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::LastWriterWins => "last-writer-wins",
            ResolutionStrategy::FirstWriterWins => "first-writer-wins",
            ResolutionStrategy::UserPriority => "user-priority",
            ResolutionStrategy::OperationalTransform => "operational-transform",
            ResolutionStrategy::SemanticMerge => "semantic-merge",
            ResolutionStrategy::Manual => "manual",
        }
    }

    /// Returns true if the strategy resolves without outside input.
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, ResolutionStrategy::Manual)
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority of a user for the `user-priority` strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPriority {
    /// Higher wins. Users without an entry have priority 0.
    pub priority: i32,
    /// Free-form role label.
    pub role: Option<String>,
}

impl UserPriority {
    /// Creates a priority entry.
    pub fn new(priority: i32, role: impl Into<String>) -> Self {
        Self {
            priority,
            role: Some(role.into()),
        }
    }
}

/// Outcome of resolving a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolution {
    /// Strategy that produced the outcome.
    pub strategy: ResolutionStrategy,
    /// Author of the winning operation, for winner strategies.
    pub winner_user_id: Option<UserId>,
    /// Operation to integrate in place of the conflict's subject.
    pub merged_operation: Option<Operation>,
    /// Transformed forms of every operation, kept for audit.
    #[serde(default)]
    pub transformed: Vec<Operation>,
    /// Resolution time in milliseconds.
    pub timestamp: u64,
}

/// A detected conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictData {
    /// Deterministic id.
    pub id: ConflictId,
    /// Document the operations belong to, when known.
    pub document_id: Option<DocumentId>,
    /// Matched rule.
    pub kind: ConflictKind,
    /// Severity of the matched rule.
    pub severity: Severity,
    /// Whether strategies other than OT or manual may resolve it.
    pub auto_resolvable: bool,
    /// Element type of the targeted node, for semantic rules.
    pub element_type: Option<String>,
    /// Conflicting operations. The last one is the subject (the incoming
    /// operation when detected by an engine).
    pub operations: Vec<Operation>,
    /// Distinct authors, in operation order.
    pub users: Vec<UserId>,
    /// Detection time in milliseconds.
    pub timestamp: u64,
    /// Whether a resolution has been recorded.
    pub resolved: bool,
    /// Recorded resolution.
    pub resolution: Option<ConflictResolution>,
}

impl ConflictData {
    /// Returns the subject operation.
    pub fn subject(&self) -> Option<&Operation> {
        self.operations.last()
    }

    /// Returns true if the operation takes part in this conflict.
    pub fn involves(&self, id: &OperationId) -> bool {
        self.operations.iter().any(|op| op.id == *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_id_is_order_independent() {
        let a = OperationId::new("op-a");
        let b = OperationId::new("op-b");
        let id1 = ConflictId::from_operations([&a, &b]);
        let id2 = ConflictId::from_operations([&b, &a]);
        assert_eq!(id1, id2);
        assert!(id1.as_str().starts_with("conflict-"));
        assert_eq!(id1.as_str().len(), "conflict-".len() + 32);

        let c = OperationId::new("op-c");
        assert_ne!(id1, ConflictId::from_operations([&a, &c]));
    }

    #[test]
    fn kind_codes() {
        for kind in [
            ConflictKind::OverlappingText,
            ConflictKind::ConcurrentDelete,
            ConflictKind::Attribute,
            ConflictKind::Structural,
        ] {
            assert_eq!(ConflictKind::from_code(kind.to_code()), Some(kind));
        }
        assert_eq!(ConflictKind::from_code(0), None);
    }

    #[test]
    fn strategy_names() {
        assert_eq!(ResolutionStrategy::default(), ResolutionStrategy::OperationalTransform);
        assert_eq!(ResolutionStrategy::LastWriterWins.to_string(), "last-writer-wins");
        let json = serde_json::to_string(&ResolutionStrategy::SemanticMerge).unwrap();
        assert_eq!(json, "\"semantic-merge\"");
        assert!(!ResolutionStrategy::Manual.auto_resolves());
    }
}
