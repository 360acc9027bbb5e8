//! Pairwise detection rules.

use crate::conflict::{ConflictKind, Severity};
use concord_ot::{Operation, OperationKind};

/// A binary predicate over two concurrent operations with its tags.
#[derive(Debug, Clone, Copy)]
pub struct DetectionRule {
    /// Kind reported when the predicate matches.
    pub kind: ConflictKind,
    /// Severity tag.
    pub severity: Severity,
    /// Whether any strategy may resolve the conflict.
    pub auto_resolvable: bool,
    /// The predicate. Must be symmetric.
    pub matches: fn(&Operation, &Operation) -> bool,
}

/// The rule that matched a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleMatch {
    /// Matched kind.
    pub kind: ConflictKind,
    /// Severity tag.
    pub severity: Severity,
    /// Auto-resolvable flag.
    pub auto_resolvable: bool,
}

impl From<&DetectionRule> for RuleMatch {
    fn from(rule: &DetectionRule) -> Self {
        Self {
            kind: rule.kind,
            severity: rule.severity,
            auto_resolvable: rule.auto_resolvable,
        }
    }
}

/// Ordered rule set. The first matching rule wins.
#[derive(Debug, Clone)]
pub struct ConflictDetector {
    rules: Vec<DetectionRule>,
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self {
            rules: vec![
                DetectionRule {
                    kind: ConflictKind::Structural,
                    severity: Severity::High,
                    auto_resolvable: false,
                    matches: structural,
                },
                DetectionRule {
                    kind: ConflictKind::ConcurrentDelete,
                    severity: Severity::Medium,
                    auto_resolvable: true,
                    matches: concurrent_delete,
                },
                DetectionRule {
                    kind: ConflictKind::Attribute,
                    severity: Severity::Low,
                    auto_resolvable: true,
                    matches: attribute,
                },
                DetectionRule {
                    kind: ConflictKind::OverlappingText,
                    severity: Severity::High,
                    auto_resolvable: true,
                    matches: overlapping_text,
                },
            ],
        }
    }
}

impl ConflictDetector {
    /// Creates the default rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a detector from custom rules.
    pub fn with_rules(rules: Vec<DetectionRule>) -> Self {
        Self { rules }
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[DetectionRule] {
        &self.rules
    }

    /// Returns the first rule matching the pair, if any.
    pub fn detect(&self, a: &Operation, b: &Operation) -> Option<RuleMatch> {
        if a.id == b.id || a.is_noop() || b.is_noop() {
            return None;
        }
        self.rules
            .iter()
            .find(|rule| (rule.matches)(a, b))
            .map(RuleMatch::from)
    }
}

fn deletes_updated(delete: &Operation, update: &Operation) -> bool {
    match (&delete.kind, &update.kind) {
        (OperationKind::DeleteNode { node, removed }, OperationKind::UpdateNode { node: target, .. }) => {
            match removed {
                Some(r) => r.node.contains(target),
                None => node == target,
            }
        }
        _ => false,
    }
}

fn structural(a: &Operation, b: &Operation) -> bool {
    deletes_updated(a, b) || deletes_updated(b, a)
}

fn concurrent_delete(a: &Operation, b: &Operation) -> bool {
    match (&a.kind, &b.kind) {
        (OperationKind::Delete { position: p, .. }, OperationKind::Delete { position: q, .. }) => p == q,
        (OperationKind::DeleteNode { node: x, .. }, OperationKind::DeleteNode { node: y, .. }) => x == y,
        _ => false,
    }
}

fn attribute_target(op: &Operation) -> Option<(&concord_ot::NodeId, &str)> {
    match &op.kind {
        OperationKind::SetAttribute { node, name, .. } | OperationKind::RemoveAttribute { node, name, .. } => {
            Some((node, name.as_str()))
        }
        _ => None,
    }
}

fn attribute(a: &Operation, b: &Operation) -> bool {
    match (attribute_target(a), attribute_target(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Range a text edit touches. Inserts span their own text.
fn text_span(op: &Operation) -> Option<(usize, usize)> {
    let start = op.position()?;
    let len = match &op.kind {
        OperationKind::Insert { text, .. } => text.chars().count(),
        OperationKind::Delete { length, .. } => *length,
        OperationKind::Replace { length, text, .. } => (*length).max(text.chars().count()),
        _ => return None,
    };
    Some((start, start + len))
}

fn overlapping_text(a: &Operation, b: &Operation) -> bool {
    match (text_span(a), text_span(b)) {
        (Some((s1, e1)), Some((s2, e2))) => s1 < e2 && s2 < e1,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overlapping_text_edits() {
        let detector = ConflictDetector::new();
        let a = Operation::delete("a", 1, 1, 3);
        let b = Operation::insert("b", 1, 2, "X");
        let m = detector.detect(&a, &b).unwrap();
        assert_eq!(m.kind, ConflictKind::OverlappingText);
        assert_eq!(m.severity, Severity::High);
        assert!(m.auto_resolvable);

        let far = Operation::insert("b", 1, 10, "X");
        assert!(detector.detect(&a, &far).is_none());
    }

    #[test]
    fn identical_delete_positions() {
        let detector = ConflictDetector::new();
        let m = detector
            .detect(&Operation::delete("a", 1, 4, 2), &Operation::delete("b", 1, 4, 5))
            .unwrap();
        assert_eq!(m.kind, ConflictKind::ConcurrentDelete);
        assert_eq!(m.severity, Severity::Medium);
    }

    #[test]
    fn attribute_writes() {
        let detector = ConflictDetector::new();
        let a = Operation::set_attribute("a", 1, "p1", "bold", json!(true));
        let b = Operation::remove_attribute("b", 1, "p1", "bold");
        assert_eq!(detector.detect(&a, &b).unwrap().kind, ConflictKind::Attribute);

        let c = Operation::set_attribute("b", 1, "p1", "italic", json!(true));
        assert!(detector.detect(&a, &c).is_none());
    }

    #[test]
    fn delete_versus_update_is_structural() {
        let detector = ConflictDetector::new();
        let a = Operation::delete_node("a", 1, "p1");
        let b = Operation::update_node("b", 1, "p1", [("x".to_string(), Some(json!(1)))]);
        let m = detector.detect(&b, &a).unwrap();
        assert_eq!(m.kind, ConflictKind::Structural);
        assert!(!m.auto_resolvable);
    }

    #[test]
    fn same_operation_never_conflicts() {
        let detector = ConflictDetector::new();
        let a = Operation::delete("a", 1, 0, 3);
        assert!(detector.detect(&a, &a.clone()).is_none());
        assert!(detector.detect(&a, &a.voided().with_id("other")).is_none());
    }
}
