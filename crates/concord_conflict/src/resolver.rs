//! Conflict resolver: active-conflict table and strategies.

use crate::conflict::{
    ConflictData, ConflictId, ConflictKind, ConflictResolution, ResolutionStrategy, Severity,
    UserPriority,
};
use crate::detector::{ConflictDetector, RuleMatch};
use crate::error::{ResolveError, ResolveResult};
use crate::stats::ResolverStats;
use concord_ot::{now_millis, transform_against, DocumentId, NodeId, Operation, OperationId, UserId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Produces a merged operation for conflicts on one element type.
///
/// The sync engine integrates the conflicting operations first and then
/// applies the returned operation as a follow-up edit, so it should bring
/// the element to the merged result. Closures with the matching signature
/// implement this trait.
pub trait SemanticMergeHandler: Send + Sync {
    /// Merges the conflicting operations.
    fn merge(&self, conflict: &ConflictData) -> ResolveResult<Operation>;
}

impl<F> SemanticMergeHandler for F
where
    F: Fn(&ConflictData) -> ResolveResult<Operation> + Send + Sync,
{
    fn merge(&self, conflict: &ConflictData) -> ResolveResult<Operation> {
        self(conflict)
    }
}

/// Resolver configuration.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Strategy used when the caller does not pick one.
    pub default_strategy: ResolutionStrategy,
    /// Resolved conflicts kept in the table before the oldest are dropped.
    pub max_resolved: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            default_strategy: ResolutionStrategy::OperationalTransform,
            max_resolved: 1000,
        }
    }
}

impl ResolverConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default strategy.
    pub fn with_default_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// Sets how many resolved conflicts are retained.
    pub fn with_max_resolved(mut self, max: usize) -> Self {
        self.max_resolved = max;
        self
    }
}

/// Answer to [`ConflictResolver::predict_conflict`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictPrediction {
    /// Kind of the most severe predicted conflict.
    pub kind: ConflictKind,
    /// Its severity.
    pub severity: Severity,
    /// Strategy the caller should expect to need.
    pub suggested_strategy: ResolutionStrategy,
    /// Operation the new one would conflict with.
    pub conflicting_with: OperationId,
}

/// Detects, records and resolves conflicts.
///
/// Shared between engines behind an `Arc`; all state sits behind
/// `parking_lot` locks.
pub struct ConflictResolver {
    config: ResolverConfig,
    detector: ConflictDetector,
    active: RwLock<HashMap<ConflictId, ConflictData>>,
    priorities: RwLock<HashMap<UserId, UserPriority>>,
    semantic_rules: RwLock<HashMap<(String, ConflictKind), Arc<dyn SemanticMergeHandler>>>,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(ResolverConfig::default())
    }
}

impl ConflictResolver {
    /// Creates a resolver with the default rule set.
    pub fn new(config: ResolverConfig) -> Self {
        Self::with_detector(config, ConflictDetector::new())
    }

    /// Creates a resolver with a custom detector.
    pub fn with_detector(config: ResolverConfig, detector: ConflictDetector) -> Self {
        Self {
            config,
            detector,
            active: RwLock::new(HashMap::new()),
            priorities: RwLock::new(HashMap::new()),
            semantic_rules: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Returns the detector.
    pub fn detector(&self) -> &ConflictDetector {
        &self.detector
    }

    /// Sets a user's priority.
    pub fn set_user_priority(&self, user: impl Into<UserId>, priority: UserPriority) {
        self.priorities.write().insert(user.into(), priority);
    }

    /// Returns a user's priority (0 when unset).
    pub fn user_priority(&self, user: &UserId) -> i32 {
        self.priorities
            .read()
            .get(user)
            .map(|p| p.priority)
            .unwrap_or(0)
    }

    /// Registers a semantic merge handler for an element type and kind.
    pub fn register_semantic_rule(
        &self,
        element_type: impl Into<String>,
        kind: ConflictKind,
        handler: Arc<dyn SemanticMergeHandler>,
    ) {
        self.semantic_rules
            .write()
            .insert((element_type.into(), kind), handler);
    }

    /// Runs every rule over every pair and registers the matches.
    pub fn detect_conflicts(&self, operations: &[Operation]) -> Vec<ConflictData> {
        let mut found = Vec::new();
        for (i, a) in operations.iter().enumerate() {
            for b in &operations[i + 1..] {
                if let Some(rule) = self.detector.detect(a, b) {
                    found.push(self.register(None, rule, None, a, b));
                }
            }
        }
        found
    }

    /// Checks an incoming operation against a pending queue and registers
    /// the matches. The incoming operation is the subject of each conflict.
    pub fn detect_between<F>(
        &self,
        document_id: &DocumentId,
        incoming: &Operation,
        pending: &[Operation],
        element_type: F,
    ) -> Vec<ConflictData>
    where
        F: Fn(&NodeId) -> Option<String>,
    {
        let element = incoming.target_node().and_then(&element_type);
        pending
            .iter()
            .filter_map(|local| {
                let rule = self.detector.detect(local, incoming)?;
                let element = element
                    .clone()
                    .or_else(|| local.target_node().and_then(&element_type));
                Some(self.register(Some(document_id.clone()), rule, element, local, incoming))
            })
            .collect()
    }

    fn register(
        &self,
        document_id: Option<DocumentId>,
        rule: RuleMatch,
        element_type: Option<String>,
        first: &Operation,
        subject: &Operation,
    ) -> ConflictData {
        let id = ConflictId::from_operations([&first.id, &subject.id]);
        let mut active = self.active.write();
        if let Some(existing) = active.get(&id) {
            return existing.clone();
        }

        let mut users = vec![first.user_id.clone()];
        if subject.user_id != first.user_id {
            users.push(subject.user_id.clone());
        }
        let conflict = ConflictData {
            id: id.clone(),
            document_id,
            kind: rule.kind,
            severity: rule.severity,
            auto_resolvable: rule.auto_resolvable,
            element_type,
            operations: vec![first.clone(), subject.clone()],
            users,
            timestamp: now_millis(),
            resolved: false,
            resolution: None,
        };
        debug!(conflict = %id, kind = %rule.kind, "conflict registered");
        active.insert(id, conflict.clone());
        conflict
    }

    /// Resolves a registered conflict with the resolver's default strategy.
    pub fn resolve_default(&self, id: &ConflictId) -> ResolveResult<ConflictResolution> {
        self.resolve(id, self.config.default_strategy, None)
    }

    /// Resolves a registered conflict.
    ///
    /// Conflicts that are not auto-resolvable are always resolved by
    /// operational transform unless `manual` is chosen. `manual` requires a
    /// payload.
    pub fn resolve(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
        manual: Option<Operation>,
    ) -> ResolveResult<ConflictResolution> {
        let conflict = self
            .active
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| ResolveError::UnknownConflict(id.clone()))?;

        if let Some(existing) = &conflict.resolution {
            if existing.strategy == strategy {
                return Ok(existing.clone());
            }
            return Err(ResolveError::StrategyNotApplicable {
                conflict: id.clone(),
                strategy,
                reason: format!("already resolved with {}", existing.strategy),
            });
        }
        if conflict.operations.is_empty() {
            return Err(ResolveError::EmptyConflict(id.clone()));
        }

        let strategy = if !conflict.auto_resolvable && strategy != ResolutionStrategy::Manual {
            ResolutionStrategy::OperationalTransform
        } else {
            strategy
        };

        let resolution = match strategy {
            ResolutionStrategy::LastWriterWins => self.winner(&conflict, strategy, write_order),
            ResolutionStrategy::FirstWriterWins => self.winner(&conflict, strategy, |a, b| write_order(b, a)),
            ResolutionStrategy::UserPriority => self.winner(&conflict, strategy, |a, b| {
                self.user_priority(&a.user_id)
                    .cmp(&self.user_priority(&b.user_id))
                    .then_with(|| write_order(a, b))
            }),
            ResolutionStrategy::OperationalTransform => Self::transformed(&conflict),
            ResolutionStrategy::SemanticMerge => self.semantic(&conflict)?,
            ResolutionStrategy::Manual => {
                let merged = manual.ok_or_else(|| ResolveError::AwaitingManualResolution(id.clone()))?;
                ConflictResolution {
                    strategy,
                    winner_user_id: Some(merged.user_id.clone()),
                    merged_operation: Some(merged),
                    transformed: Vec::new(),
                    timestamp: now_millis(),
                }
            }
        };

        self.record(id, resolution.clone());
        Ok(resolution)
    }

    fn winner<F>(&self, conflict: &ConflictData, strategy: ResolutionStrategy, cmp: F) -> ConflictResolution
    where
        F: Fn(&Operation, &Operation) -> std::cmp::Ordering,
    {
        let winner = conflict.operations.iter().max_by(|a, b| cmp(a, b)).cloned();
        ConflictResolution {
            strategy,
            winner_user_id: winner.as_ref().map(|op| op.user_id.clone()),
            merged_operation: winner,
            transformed: Vec::new(),
            timestamp: now_millis(),
        }
    }

    fn transformed(conflict: &ConflictData) -> ConflictResolution {
        let (subject, others) = match conflict.operations.split_last() {
            Some(parts) => parts,
            None => {
                return ConflictResolution {
                    strategy: ResolutionStrategy::OperationalTransform,
                    winner_user_id: None,
                    merged_operation: None,
                    transformed: Vec::new(),
                    timestamp: now_millis(),
                }
            }
        };

        let merged = others
            .iter()
            .fold(subject.clone(), |op, other| transform_against(&op, other));
        let mut transformed: Vec<Operation> = others
            .iter()
            .map(|other| transform_against(other, subject))
            .collect();
        transformed.push(merged.clone());

        ConflictResolution {
            strategy: ResolutionStrategy::OperationalTransform,
            winner_user_id: None,
            merged_operation: Some(merged),
            transformed,
            timestamp: now_millis(),
        }
    }

    fn semantic(&self, conflict: &ConflictData) -> ResolveResult<ConflictResolution> {
        let handler = conflict.element_type.as_ref().and_then(|element| {
            self.semantic_rules
                .read()
                .get(&(element.clone(), conflict.kind))
                .cloned()
        });

        match handler {
            Some(handler) => {
                let merged = handler.merge(conflict)?;
                Ok(ConflictResolution {
                    strategy: ResolutionStrategy::SemanticMerge,
                    winner_user_id: None,
                    merged_operation: Some(merged),
                    transformed: Vec::new(),
                    timestamp: now_millis(),
                })
            }
            None => {
                debug!(conflict = %conflict.id, "no semantic rule, falling back to last-writer-wins");
                Ok(self.winner(conflict, ResolutionStrategy::LastWriterWins, write_order))
            }
        }
    }

    fn record(&self, id: &ConflictId, resolution: ConflictResolution) {
        let mut active = self.active.write();
        if let Some(conflict) = active.get_mut(id) {
            debug!(conflict = %id, strategy = %resolution.strategy, "conflict resolved");
            conflict.resolved = true;
            conflict.resolution = Some(resolution);
        }

        let resolved = active.values().filter(|c| c.resolved).count();
        if resolved > self.config.max_resolved {
            let mut oldest: Vec<(u64, ConflictId)> = active
                .values()
                .filter(|c| c.resolved)
                .map(|c| (c.timestamp, c.id.clone()))
                .collect();
            oldest.sort();
            for (_, id) in oldest.into_iter().take(resolved - self.config.max_resolved) {
                active.remove(&id);
            }
            warn!(kept = self.config.max_resolved, "resolved conflict table trimmed");
        }
    }

    /// Predicts whether `operation` would conflict with any of `existing`,
    /// without registering anything.
    pub fn predict_conflict(&self, operation: &Operation, existing: &[Operation]) -> Option<ConflictPrediction> {
        existing
            .iter()
            .filter_map(|other| {
                self.detector
                    .detect(other, operation)
                    .map(|rule| (rule, other.id.clone()))
            })
            .max_by_key(|(rule, _)| rule.severity)
            .map(|(rule, conflicting_with)| ConflictPrediction {
                kind: rule.kind,
                severity: rule.severity,
                suggested_strategy: Self::suggest(rule),
                conflicting_with,
            })
    }

    fn suggest(rule: RuleMatch) -> ResolutionStrategy {
        if !rule.auto_resolvable {
            return ResolutionStrategy::Manual;
        }
        match rule.kind {
            ConflictKind::Attribute => ResolutionStrategy::LastWriterWins,
            _ => ResolutionStrategy::OperationalTransform,
        }
    }

    /// Returns a registered conflict.
    pub fn get(&self, id: &ConflictId) -> Option<ConflictData> {
        self.active.read().get(id).cloned()
    }

    /// Conflicts registered for a document, oldest first.
    pub fn conflicts_for(&self, document_id: &DocumentId) -> Vec<ConflictData> {
        let mut conflicts: Vec<ConflictData> = self
            .active
            .read()
            .values()
            .filter(|c| c.document_id.as_ref() == Some(document_id))
            .cloned()
            .collect();
        conflicts.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        conflicts
    }

    /// Conflicts without a resolution.
    pub fn pending_conflicts(&self) -> Vec<ConflictData> {
        self.active
            .read()
            .values()
            .filter(|c| !c.resolved)
            .cloned()
            .collect()
    }

    /// Removes a conflict that no longer needs a resolution, such as one
    /// superseded by a rollback. Returns the removed entry.
    pub fn dismiss(&self, id: &ConflictId) -> Option<ConflictData> {
        let removed = self.active.write().remove(id);
        if removed.is_some() {
            debug!(conflict = %id, "conflict dismissed");
        }
        removed
    }

    /// Drops resolved conflicts. Returns how many were dropped.
    pub fn clear_resolved(&self) -> usize {
        let mut active = self.active.write();
        let before = active.len();
        active.retain(|_, c| !c.resolved);
        before - active.len()
    }

    /// Counts over the active-conflict table.
    pub fn stats(&self) -> ResolverStats {
        let active = self.active.read();
        let mut stats = ResolverStats {
            total: active.len(),
            ..ResolverStats::default()
        };
        for conflict in active.values() {
            *stats.by_severity.entry(conflict.severity).or_default() += 1;
            match &conflict.resolution {
                Some(resolution) => {
                    stats.resolved += 1;
                    *stats.by_strategy.entry(resolution.strategy).or_default() += 1;
                }
                None => stats.pending += 1,
            }
        }
        stats
    }
}

/// Order of writes for the winner strategies: timestamp, ties broken by
/// operation id.
fn write_order(a: &Operation, b: &Operation) -> std::cmp::Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.id.cmp(&b.id))
        .then_with(|| a.user_id.cmp(&b.user_id))
}

impl std::fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("config", &self.config)
            .field("active", &self.active.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_ot::OperationKind;
    use serde_json::json;

    fn attribute_conflict(resolver: &ConflictResolver) -> (ConflictData, Operation, Operation) {
        let local = Operation::set_attribute("alice", 100, "p1", "color", json!("red")).with_id("op-1");
        let remote = Operation::set_attribute("bob", 200, "p1", "color", json!("blue")).with_id("op-2");
        let found = resolver.detect_between(
            &DocumentId::new("doc"),
            &remote,
            std::slice::from_ref(&local),
            |_| Some("paragraph".to_string()),
        );
        assert_eq!(found.len(), 1);
        (found[0].clone(), local, remote)
    }

    #[test]
    fn detect_conflicts_checks_all_pairs() {
        let resolver = ConflictResolver::default();
        let ops = vec![
            Operation::delete("a", 1, 0, 5),
            Operation::insert("b", 1, 2, "x"),
            Operation::insert("c", 1, 3, "y"),
            Operation::insert("d", 1, 50, "far"),
        ];
        let found = resolver.detect_conflicts(&ops);
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|c| c.kind == ConflictKind::OverlappingText));
        assert_eq!(resolver.stats().total, 2);

        // Registration is idempotent.
        resolver.detect_conflicts(&ops);
        assert_eq!(resolver.stats().total, 2);
    }

    #[test]
    fn last_and_first_writer_wins() {
        let resolver = ConflictResolver::default();
        let (conflict, local, remote) = attribute_conflict(&resolver);
        assert_eq!(conflict.subject().unwrap().id, remote.id);
        assert_eq!(conflict.users.len(), 2);

        let res = resolver
            .resolve(&conflict.id, ResolutionStrategy::LastWriterWins, None)
            .unwrap();
        assert_eq!(res.merged_operation.unwrap().id, remote.id);
        assert_eq!(res.winner_user_id, Some(UserId::new("bob")));

        let other = ConflictResolver::default();
        let (conflict, _, _) = attribute_conflict(&other);
        let res = other
            .resolve(&conflict.id, ResolutionStrategy::FirstWriterWins, None)
            .unwrap();
        assert_eq!(res.merged_operation.unwrap().id, local.id);
    }

    #[test]
    fn timestamp_ties_break_on_id() {
        let resolver = ConflictResolver::default();
        let a = Operation::delete("a", 5, 3, 1).with_id("op-b");
        let b = Operation::delete("b", 5, 3, 1).with_id("op-a");
        let found = resolver.detect_conflicts(&[a.clone(), b]);
        let res = resolver
            .resolve(&found[0].id, ResolutionStrategy::LastWriterWins, None)
            .unwrap();
        assert_eq!(res.merged_operation.unwrap().id, a.id);
    }

    #[test]
    fn user_priority_defaults_to_zero() {
        let resolver = ConflictResolver::default();
        resolver.set_user_priority("alice", UserPriority::new(10, "owner"));
        assert_eq!(resolver.user_priority(&UserId::new("bob")), 0);

        let (conflict, local, _) = attribute_conflict(&resolver);
        let res = resolver
            .resolve(&conflict.id, ResolutionStrategy::UserPriority, None)
            .unwrap();
        assert_eq!(res.merged_operation.unwrap().id, local.id);
        assert_eq!(res.winner_user_id, Some(UserId::new("alice")));
    }

    #[test]
    fn operational_transform_keeps_audit_trail() {
        let resolver = ConflictResolver::default();
        let local = Operation::delete("a", 1, 1, 3).with_id("op-1");
        let remote = Operation::delete("b", 2, 2, 3).with_id("op-2");
        let found = resolver.detect_between(&DocumentId::new("doc"), &remote, &[local], |_| None);
        let res = resolver.resolve_default(&found[0].id).unwrap();
        assert_eq!(res.strategy, ResolutionStrategy::OperationalTransform);
        assert_eq!(res.transformed.len(), 2);
        let merged = res.merged_operation.unwrap();
        assert_eq!(merged.id.as_str(), "op-2");
        assert!(matches!(merged.kind, OperationKind::Delete { position: 1, length: 1, .. }));
    }

    #[test]
    fn semantic_merge_uses_handler_or_falls_back() {
        let resolver = ConflictResolver::default();
        resolver.register_semantic_rule(
            "paragraph",
            ConflictKind::Attribute,
            Arc::new(|conflict: &ConflictData| -> ResolveResult<Operation> {
                let subject = conflict.subject().cloned().ok_or_else(|| ResolveError::SemanticHandler("empty".into()))?;
                Ok(subject.with_kind(OperationKind::SetAttribute {
                    node: "p1".into(),
                    name: "color".into(),
                    value: json!("purple"),
                    previous: None,
                }))
            }),
        );
        let (conflict, _, _) = attribute_conflict(&resolver);
        let res = resolver
            .resolve(&conflict.id, ResolutionStrategy::SemanticMerge, None)
            .unwrap();
        assert_eq!(res.strategy, ResolutionStrategy::SemanticMerge);
        assert!(matches!(res.merged_operation.unwrap().kind, OperationKind::SetAttribute { ref value, .. } if *value == json!("purple")));

        let plain = ConflictResolver::default();
        let found = plain.detect_conflicts(&[
            Operation::delete("a", 1, 0, 2),
            Operation::delete("b", 2, 0, 4),
        ]);
        let res = plain
            .resolve(&found[0].id, ResolutionStrategy::SemanticMerge, None)
            .unwrap();
        assert_eq!(res.strategy, ResolutionStrategy::LastWriterWins);
    }

    #[test]
    fn structural_conflicts_force_transform_or_manual() {
        let resolver = ConflictResolver::default();
        let local = Operation::update_node("a", 1, "p1", [("x".to_string(), Some(json!(1)))]);
        let remote = Operation::delete_node("b", 2, "p1");
        let found = resolver.detect_between(&DocumentId::new("doc"), &remote, &[local], |_| None);
        assert!(!found[0].auto_resolvable);

        let res = resolver
            .resolve(&found[0].id, ResolutionStrategy::LastWriterWins, None)
            .unwrap();
        assert_eq!(res.strategy, ResolutionStrategy::OperationalTransform);
    }

    #[test]
    fn manual_requires_payload() {
        let resolver = ConflictResolver::default();
        let (conflict, _, remote) = attribute_conflict(&resolver);
        let err = resolver
            .resolve(&conflict.id, ResolutionStrategy::Manual, None)
            .unwrap_err();
        assert_eq!(err, ResolveError::AwaitingManualResolution(conflict.id.clone()));
        assert_eq!(resolver.stats().pending, 1);

        let payload = remote.with_kind(OperationKind::Noop);
        let res = resolver
            .resolve(&conflict.id, ResolutionStrategy::Manual, Some(payload.clone()))
            .unwrap();
        assert_eq!(res.merged_operation, Some(payload));
        assert!(resolver.get(&conflict.id).unwrap().resolved);

        let err = resolver
            .resolve(&conflict.id, ResolutionStrategy::LastWriterWins, None)
            .unwrap_err();
        assert!(matches!(err, ResolveError::StrategyNotApplicable { .. }));
    }

    #[test]
    fn unknown_conflict() {
        let resolver = ConflictResolver::default();
        let id = ConflictId::new("conflict-missing");
        assert_eq!(
            resolver.resolve_default(&id).unwrap_err(),
            ResolveError::UnknownConflict(id)
        );
    }

    #[test]
    fn prediction_does_not_register() {
        let resolver = ConflictResolver::default();
        let existing = vec![
            Operation::set_attribute("a", 1, "p1", "bold", json!(true)),
            Operation::delete_node("a", 1, "p2"),
        ];
        let attr = Operation::remove_attribute("b", 2, "p1", "bold");
        let prediction = resolver.predict_conflict(&attr, &existing).unwrap();
        assert_eq!(prediction.kind, ConflictKind::Attribute);
        assert_eq!(prediction.suggested_strategy, ResolutionStrategy::LastWriterWins);

        let update = Operation::update_node("b", 2, "p2", [("x".to_string(), None)]);
        let prediction = resolver.predict_conflict(&update, &existing).unwrap();
        assert_eq!(prediction.severity, Severity::High);
        assert_eq!(prediction.suggested_strategy, ResolutionStrategy::Manual);

        assert!(resolver
            .predict_conflict(&Operation::insert("b", 2, 0, "x"), &existing)
            .is_none());
        assert_eq!(resolver.stats().total, 0);
    }

    #[test]
    fn stats_and_cleanup() {
        let resolver = ConflictResolver::default();
        let (conflict, _, _) = attribute_conflict(&resolver);
        resolver.detect_conflicts(&[
            Operation::delete("a", 1, 0, 2),
            Operation::delete("b", 2, 0, 4),
        ]);
        resolver
            .resolve(&conflict.id, ResolutionStrategy::LastWriterWins, None)
            .unwrap();

        let stats = resolver.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.by_strategy[&ResolutionStrategy::LastWriterWins], 1);
        assert_eq!(stats.by_severity[&Severity::Low], 1);
        assert_eq!(stats.by_severity[&Severity::Medium], 1);
        assert_eq!(stats.resolution_rate(), 0.5);

        assert_eq!(resolver.conflicts_for(&DocumentId::new("doc")).len(), 1);
        assert_eq!(resolver.clear_resolved(), 1);
        assert_eq!(resolver.stats().total, 1);
    }

    #[test]
    fn dismissed_conflicts_stop_counting_as_pending() {
        let resolver = ConflictResolver::default();
        let (conflict, _, _) = attribute_conflict(&resolver);
        assert_eq!(resolver.pending_conflicts().len(), 1);

        assert_eq!(resolver.dismiss(&conflict.id).map(|c| c.id), Some(conflict.id.clone()));
        assert!(resolver.dismiss(&conflict.id).is_none());
        assert!(resolver.pending_conflicts().is_empty());
        assert_eq!(resolver.stats().pending, 0);
    }
}
