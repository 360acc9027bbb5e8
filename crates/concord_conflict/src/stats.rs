//! Resolver statistics.

use crate::conflict::{ResolutionStrategy, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Counts over the active-conflict table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverStats {
    /// All registered conflicts.
    pub total: usize,
    /// Conflicts with a recorded resolution.
    pub resolved: usize,
    /// Conflicts still awaiting resolution.
    pub pending: usize,
    /// Resolved conflicts per strategy used.
    pub by_strategy: BTreeMap<ResolutionStrategy, usize>,
    /// All conflicts per severity.
    pub by_severity: BTreeMap<Severity, usize>,
}

impl ResolverStats {
    /// Share of conflicts that have been resolved, in `[0, 1]`.
    pub fn resolution_rate(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.resolved as f64 / self.total as f64
        }
    }
}
