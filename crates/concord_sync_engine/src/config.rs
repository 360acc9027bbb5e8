//! Configuration for the sync engine.

use concord_conflict::{ConflictKind, ResolutionStrategy};
use concord_ot::{DEFAULT_COMPRESS_WINDOW_MS, DEFAULT_HISTORY_LIMIT};
use std::collections::HashMap;
use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Pending operations that trigger an immediate sync.
    pub batch_size: usize,
    /// Interval of the periodic sync timer. `None` disables the timer.
    pub sync_interval: Option<Duration>,
    /// Timeout for every request/response exchange.
    pub request_timeout: Duration,
    /// Deletes of at least this many characters sync immediately.
    pub large_delete_threshold: usize,
    /// Bounded document history.
    pub history_limit: usize,
    /// Acknowledged operations retained per document.
    pub acknowledged_limit: usize,
    /// Window within which history compression merges one user's edits.
    pub compress_window: Duration,
    /// Operations requested per fetch.
    pub fetch_limit: u32,
    /// Failed reconciliations tolerated before a full resync.
    pub max_reconcile_failures: u32,
    /// Strategy used for conflicts without an override.
    pub default_strategy: ResolutionStrategy,
    /// Per-kind strategy overrides.
    pub strategies: HashMap<ConflictKind, ResolutionStrategy>,
}

impl SyncConfig {
    /// Creates a configuration with the default values.
    pub fn new() -> Self {
        Self {
            batch_size: 10,
            sync_interval: Some(Duration::from_secs(1)),
            request_timeout: Duration::from_secs(5),
            large_delete_threshold: 100,
            history_limit: DEFAULT_HISTORY_LIMIT,
            acknowledged_limit: 500,
            compress_window: Duration::from_millis(DEFAULT_COMPRESS_WINDOW_MS),
            fetch_limit: 100,
            max_reconcile_failures: 3,
            default_strategy: ResolutionStrategy::OperationalTransform,
            strategies: HashMap::new(),
        }
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Sets the periodic sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Disables the periodic sync timer. Syncs then only happen on demand.
    pub fn without_sync_timer(mut self) -> Self {
        self.sync_interval = None;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the large-delete threshold.
    pub fn with_large_delete_threshold(mut self, chars: usize) -> Self {
        self.large_delete_threshold = chars;
        self
    }

    /// Sets the document history bound.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Sets the acknowledged-operations bound.
    pub fn with_acknowledged_limit(mut self, limit: usize) -> Self {
        self.acknowledged_limit = limit;
        self
    }

    /// Sets the compression window.
    pub fn with_compress_window(mut self, window: Duration) -> Self {
        self.compress_window = window;
        self
    }

    /// Sets the fetch page size.
    pub fn with_fetch_limit(mut self, limit: u32) -> Self {
        self.fetch_limit = limit.max(1);
        self
    }

    /// Sets the tolerated number of failed reconciliations.
    pub fn with_max_reconcile_failures(mut self, max: u32) -> Self {
        self.max_reconcile_failures = max.max(1);
        self
    }

    /// Sets the default strategy.
    pub fn with_default_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// Overrides the strategy for one conflict kind.
    pub fn with_strategy(mut self, kind: ConflictKind, strategy: ResolutionStrategy) -> Self {
        self.strategies.insert(kind, strategy);
        self
    }

    /// Strategy applied to conflicts of `kind`.
    pub fn strategy_for(&self, kind: ConflictKind) -> ResolutionStrategy {
        self.strategies
            .get(&kind)
            .copied()
            .unwrap_or(self.default_strategy)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
