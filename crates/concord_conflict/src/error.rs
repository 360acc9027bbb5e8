//! Resolver errors.

use crate::conflict::{ConflictId, ResolutionStrategy};
use thiserror::Error;

/// Result type for conflict resolution.
pub type ResolveResult<T> = Result<T, ResolveError>;

/// Errors raised while resolving a conflict.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// No conflict with this id is registered.
    #[error("unknown conflict {0}")]
    UnknownConflict(ConflictId),

    /// The strategy cannot be used for this conflict.
    #[error("strategy {strategy} cannot resolve conflict {conflict}: {reason}")]
    StrategyNotApplicable {
        /// Conflict id.
        conflict: ConflictId,
        /// Requested strategy.
        strategy: ResolutionStrategy,
        /// Why it was refused.
        reason: String,
    },

    /// The manual strategy was chosen but no resolution payload was given.
    #[error("conflict {0} awaits a manual resolution")]
    AwaitingManualResolution(ConflictId),

    /// A semantic merge handler failed.
    #[error("semantic merge handler failed: {0}")]
    SemanticHandler(String),

    /// The conflict carries no operations.
    #[error("conflict {0} has no operations")]
    EmptyConflict(ConflictId),
}
