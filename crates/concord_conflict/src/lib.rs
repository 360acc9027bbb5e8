//! # Concord Conflict
//!
//! Conflict detection and resolution for concurrent operations.
//!
//! This crate provides:
//! - `ConflictDetector`, an ordered set of pairwise detection rules
//! - `ConflictResolver`, which keeps the active-conflict table and applies
//!   a `ResolutionStrategy` to produce a `ConflictResolution`
//! - `predict_conflict` for asking before committing an operation
//! - `ResolverStats` for observability
//!
//! This is a pure crate with no I/O operations. Resolvers are plain values:
//! construct one and share it (usually behind an `Arc`) with the engines
//! that need it.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod detector;
mod error;
mod resolver;
mod stats;

pub use conflict::{
    ConflictData, ConflictId, ConflictKind, ConflictResolution, ResolutionStrategy, Severity,
    UserPriority,
};
pub use detector::{ConflictDetector, DetectionRule, RuleMatch};
pub use error::{ResolveError, ResolveResult};
pub use resolver::{ConflictPrediction, ConflictResolver, ResolverConfig, SemanticMergeHandler};
pub use stats::ResolverStats;
