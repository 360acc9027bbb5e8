//! Error types for operations and documents.

use crate::ids::{NodeId, OperationId};
use thiserror::Error;

/// Result type for operation handling.
pub type OtResult<T> = Result<T, OtError>;

/// Errors raised while validating, applying or inverting operations.
///
/// Every variant is a validation failure: the operation does not fit the
/// document it was checked against and must not be queued.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OtError {
    /// A text position or range falls outside the content.
    #[error(
        "operation {operation} out of bounds: position {position}, length {length}, content length {content_length}"
    )]
    OutOfBounds {
        /// Offending operation.
        operation: OperationId,
        /// Requested position.
        position: usize,
        /// Requested length.
        length: usize,
        /// Content length at validation time.
        content_length: usize,
    },

    /// The targeted node does not exist.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// A node with this id already exists.
    #[error("node {0} already exists")]
    DuplicateNode(NodeId),

    /// A child index is past the end of the sibling list.
    #[error("child index {index} out of range for parent {parent:?} with {len} children")]
    InvalidIndex {
        /// Parent node (`None` for the root list).
        parent: Option<NodeId>,
        /// Requested index.
        index: usize,
        /// Current number of siblings.
        len: usize,
    },

    /// The operation lacks the captured state needed to invert it.
    #[error("operation {0} cannot be inverted without captured state")]
    NotInvertible(OperationId),
}

impl OtError {
    /// Creates an out-of-bounds error.
    pub fn out_of_bounds(
        operation: &OperationId,
        position: usize,
        length: usize,
        content_length: usize,
    ) -> Self {
        Self::OutOfBounds {
            operation: operation.clone(),
            position,
            length,
            content_length,
        }
    }
}
