//! # Concord OT
//!
//! Operation model and operational transform engine for Concord.
//!
//! This crate provides:
//! - `Operation` with a tagged `OperationKind` per edit type
//! - `Document` (text buffer plus node tree) with validate/capture/apply
//! - `transform` / `transform_against` for concurrent operations
//! - `create_undo_operation` for exact inverses
//! - `compress_operations` for bounding history size
//!
//! This is a pure crate with no I/O operations.
//!
//! ## Convergence
//!
//! For two operations `a` and `b` generated against the same state,
//! `transform(a, b)` returns `(a', b')` such that applying `a` then `b'`
//! yields the same document as applying `b` then `a'`.
//!
//! ```
//! use concord_ot::{apply, transform, Document, Operation, OperationId};
//!
//! let doc = Document::new("doc", "abc");
//! let a = Operation::insert("a", 100, 1, "X").with_id(OperationId::new("op-a"));
//! let b = Operation::insert("b", 100, 1, "Y").with_id(OperationId::new("op-b"));
//!
//! let (a2, b2) = transform(&a, &b);
//! let left = apply(&apply(&doc, &a).unwrap(), &b2).unwrap();
//! let right = apply(&apply(&doc, &b).unwrap(), &a2).unwrap();
//!
//! assert_eq!(left.content(), "aXYbc");
//! assert_eq!(left.state(), right.state());
//! ```
//!
//! ## Key Invariants
//!
//! - Operations are immutable; transforms return new values
//! - Re-applying an operation id is a no-op
//! - A document's version grows by exactly one per applied operation

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compress;
mod document;
mod error;
mod ids;
mod operation;
mod transform;
mod tree;
mod undo;

pub use compress::{compress_operations, DEFAULT_COMPRESS_WINDOW_MS};
pub use document::{
    apply, validate, ApplyOutcome, Document, DocumentState, OperationLog, DEFAULT_HISTORY_LIMIT,
};
pub use error::{OtError, OtResult};
pub use ids::{DocumentId, NodeId, OperationId, UserId};
pub use operation::{now_millis, NodeSpec, Operation, OperationKind, RemovedNode};
pub use transform::{transform, transform_against};
pub use tree::{NodeRecord, NodeTree};
pub use undo::create_undo_operation;
