//! # Concord Sync Engine
//!
//! Per-document sync state machine and engine for Concord.
//!
//! This crate provides:
//! - Document sessions (initializing → synced ⇄ syncing, conflicted)
//! - Pending/acknowledged queues with echo-based acknowledgement
//! - Transformation of remote operations through pending work
//! - Conflict detection and strategy-driven resolution
//! - Rollback and replay when the server refuses a push
//! - Snapshots, sync statistics and an event stream
//! - Transport abstraction, including a framed transport over any byte channel
//!
//! ## Architecture
//!
//! The engine implements a **push-then-fetch** cycle per document:
//! 1. Handshake once to adopt the authoritative state
//! 2. Push all pending operations against the last known server version
//! 3. Fetch everything after that version; echoes of our own operations
//!    acknowledge them, the rest is transformed through the pending queue
//!
//! Local edits apply immediately and never wait for the network.
//!
//! ## Key Invariants
//!
//! - Server is authoritative
//! - An operation id is applied at most once per replica
//! - Pending operations stay queued until their echo arrives
//! - Only one cycle runs per document at a time
//! - Results of a cycle are dropped if the document was closed meanwhile

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod events;
mod framed;
mod snapshot;
mod state;
mod transport;

pub use config::SyncConfig;
pub use engine::{DocumentView, RemoteOutcome, SyncEngine, SyncOutcome, SyncReport, SyncStats};
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, OperationOrigin, SyncEvent, SyncEventKind};
pub use framed::{FramedTransport, LoopbackChannel, LoopbackServer, MessageChannel};
pub use snapshot::DocumentSnapshot;
pub use state::{SyncPhase, SyncState};
pub use transport::{MockTransport, SyncTransport};
