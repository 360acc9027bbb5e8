//! # Concord Sync Server
//!
//! Reference in-memory authority for the Concord sync protocol.
//!
//! This crate provides:
//! - One authoritative [`concord_ot::Document`] per document id
//! - An ordered, bounded operation history per document
//! - Server-side reconciliation of pushed batches
//! - A message dispatcher usable as a loopback peer
//!
//! # Protocol
//!
//! 1. Client handshakes with the state it starts from. Unknown documents
//!    are created from that state.
//! 2. Client pushes pending operations together with the server version
//!    they were generated against. The server transforms them past the
//!    history the client has not seen yet and appends them.
//! 3. Client fetches everything after its server version. Its own
//!    operations come back in the stream and act as acknowledgements.
//!
//! A push the server cannot reconcile is answered with a conflict. The
//! client then rolls back, refetches and replays.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod history;
mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use history::DocumentHistory;
pub use server::SyncServer;
