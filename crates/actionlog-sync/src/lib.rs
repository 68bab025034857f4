//! # Action Log Sync
//!
//! Pairwise replication between two action logs.
//!
//! ## Overview
//!
//! A [`SyncNode`] owns one [`Connection`] and one side of the exchange.
//! The active node initiates the handshake and may reconnect later; the
//! passive node answers, guards the handshake with a timeout and is
//! destroyed when its peer goes away. Both run the same state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Authenticating -> Synchronized -> Disconnected
//! ```
//!
//! After the handshake each side sends the entries the peer has not
//! acknowledged yet, then streams new entries as the log grows. Cursors
//! are persisted in the store so a later session resumes where the last
//! one stopped.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use actionlog_store::{Log, MemoryStore};
//! use actionlog_sync::{local_pair, NodeOptions, SyncNode};
//!
//! async fn example() -> actionlog_sync::Result<()> {
//!     let client = Arc::new(Log::new(MemoryStore::new()));
//!     let server = Arc::new(Log::new(MemoryStore::new()));
//!     let (a, b) = local_pair();
//!
//!     let mut active = SyncNode::active(client, a, NodeOptions::default())?;
//!     let mut passive = SyncNode::passive(server, b, NodeOptions::default())?;
//!
//!     tokio::spawn(async move { passive.run().await });
//!     active.run().await
//! }
//! ```

pub mod connection;
pub mod convergence;
pub mod error;
pub mod messages;
pub mod node;
pub mod options;
pub mod role;

pub use connection::local::{local_pair, LocalConnection};
pub use connection::Connection;
pub use convergence::{compute_log_digest, verify_convergence, verify_digest, ConvergenceResult, LogDigest};
pub use error::{Result, SyncError};
pub use messages::{limits, Credentials, SyncEntry, SyncErrorCode, SyncMessage, PROTOCOL_VERSION};
pub use node::{NodeState, SyncNode};
pub use options::{auth_fn, Authenticator, Filter, FnAuthenticator, MapFn, NodeOptions};
pub use role::{ConnectGuard, DisconnectGuard, Role};
