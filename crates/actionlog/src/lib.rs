//! # Action Log
//!
//! An append-only log of actions that survives restarts and converges
//! with its peers.
//!
//! ## Overview
//!
//! - **Actions**: Opaque payloads identified by `(time, origin, seq)`
//! - **Reasons**: Entries live while at least one reason keeps them
//! - **Stores**: In-memory and SQLite backends behind one [`Store`] trait
//! - **Sync**: Pairwise replication between an active and a passive node
//!
//! ## Usage
//!
//! ```rust,no_run
//! use actionlog::{local_pair, Action, MemoryStore, NewMeta, NodeOptions, NodeState, Replica};
//!
//! async fn example() -> actionlog::Result<()> {
//!     let client = Replica::new(MemoryStore::new());
//!     let server = Replica::new(MemoryStore::new());
//!
//!     client
//!         .add(Action::new("rename").with("name", "draft"), NewMeta::new().reason("ui"))
//!         .await?;
//!
//!     let (a, b) = local_pair();
//!     let _passive = server.accept(b, NodeOptions::default())?;
//!     let mut active = client.connect(a, NodeOptions::default())?;
//!     active.wait_for(NodeState::Synchronized).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `actionlog::core` - Data model (Action, ActionId, Meta, orderings)
//! - `actionlog::store` - Store trait, memory and SQLite backends, Log
//! - `actionlog::sync` - Sync messages, connections and nodes

pub mod error;
pub mod replica;

// Re-export component crates
pub use actionlog_core as core;
pub use actionlog_store as store;
pub use actionlog_sync as sync;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use replica::{NodeHandle, Replica};

pub use actionlog_core::{
    Action, ActionId, Meta, MetaDiff, NewMeta, Order, SyncCursor, SyncCursorUpdate,
};
pub use actionlog_store::{
    GetOptions, InsertResult, Log, LogEvent, MemoryStore, Page, ReasonCriteria, SqliteStore,
    Store, StoreExt,
};
pub use actionlog_sync::{
    local_pair, verify_convergence, Connection, ConvergenceResult, LocalConnection, NodeOptions,
    NodeState, Role, SyncMessage,
};
