//! # Action Log Store
//!
//! Entry persistence for the action log. Provides the [`Store`] trait with
//! SQLite and in-memory implementations, plus the [`Log`] that assigns ids
//! on top of any store.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait every backend implements
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage
//! - [`Log`] - Id assignment, ordered replay and change events
//! - [`Page`] / [`GetOptions`] - Keyset-paginated iteration
//!
//! ## Usage
//!
//! ```rust,no_run
//! use actionlog_core::{Action, NewMeta, Order};
//! use actionlog_store::{Log, SqliteStore, StoreExt};
//!
//! async fn example() -> actionlog_store::Result<()> {
//!     let log = Log::new(SqliteStore::open("actions.db")?);
//!
//!     log.add(Action::new("user/add"), NewMeta::new().reason("users")).await?;
//!
//!     let entries = log.store().all(Order::Created).await?;
//!     assert_eq!(entries.len(), 1);
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent inserts**: Adding a known id returns `AlreadyExists`
//! - **Monotonic `added`**: Never reused, survives removal and restarts
//! - **Reason GC**: Entries are deleted when their last reason is removed

pub mod error;
pub mod log;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use log::{Clock, Log, LogEvent};
pub use memory::{MemoryStore, DEFAULT_PAGE_SIZE};
pub use sqlite::SqliteStore;
pub use traits::{
    Entry, GetOptions, InsertResult, Page, PageToken, ReasonCriteria, Store, StoreExt,
};
