//! Error types for the facade.

use actionlog_core::ValidationError;
use actionlog_store::StoreError;
use actionlog_sync::SyncError;
use thiserror::Error;

/// Errors that can occur while running a replica.
#[derive(Debug, Error)]
pub enum Error {
    /// Validation error.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// The node task panicked or was aborted.
    #[error("node task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The node stopped before reaching the awaited state.
    #[error("node stopped")]
    NodeStopped,
}

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, Error>;
