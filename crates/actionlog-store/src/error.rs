//! Error types for the store module.

use actionlog_core::ValidationError;
use thiserror::Error;

/// Errors that can occur during store operations.
///
/// Unknown ids and duplicate insertions are not errors; they are reported
/// through the operation's return value.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Action or meta encoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The entry breaks the `add` contract.
    #[error("invalid entry: {0}")]
    Validation(#[from] ValidationError),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Blocking task failed to complete.
    #[error("background task failed: {0}")]
    Task(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
