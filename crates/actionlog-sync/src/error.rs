//! Error types for the sync module.

use std::time::Duration;

use thiserror::Error;

use crate::messages::SyncErrorCode;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Incompatible node options. Raised at construction, before any
    /// connection attempt.
    #[error("invalid node options: {0}")]
    InvalidOptions(String),

    /// Protocol version mismatch with peer.
    #[error("protocol version mismatch: local={local}, peer={peer}")]
    WrongProtocol { local: u32, peer: u32 },

    /// The auth callback rejected the peer.
    #[error("peer {node_id} was denied authentication")]
    WrongCredentials { node_id: String },

    /// The peer did not answer in time.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] actionlog_store::StoreError),

    /// Peer sent an error message.
    #[error("peer error ({code:?}): {message}")]
    PeerError { code: SyncErrorCode, message: String },

    /// Message validation failed.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The node was destroyed and accepts no further operations.
    #[error("sync node is destroyed")]
    Destroyed,
}

impl SyncError {
    /// Code to report to the peer before disconnecting, if any.
    ///
    /// Errors raised by the peer itself or by the transport are not echoed.
    pub fn peer_code(&self) -> Option<SyncErrorCode> {
        match self {
            SyncError::WrongProtocol { .. } => Some(SyncErrorCode::WrongProtocol),
            SyncError::WrongCredentials { .. } => Some(SyncErrorCode::WrongCredentials),
            SyncError::Timeout(_) => Some(SyncErrorCode::Timeout),
            SyncError::InvalidMessage(_) => Some(SyncErrorCode::WrongFormat),
            SyncError::Store(actionlog_store::StoreError::Validation(_)) => {
                Some(SyncErrorCode::WrongFormat)
            }
            SyncError::Store(_) => Some(SyncErrorCode::InternalError),
            SyncError::InvalidOptions(_)
            | SyncError::Transport(_)
            | SyncError::PeerError { .. }
            | SyncError::Destroyed => None,
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
