//! Sync protocol message types.
//!
//! Two nodes exchange these over a [`Connection`](crate::Connection).
//! Encoding on the wire is up to the transport; every message is serde
//! serializable.

use actionlog_core::{Action, Meta};
use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Opaque credentials handed to the peer's auth callback.
pub type Credentials = serde_json::Value;

/// Message size limits.
pub mod limits {
    /// Max entries in one `Sync` message.
    pub const MAX_ENTRIES_PER_MESSAGE: usize = 100;
    /// Max length of a node id in bytes.
    pub const MAX_NODE_ID_LEN: usize = 256;
    /// Max length of an `Error` description in bytes.
    pub const MAX_ERROR_MESSAGE_LEN: usize = 1024;
}

/// An action with its metadata as sent to the peer.
///
/// `meta.added` is the sender's counter; the receiver assigns its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEntry {
    pub action: Action,
    pub meta: Meta,
}

/// Sync protocol messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncMessage {
    /// Handshake request, sent by the active node.
    Connect {
        protocol: u32,
        node_id: String,
        /// Highest peer `added` this node has received.
        synced: u64,
        credentials: Option<Credentials>,
    },

    /// Handshake answer, sent by the passive node.
    Connected {
        protocol: u32,
        node_id: String,
        /// Highest peer `added` this node has received.
        synced: u64,
        /// Local time when `Connect` arrived and when this answer was sent.
        time: (i64, i64),
        credentials: Option<Credentials>,
    },

    /// Liveness probe after a period of silence.
    Ping { synced: u64 },

    /// Answer to `Ping`.
    Pong { synced: u64 },

    /// A batch of entries, oldest first.
    Sync {
        /// Highest sender `added` in the batch.
        added: u64,
        entries: Vec<SyncEntry>,
    },

    /// Acknowledges a `Sync` batch.
    Synced { added: u64 },

    /// Error condition. The sender disconnects afterwards.
    Error { code: SyncErrorCode, message: String },
}

impl SyncMessage {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            SyncMessage::Connect { .. } => "connect",
            SyncMessage::Connected { .. } => "connected",
            SyncMessage::Ping { .. } => "ping",
            SyncMessage::Pong { .. } => "pong",
            SyncMessage::Sync { .. } => "sync",
            SyncMessage::Synced { .. } => "synced",
            SyncMessage::Error { .. } => "error",
        }
    }

    /// Check if this message respects size limits.
    pub fn validate_limits(&self) -> Result<(), &'static str> {
        match self {
            SyncMessage::Connect { node_id, .. } | SyncMessage::Connected { node_id, .. } => {
                if node_id.is_empty() {
                    return Err("empty node id");
                }
                if node_id.len() > limits::MAX_NODE_ID_LEN {
                    return Err("node id too long");
                }
            }
            SyncMessage::Sync { entries, .. } => {
                if entries.len() > limits::MAX_ENTRIES_PER_MESSAGE {
                    return Err("too many entries");
                }
            }
            SyncMessage::Error { message, .. } => {
                if message.len() > limits::MAX_ERROR_MESSAGE_LEN {
                    return Err("error message too long");
                }
            }
            SyncMessage::Ping { .. } | SyncMessage::Pong { .. } | SyncMessage::Synced { .. } => {}
        }
        Ok(())
    }
}

/// Error codes for sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum SyncErrorCode {
    /// Unknown/unspecified error.
    Unknown = 0,
    /// Protocol version mismatch.
    WrongProtocol = 1,
    /// Credentials were rejected.
    WrongCredentials = 2,
    /// Peer did not answer in time.
    Timeout = 3,
    /// Malformed or unexpected message.
    WrongFormat = 4,
    /// Internal error on peer.
    InternalError = 5,
}
