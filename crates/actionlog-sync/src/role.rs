//! Active and passive roles.
//!
//! Both roles share one state machine; a role only decides what happens
//! right after the transport connects and right after it disconnects.

use crate::error::{Result, SyncError};
use crate::options::NodeOptions;

/// Which side of a pairwise sync a node plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Initiates the handshake and may reconnect after a disconnect.
    Active,
    /// Answers the handshake and is destroyed when its peer leaves.
    Passive,
}

/// What a node does once its transport is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectGuard {
    /// Send `Connect` to the peer.
    SendConnect,
    /// Wait for the peer's `Connect`, but not longer than the timeout.
    ArmTimeout,
}

/// What a node does once its transport is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectGuard {
    /// Stay usable for a later reconnect.
    KeepAlive,
    /// Destroy the node.
    Destroy,
}

impl Role {
    pub fn on_connect_guard(self) -> ConnectGuard {
        match self {
            Role::Active => ConnectGuard::SendConnect,
            Role::Passive => ConnectGuard::ArmTimeout,
        }
    }

    pub fn on_disconnect_guard(self) -> DisconnectGuard {
        match self {
            Role::Active => DisconnectGuard::KeepAlive,
            Role::Passive => DisconnectGuard::Destroy,
        }
    }

    /// Reject options this role cannot honor.
    ///
    /// Time correction and pre-seeded cursors are the initiator's business;
    /// a responder negotiates them instead.
    pub fn validate_options(self, options: &NodeOptions) -> Result<()> {
        if options.max_batch_size == 0 {
            return Err(SyncError::InvalidOptions(
                "max_batch_size must be positive".into(),
            ));
        }
        if self == Role::Passive {
            if options.fix_time {
                return Err(SyncError::InvalidOptions(
                    "passive node cannot fix time".into(),
                ));
            }
            if options.synced.is_some() || options.other_synced.is_some() {
                return Err(SyncError::InvalidOptions(
                    "passive node cannot have synced option".into(),
                ));
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Active => f.write_str("active"),
            Role::Passive => f.write_str("passive"),
        }
    }
}
