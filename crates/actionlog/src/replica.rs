//! Replica: one log shared by any number of sync nodes.
//!
//! A replica owns the [`Log`] and spawns one task per connection. Outgoing
//! connections get an active node, accepted ones a passive node; each
//! task is represented by a [`NodeHandle`].

use std::sync::Arc;

use actionlog_core::{Action, NewMeta};
use actionlog_store::{InsertResult, Log, Store};
use actionlog_sync::{
    compute_log_digest, Connection, LogDigest, NodeOptions, NodeState, Role, SyncNode,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// A local log plus the machinery to sync it.
pub struct Replica<S: Store> {
    log: Arc<Log<S>>,
}

impl<S: Store + 'static> Replica<S> {
    /// Create a replica with a random node id.
    pub fn new(store: S) -> Self {
        Self::from_log(Log::new(store))
    }

    pub fn with_node_id(store: S, node_id: impl Into<String>) -> Self {
        Self::from_log(Log::with_node_id(store, node_id))
    }

    /// Wrap an already configured log, e.g. one with a custom clock.
    pub fn from_log(log: Log<S>) -> Self {
        Self { log: Arc::new(log) }
    }

    pub fn log(&self) -> &Arc<Log<S>> {
        &self.log
    }

    pub fn store(&self) -> &S {
        self.log.store()
    }

    pub fn node_id(&self) -> &str {
        self.log.node_id()
    }

    /// Add an action to the local log. Connected nodes stream it to their peers.
    pub async fn add(&self, action: Action, meta: NewMeta) -> Result<InsertResult> {
        Ok(self.log.add(action, meta).await?)
    }

    /// Digest of the local entry set, see [`compute_log_digest`].
    pub async fn digest(&self) -> Result<LogDigest> {
        Ok(compute_log_digest(self.log.store()).await?)
    }

    /// Start an active node over `connection`.
    pub fn connect<C>(&self, connection: C, options: NodeOptions) -> Result<NodeHandle>
    where
        C: Connection + 'static,
    {
        self.spawn(Role::Active, connection, options)
    }

    /// Start a passive node answering on `connection`.
    pub fn accept<C>(&self, connection: C, options: NodeOptions) -> Result<NodeHandle>
    where
        C: Connection + 'static,
    {
        self.spawn(Role::Passive, connection, options)
    }

    fn spawn<C>(&self, role: Role, connection: C, options: NodeOptions) -> Result<NodeHandle>
    where
        C: Connection + 'static,
    {
        let mut node = SyncNode::new(role, Arc::clone(&self.log), connection, options)?;
        let state = node.watch_state();
        let node_id = self.log.node_id().to_string();

        let join = tokio::spawn(async move {
            let result = node.run().await;
            match &result {
                Ok(()) => tracing::debug!(node = %node_id, %role, "node finished"),
                Err(error) => tracing::debug!(node = %node_id, %role, %error, "node failed"),
            }
            result
        });

        Ok(NodeHandle { role, state, join })
    }
}

impl<S: Store> Clone for Replica<S> {
    fn clone(&self) -> Self {
        Self {
            log: Arc::clone(&self.log),
        }
    }
}

/// Handle to a running sync node.
#[derive(Debug)]
pub struct NodeHandle {
    role: Role,
    state: watch::Receiver<NodeState>,
    join: JoinHandle<actionlog_sync::Result<()>>,
}

impl NodeHandle {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NodeState {
        *self.state.borrow()
    }

    /// Follow state changes.
    pub fn watch_state(&self) -> watch::Receiver<NodeState> {
        self.state.clone()
    }

    /// Wait until the node reaches `state`.
    ///
    /// Fails with [`Error::NodeStopped`] if the node task ends first.
    pub async fn wait_for(&mut self, state: NodeState) -> Result<()> {
        self.state
            .wait_for(|current| *current == state)
            .await
            .map(|_| ())
            .map_err(|_| Error::NodeStopped)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the node without a goodbye. The peer sees the connection drop.
    pub fn abort(&self) {
        self.join.abort();
    }

    /// Wait for the node task and return how it ended.
    pub async fn join(self) -> Result<()> {
        self.join.await??;
        Ok(())
    }
}
