//! Sync node state machine.
//!
//! One [`SyncNode`] owns one connection to one peer. The node runs a
//! single cooperative loop: incoming messages, the timeout deadline, the
//! ping deadline and local log events are multiplexed with `select!`, so
//! handshake, timers and replication never run concurrently.
//!
//! ## Message Flow
//!
//! ```text
//! Active                              Passive
//!   |-------- Connect ---------------->|   (passive timeout armed on connect)
//!   |<------- Connected ---------------|   (timeout disarmed)
//!   |-------- Sync ------------------->|
//!   |<------- Synced ------------------|
//!   |<------- Sync --------------------|
//!   |-------- Synced ----------------->|
//!   |-------- Ping ------------------->|   (after `ping` of silence)
//!   |<------- Pong --------------------|
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use actionlog_core::{ActionId, NewMeta, SyncCursor, SyncCursorUpdate};
use actionlog_store::{Entry, GetOptions, InsertResult, Log, LogEvent, Store};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use crate::connection::Connection;
use crate::error::{Result, SyncError};
use crate::messages::{limits, Credentials, SyncEntry, SyncMessage, PROTOCOL_VERSION};
use crate::options::{Authenticator, NodeOptions};
use crate::role::{ConnectGuard, DisconnectGuard, Role};

/// Connection state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    Disconnected,
    /// Transport is up; waiting for the peer's handshake message.
    Connecting,
    /// Handshake message received; checking credentials.
    Authenticating,
    /// Handshake done; entries flow both ways.
    Synchronized,
}

/// Wakeups of the node loop.
enum Event {
    Message(Result<Option<SyncMessage>>),
    Timeout,
    Ping,
    Log(LogEvent),
    Lagged(u64),
}

/// A sync node over a shared log.
pub struct SyncNode<S: Store, C: Connection> {
    role: Role,
    log: Arc<Log<S>>,
    connection: C,
    options: NodeOptions,
    state: watch::Sender<NodeState>,
    events: broadcast::Receiver<LogEvent>,

    remote_node_id: Option<String>,
    cursor: SyncCursor,
    cursor_loaded: bool,

    /// Offset added to incoming times and subtracted from outgoing ones.
    time_fix: i64,
    connect_sent_at: i64,

    timeout_deadline: Option<Instant>,
    ping_deadline: Option<Instant>,

    /// Ids stored from the peer whose `Added` event is still pending.
    received: HashSet<ActionId>,
    destroyed: bool,
}

impl<S: Store, C: Connection> SyncNode<S, C> {
    /// Create a node. Fails if `options` conflict with `role`.
    pub fn new(role: Role, log: Arc<Log<S>>, connection: C, options: NodeOptions) -> Result<Self> {
        role.validate_options(&options)?;
        let (state, _) = watch::channel(NodeState::Disconnected);
        let events = log.subscribe();
        Ok(Self {
            role,
            log,
            connection,
            options,
            state,
            events,
            remote_node_id: None,
            cursor: SyncCursor::default(),
            cursor_loaded: false,
            time_fix: 0,
            connect_sent_at: 0,
            timeout_deadline: None,
            ping_deadline: None,
            received: HashSet::new(),
            destroyed: false,
        })
    }

    pub fn active(log: Arc<Log<S>>, connection: C, options: NodeOptions) -> Result<Self> {
        Self::new(Role::Active, log, connection, options)
    }

    pub fn passive(log: Arc<Log<S>>, connection: C, options: NodeOptions) -> Result<Self> {
        Self::new(Role::Passive, log, connection, options)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NodeState {
        *self.state.borrow()
    }

    /// Follow state changes from another task.
    pub fn watch_state(&self) -> watch::Receiver<NodeState> {
        self.state.subscribe()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn remote_node_id(&self) -> Option<&str> {
        self.remote_node_id.as_deref()
    }

    pub fn time_fix(&self) -> i64 {
        self.time_fix
    }

    pub fn cursor(&self) -> SyncCursor {
        self.cursor
    }

    pub fn log(&self) -> &Arc<Log<S>> {
        &self.log
    }

    /// Whether the disconnect timeout is armed.
    pub fn is_timeout_armed(&self) -> bool {
        self.timeout_deadline.is_some()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Open the transport and run the connect guard.
    pub async fn connect(&mut self) -> Result<()> {
        self.ensure_alive()?;
        self.connection.connect().await?;
        self.on_connect().await
    }

    /// React to an established transport.
    pub async fn on_connect(&mut self) -> Result<()> {
        self.ensure_alive()?;
        self.load_cursor().await?;
        self.set_state(NodeState::Connecting);
        tracing::debug!(node = self.log.node_id(), role = %self.role, "connected");

        match self.role.on_connect_guard() {
            ConnectGuard::SendConnect => self.send_connect().await,
            ConnectGuard::ArmTimeout => {
                self.start_timeout();
                Ok(())
            }
        }
    }

    /// React to a lost transport. Cancels all timers.
    pub async fn on_disconnect(&mut self) -> Result<()> {
        self.ensure_alive()?;
        self.end_timeout();
        self.ping_deadline = None;
        self.received.clear();
        self.set_state(NodeState::Disconnected);
        tracing::debug!(node = self.log.node_id(), role = %self.role, "disconnected");

        match self.role.on_disconnect_guard() {
            DisconnectGuard::KeepAlive => {
                self.log
                    .store()
                    .set_last_synced(SyncCursorUpdate::both(self.cursor.sent, self.cursor.received))
                    .await?;
            }
            DisconnectGuard::Destroy => self.destroy().await,
        }
        Ok(())
    }

    /// Close the transport and run the disconnect guard.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.ensure_alive()?;
        self.connection.disconnect().await;
        self.on_disconnect().await
    }

    /// Arm the disconnect timeout. Keeps an already armed deadline.
    pub fn start_timeout(&mut self) {
        if let Some(timeout) = self.options.timeout {
            if self.timeout_deadline.is_none() {
                self.timeout_deadline = Some(Instant::now() + timeout);
            }
        }
    }

    /// Disarm the disconnect timeout. A no-op when nothing is armed.
    pub fn end_timeout(&mut self) {
        self.timeout_deadline = None;
    }

    /// Tear the node down for good. Idempotent.
    pub async fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.timeout_deadline = None;
        self.ping_deadline = None;
        if self.connection.is_connected() {
            self.connection.disconnect().await;
        }
        self.set_state(NodeState::Disconnected);
        tracing::debug!(node = self.log.node_id(), "destroyed");
    }

    /// Drive the node until the connection ends.
    ///
    /// Connects first if needed. Returns `Ok` when the connection is closed
    /// normally and the error that ended it otherwise; in both cases the
    /// disconnect guard has already run.
    pub async fn run(&mut self) -> Result<()> {
        self.ensure_alive()?;
        if !self.connection.is_connected() {
            self.connect().await?;
        } else if self.state() == NodeState::Disconnected {
            self.on_connect().await?;
        }

        loop {
            let outcome = match self.next_event().await {
                Event::Message(Ok(Some(message))) => self.on_message(message).await,
                Event::Message(Ok(None)) => return self.on_disconnect().await,
                Event::Message(Err(e)) => Err(e),
                Event::Timeout => Err(SyncError::Timeout(self.options.timeout.unwrap_or_default())),
                Event::Ping => self.send_ping().await,
                Event::Log(event) => self.on_log_event(event).await,
                Event::Lagged(skipped) => self.on_lagged(skipped).await,
            };

            if let Err(e) = outcome {
                self.abort(&e).await;
                return Err(e);
            }
            if self.destroyed || self.state() == NodeState::Disconnected {
                return Ok(());
            }
        }
    }

    async fn next_event(&mut self) -> Event {
        let timeout = self.timeout_deadline;
        let ping = self.ping_deadline;

        tokio::select! {
            message = self.connection.recv() => Event::Message(message),
            _ = sleep_until(timeout) => Event::Timeout,
            _ = sleep_until(ping) => Event::Ping,
            event = self.events.recv() => match event {
                Ok(event) => Event::Log(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => Event::Lagged(skipped),
                // The node holds the log, so the sender outlives the receiver.
                Err(broadcast::error::RecvError::Closed) => Event::Lagged(0),
            },
        }
    }

    /// Report `error` to the peer when it has a code, then disconnect.
    async fn abort(&mut self, error: &SyncError) {
        tracing::warn!(node = self.log.node_id(), role = %self.role, %error, "sync failed");
        if let Some(code) = error.peer_code() {
            let message = SyncMessage::Error {
                code,
                message: truncate(error.to_string(), limits::MAX_ERROR_MESSAGE_LEN),
            };
            // The peer may already be gone.
            let _ = self.connection.send(message).await;
        }
        if self.destroyed {
            return;
        }
        self.connection.disconnect().await;
        if let Err(e) = self.on_disconnect().await {
            tracing::warn!(node = self.log.node_id(), error = %e, "disconnect guard failed");
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Incoming messages
    // ─────────────────────────────────────────────────────────────────────────

    /// Handle one message from the peer.
    pub async fn on_message(&mut self, message: SyncMessage) -> Result<()> {
        self.ensure_alive()?;
        message
            .validate_limits()
            .map_err(|reason| SyncError::InvalidMessage(reason.into()))?;
        tracing::trace!(node = self.log.node_id(), message = message.name(), "received");
        self.delay_ping();

        match message {
            SyncMessage::Connect {
                protocol,
                node_id,
                synced,
                credentials,
            } => self.connect_message(protocol, node_id, synced, credentials).await,
            SyncMessage::Connected {
                protocol,
                node_id,
                synced,
                time,
                credentials,
            } => {
                self.connected_message(protocol, node_id, synced, time, credentials)
                    .await
            }
            SyncMessage::Ping { .. } => {
                self.ensure_synchronized("ping")?;
                self.send(SyncMessage::Pong {
                    synced: self.cursor.received,
                })
                .await
            }
            SyncMessage::Pong { .. } => {
                self.end_timeout();
                Ok(())
            }
            SyncMessage::Sync { added, entries } => {
                self.ensure_synchronized("sync")?;
                self.sync_message(added, entries).await
            }
            SyncMessage::Synced { added } => {
                self.ensure_synchronized("synced")?;
                self.synced_message(added).await
            }
            SyncMessage::Error { code, message } => Err(SyncError::PeerError { code, message }),
        }
    }

    /// Passive side of the handshake.
    async fn connect_message(
        &mut self,
        protocol: u32,
        node_id: String,
        synced: u64,
        credentials: Option<Credentials>,
    ) -> Result<()> {
        if self.role != Role::Passive || self.state() != NodeState::Connecting {
            return Err(SyncError::InvalidMessage("unexpected connect".into()));
        }
        let start = self.log.now();
        check_protocol(protocol)?;

        self.set_state(NodeState::Authenticating);
        let auth = self.options.auth.clone();
        authenticate(auth.as_deref(), &node_id, credentials.as_ref()).await?;
        self.remote_node_id = Some(node_id);

        // Handshake completion is the only path that disarms the guard.
        self.end_timeout();

        self.send(SyncMessage::Connected {
            protocol: PROTOCOL_VERSION,
            node_id: self.log.node_id().to_string(),
            synced: self.cursor.received,
            time: (start, self.log.now()),
            credentials: self.options.credentials.clone(),
        })
        .await?;

        self.set_synchronized();
        self.sync_since(synced).await
    }

    /// Active side of the handshake.
    async fn connected_message(
        &mut self,
        protocol: u32,
        node_id: String,
        synced: u64,
        (start, end): (i64, i64),
        credentials: Option<Credentials>,
    ) -> Result<()> {
        if self.role != Role::Active || self.state() != NodeState::Connecting {
            return Err(SyncError::InvalidMessage("unexpected connected".into()));
        }
        check_protocol(protocol)?;
        self.end_timeout();

        if self.options.fix_time {
            self.time_fix = time_offset(self.connect_sent_at, self.log.now(), (start, end))
                .ok_or_else(|| SyncError::InvalidMessage("connected time out of range".into()))?;
            tracing::debug!(node = self.log.node_id(), time_fix = self.time_fix, "fixed time");
        }

        self.set_state(NodeState::Authenticating);
        let auth = self.options.auth.clone();
        authenticate(auth.as_deref(), &node_id, credentials.as_ref()).await?;
        self.remote_node_id = Some(node_id);

        self.set_synchronized();
        self.sync_since(synced).await
    }

    /// Store a batch from the peer and acknowledge it.
    async fn sync_message(&mut self, added: u64, entries: Vec<SyncEntry>) -> Result<()> {
        for SyncEntry { action, mut meta } in entries {
            meta.time = meta.time.checked_add(self.time_fix).ok_or_else(|| {
                SyncError::InvalidMessage(format!("entry {} time out of range", meta.id))
            })?;
            if let Some(filter) = &self.options.in_filter {
                if !filter(&action, &meta) {
                    continue;
                }
            }
            let (action, meta) = match &self.options.in_map {
                Some(map) => map(action, meta),
                None => (action, meta),
            };

            let id = meta.id.clone();
            self.received.insert(id.clone());
            match self.log.add(action, NewMeta::from(meta)).await {
                Ok(InsertResult::Added(_)) => {}
                Ok(InsertResult::AlreadyExists) => {
                    self.received.remove(&id);
                }
                Err(e) => {
                    self.received.remove(&id);
                    return Err(e.into());
                }
            }
        }

        if added > self.cursor.received {
            self.cursor.received = added;
            self.log
                .store()
                .set_last_synced(SyncCursorUpdate::received(added))
                .await?;
        }
        self.send(SyncMessage::Synced { added }).await
    }

    async fn synced_message(&mut self, added: u64) -> Result<()> {
        if added > self.cursor.sent {
            self.cursor.sent = added;
            self.log
                .store()
                .set_last_synced(SyncCursorUpdate::sent(added))
                .await?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Outgoing entries
    // ─────────────────────────────────────────────────────────────────────────

    async fn on_log_event(&mut self, event: LogEvent) -> Result<()> {
        let LogEvent::Added { action, meta } = event else {
            return Ok(());
        };
        // Entries that just arrived from the peer are not sent back.
        if self.received.remove(&meta.id) {
            return Ok(());
        }
        if self.state() != NodeState::Synchronized {
            return Ok(());
        }
        self.send_entries(vec![(action, meta)]).await
    }

    async fn on_lagged(&mut self, skipped: u64) -> Result<()> {
        if self.state() != NodeState::Synchronized {
            return Ok(());
        }
        tracing::debug!(node = self.log.node_id(), skipped, "log events lagged, resending");
        self.sync_since(self.cursor.sent).await
    }

    /// Send every entry with `added` above `after`, oldest first.
    async fn sync_since(&mut self, after: u64) -> Result<()> {
        let mut pending: Vec<Entry> = Vec::new();
        let mut options = Some(GetOptions::added());

        'pages: while let Some(current) = options {
            let page = self.log.store().get(current).await?;
            for (action, meta) in page.entries {
                if meta.added <= after {
                    break 'pages;
                }
                pending.push((action, meta));
            }
            options = page.next;
        }

        pending.reverse();
        self.send_entries(pending).await
    }

    async fn send_entries(&mut self, entries: Vec<Entry>) -> Result<()> {
        let batch_size = self
            .options
            .max_batch_size
            .clamp(1, limits::MAX_ENTRIES_PER_MESSAGE);
        let mut batch = Vec::with_capacity(batch_size.min(entries.len()));
        let mut batch_added = 0;

        for (action, meta) in entries {
            if let Some(filter) = &self.options.out_filter {
                if !filter(&action, &meta) {
                    continue;
                }
            }
            let added = meta.added;
            let (action, mut meta) = match &self.options.out_map {
                Some(map) => map(action, meta),
                None => (action, meta),
            };
            meta.time = meta.time.saturating_sub(self.time_fix);

            batch.push(SyncEntry { action, meta });
            batch_added = batch_added.max(added);

            if batch.len() >= batch_size {
                let entries = std::mem::take(&mut batch);
                self.send(SyncMessage::Sync {
                    added: batch_added,
                    entries,
                })
                .await?;
            }
        }

        if !batch.is_empty() {
            self.send(SyncMessage::Sync {
                added: batch_added,
                entries: batch,
            })
            .await?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    async fn send_connect(&mut self) -> Result<()> {
        self.connect_sent_at = self.log.now();
        self.send(SyncMessage::Connect {
            protocol: PROTOCOL_VERSION,
            node_id: self.log.node_id().to_string(),
            synced: self.cursor.received,
            credentials: self.options.credentials.clone(),
        })
        .await?;
        self.start_timeout();
        Ok(())
    }

    async fn send_ping(&mut self) -> Result<()> {
        self.ping_deadline = None;
        if self.state() != NodeState::Synchronized {
            return Ok(());
        }
        tracing::trace!(node = self.log.node_id(), "ping");
        self.send(SyncMessage::Ping {
            synced: self.cursor.received,
        })
        .await?;
        self.start_timeout();
        Ok(())
    }

    async fn send(&mut self, message: SyncMessage) -> Result<()> {
        tracing::trace!(node = self.log.node_id(), message = message.name(), "sending");
        self.connection.send(message).await?;
        self.delay_ping();
        Ok(())
    }

    /// Read the stored cursor once and apply pre-seeded values.
    async fn load_cursor(&mut self) -> Result<()> {
        if self.cursor_loaded {
            return Ok(());
        }
        let store = self.log.store();
        self.cursor = store.get_last_synced().await?;

        let seeded = SyncCursorUpdate {
            sent: self.options.other_synced,
            received: self.options.synced,
        };
        if seeded.sent.is_some() || seeded.received.is_some() {
            self.cursor.merge(seeded);
            store.set_last_synced(seeded).await?;
        }
        self.cursor_loaded = true;
        Ok(())
    }

    fn set_synchronized(&mut self) {
        self.set_state(NodeState::Synchronized);
        self.delay_ping();
        tracing::info!(
            node = self.log.node_id(),
            peer = self.remote_node_id.as_deref().unwrap_or_default(),
            role = %self.role,
            "synchronized"
        );
    }

    /// Push the ping deadline out by a full interval.
    fn delay_ping(&mut self) {
        if self.state() != NodeState::Synchronized {
            return;
        }
        if let Some(ping) = self.options.ping {
            self.ping_deadline = Some(Instant::now() + ping);
        }
    }

    fn set_state(&self, state: NodeState) {
        self.state.send_replace(state);
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.destroyed {
            Err(SyncError::Destroyed)
        } else {
            Ok(())
        }
    }

    fn ensure_synchronized(&self, message: &str) -> Result<()> {
        if self.state() == NodeState::Synchronized {
            Ok(())
        } else {
            Err(SyncError::InvalidMessage(format!(
                "{message} before handshake"
            )))
        }
    }
}

/// Clock offset to the peer, assuming the round trip was symmetric.
///
/// `None` when the peer's timestamps push the arithmetic out of range.
fn time_offset(sent_at: i64, now: i64, (start, end): (i64, i64)) -> Option<i64> {
    let processing = end.checked_sub(start)?;
    let round_trip = now.checked_sub(sent_at)?.checked_sub(processing)?;
    sent_at.checked_sub(start)?.checked_add(round_trip / 2)
}

async fn authenticate(
    auth: Option<&dyn Authenticator>,
    node_id: &str,
    credentials: Option<&Credentials>,
) -> Result<()> {
    let Some(auth) = auth else {
        return Ok(());
    };
    if auth.authenticate(node_id, credentials).await {
        Ok(())
    } else {
        tracing::warn!(peer = node_id, "bad credentials");
        Err(SyncError::WrongCredentials {
            node_id: node_id.to_string(),
        })
    }
}

fn check_protocol(protocol: u32) -> Result<()> {
    if protocol == PROTOCOL_VERSION {
        Ok(())
    } else {
        Err(SyncError::WrongProtocol {
            local: PROTOCOL_VERSION,
            peer: protocol,
        })
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn truncate(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

impl<S: Store, C: Connection> std::fmt::Debug for SyncNode<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncNode")
            .field("role", &self.role)
            .field("node_id", &self.log.node_id())
            .field("state", &self.state())
            .field("remote_node_id", &self.remote_node_id)
            .field("cursor", &self.cursor)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}
