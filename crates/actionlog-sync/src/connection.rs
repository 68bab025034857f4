//! Connection abstraction for sync nodes.
//!
//! A connection is one ordered, bidirectional channel to a single peer.
//! Implementations may use WebSockets, TCP, or anything else that
//! preserves message order.

use async_trait::async_trait;

use crate::error::Result;
use crate::messages::SyncMessage;

/// A pairwise message channel owned by one [`SyncNode`](crate::SyncNode).
#[async_trait]
pub trait Connection: Send {
    /// Establish the channel. Connecting an open channel is a no-op.
    async fn connect(&mut self) -> Result<()>;

    /// Send one message to the peer.
    async fn send(&mut self, message: SyncMessage) -> Result<()>;

    /// Receive the next message.
    ///
    /// Returns `None` once the channel is closed by either side. Must be
    /// cancel safe: the node polls it inside `select!`.
    async fn recv(&mut self) -> Result<Option<SyncMessage>>;

    /// Close the channel. The peer observes `None` from `recv`.
    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

/// In-memory connections for tests and same-process replicas.
pub mod local {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    use crate::error::SyncError;

    /// Channel capacity per direction.
    pub(super) const CAPACITY: usize = 1000;

    #[derive(Debug)]
    enum Frame {
        Message(SyncMessage),
        Close,
    }

    /// One end of a [`local_pair`].
    pub struct LocalConnection {
        tx: mpsc::Sender<Frame>,
        rx: mpsc::Receiver<Frame>,
        /// Shared by both ends.
        connected: Arc<AtomicBool>,
    }

    /// Create two connected ends. Closing either end closes both.
    pub fn local_pair() -> (LocalConnection, LocalConnection) {
        let (a_tx, b_rx) = mpsc::channel(CAPACITY);
        let (b_tx, a_rx) = mpsc::channel(CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));

        let a = LocalConnection {
            tx: a_tx,
            rx: a_rx,
            connected: Arc::clone(&connected),
        };
        let b = LocalConnection {
            tx: b_tx,
            rx: b_rx,
            connected,
        };
        (a, b)
    }

    #[async_trait]
    impl Connection for LocalConnection {
        async fn connect(&mut self) -> Result<()> {
            if self.tx.is_closed() {
                return Err(SyncError::Transport("peer end dropped".into()));
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&mut self, message: SyncMessage) -> Result<()> {
            if !self.is_connected() {
                return Err(SyncError::Transport("not connected".into()));
            }
            self.tx
                .send(Frame::Message(message))
                .await
                .map_err(|_| SyncError::Transport("peer disconnected".into()))
        }

        async fn recv(&mut self) -> Result<Option<SyncMessage>> {
            match self.rx.recv().await {
                Some(Frame::Message(message)) => Ok(Some(message)),
                Some(Frame::Close) | None => {
                    self.connected.store(false, Ordering::SeqCst);
                    Ok(None)
                }
            }
        }

        async fn disconnect(&mut self) {
            if !self.connected.swap(false, Ordering::SeqCst) {
                return;
            }
            if let Err(mpsc::error::TrySendError::Full(frame)) = self.tx.try_send(Frame::Close) {
                // Close must still follow the queued frames once the peer drains them.
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(frame).await;
                });
            }
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::local::local_pair;
    use super::*;

    #[tokio::test]
    async fn test_local_pair_send_recv() {
        let (mut a, mut b) = local_pair();
        a.connect().await.unwrap();
        assert!(b.is_connected());

        a.send(SyncMessage::Ping { synced: 3 }).await.unwrap();
        assert_eq!(
            b.recv().await.unwrap(),
            Some(SyncMessage::Ping { synced: 3 })
        );
    }

    #[tokio::test]
    async fn test_local_pair_disconnect() {
        let (mut a, mut b) = local_pair();
        a.connect().await.unwrap();

        a.disconnect().await;
        assert!(!a.is_connected());
        assert_eq!(b.recv().await.unwrap(), None);
        assert!(b.send(SyncMessage::Ping { synced: 0 }).await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_with_full_channel() {
        let (mut a, mut b) = local_pair();
        a.connect().await.unwrap();
        for synced in 0..local::CAPACITY as u64 {
            a.send(SyncMessage::Ping { synced }).await.unwrap();
        }

        a.disconnect().await;
        for synced in 0..local::CAPACITY as u64 {
            assert_eq!(b.recv().await.unwrap(), Some(SyncMessage::Ping { synced }));
        }
        assert_eq!(b.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_send_requires_connect() {
        let (mut a, _b) = local_pair();
        assert!(a.send(SyncMessage::Synced { added: 1 }).await.is_err());
    }
}
