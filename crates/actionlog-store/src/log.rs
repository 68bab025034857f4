//! The action log: id assignment on top of a [`Store`].
//!
//! The log stamps new actions with `(time, node_id, seq)` ids, forwards
//! them to the store and publishes what changed on a broadcast channel so
//! sync nodes can stream live additions to their peers.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use actionlog_core::{Action, ActionId, Meta, MetaDiff, NewMeta, Order};
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::traits::{Entry, GetOptions, InsertResult, ReasonCriteria, Store};

/// Capacity of the event channel. Slow subscribers see `Lagged`.
const EVENT_CAPACITY: usize = 1024;

/// Length of generated node ids.
const NODE_ID_LEN: usize = 8;

/// Millisecond clock used for new ids.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// A change published by the log.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    /// A new entry was stored.
    Added { action: Action, meta: Meta },
    /// An entry lost its last reason and was deleted.
    Cleaned { action: Action, meta: Meta },
}

#[derive(Default)]
struct IdState {
    last_time: i64,
    seq: u64,
}

/// Sequencing layer over a store.
pub struct Log<S> {
    store: S,
    node_id: String,
    clock: Clock,
    ids: Mutex<IdState>,
    events: broadcast::Sender<LogEvent>,
}

impl<S: Store> Log<S> {
    /// Create a log with a random node id.
    pub fn new(store: S) -> Self {
        let node_id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NODE_ID_LEN)
            .map(char::from)
            .collect();
        Self::with_node_id(store, node_id)
    }

    pub fn with_node_id(store: S, node_id: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            node_id: node_id.into(),
            clock: Arc::new(system_now_ms),
            ids: Mutex::new(IdState::default()),
            events,
        }
    }

    /// Replace the wall clock, e.g. with a fixed one in tests.
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current time of the log's clock in milliseconds.
    pub fn now(&self) -> i64 {
        (self.clock)()
    }

    /// Next id of this node.
    ///
    /// Ids are strictly increasing even if the clock stalls or goes back:
    /// the sequence counts up until the clock passes the last used time.
    pub fn generate_id(&self) -> ActionId {
        let now = self.now();
        let mut ids = self.ids.lock();
        if now > ids.last_time {
            ids.last_time = now;
            ids.seq = 0;
        } else {
            ids.seq += 1;
        }
        ActionId::new(ids.last_time, self.node_id.clone(), ids.seq)
    }

    /// Store an action, assigning an id when `meta` has none.
    pub async fn add(&self, action: Action, mut meta: NewMeta) -> Result<InsertResult> {
        if meta.id.is_none() {
            meta.id = Some(self.generate_id());
        }

        let result = self.store.add(action.clone(), meta).await?;
        if let InsertResult::Added(meta) = &result {
            tracing::trace!(id = %meta.id, added = meta.added, "action added");
            let _ = self.events.send(LogEvent::Added {
                action,
                meta: meta.clone(),
            });
        }
        Ok(result)
    }

    /// Visit entries in `order`, newest first, until the visitor breaks.
    pub async fn each<F>(&self, order: Order, mut visitor: F) -> Result<()>
    where
        F: FnMut(&Action, &Meta) -> ControlFlow<()>,
    {
        let mut options = Some(GetOptions::new(order));
        while let Some(current) = options {
            let page = self.store.get(current).await?;
            for (action, meta) in &page.entries {
                if visitor(action, meta).is_break() {
                    return Ok(());
                }
            }
            options = page.next;
        }
        Ok(())
    }

    pub async fn has(&self, id: &ActionId) -> Result<bool> {
        self.store.has(id).await
    }

    pub async fn change_meta(&self, id: &ActionId, diff: MetaDiff) -> Result<bool> {
        self.store.change_meta(id, diff).await
    }

    pub async fn remove(&self, id: &ActionId) -> Result<Option<Entry>> {
        self.store.remove(id).await
    }

    /// Drop `reason` and publish a `Cleaned` event for every deleted entry.
    ///
    /// Returns the deleted entries in ascending `added` order.
    pub async fn remove_reason(&self, reason: &str, criteria: &ReasonCriteria) -> Result<Vec<Entry>> {
        let mut removed = Vec::new();
        self.store
            .remove_reason(reason, criteria, &mut |action, meta| {
                removed.push((action, meta))
            })
            .await?;

        for (action, meta) in &removed {
            let _ = self.events.send(LogEvent::Cleaned {
                action: action.clone(),
                meta: meta.clone(),
            });
        }
        Ok(removed)
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.events.subscribe()
    }
}

fn system_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn fixed_log(now: Arc<AtomicI64>) -> Log<MemoryStore> {
        Log::with_node_id(MemoryStore::new(), "n1").with_clock(move || now.load(Ordering::SeqCst))
    }

    #[test]
    fn test_generate_id_sequence() {
        let now = Arc::new(AtomicI64::new(100));
        let log = fixed_log(now.clone());

        assert_eq!(log.generate_id(), ActionId::new(100, "n1", 0));
        assert_eq!(log.generate_id(), ActionId::new(100, "n1", 1));

        now.store(105, Ordering::SeqCst);
        assert_eq!(log.generate_id(), ActionId::new(105, "n1", 0));

        // Clock went back: keep counting on the last time.
        now.store(90, Ordering::SeqCst);
        assert_eq!(log.generate_id(), ActionId::new(105, "n1", 1));
    }

    #[test]
    fn test_random_node_id() {
        let log = Log::new(MemoryStore::new());
        assert_eq!(log.node_id().len(), NODE_ID_LEN);
    }

    #[tokio::test]
    async fn test_add_fills_id_and_publishes() {
        let log = fixed_log(Arc::new(AtomicI64::new(7)));
        let mut events = log.subscribe();

        let meta = log
            .add(Action::new("A"), NewMeta::new().reason("test"))
            .await
            .unwrap()
            .into_meta()
            .unwrap();
        assert_eq!(meta.id, ActionId::new(7, "n1", 0));
        assert_eq!(meta.time, 7);

        match events.recv().await.unwrap() {
            LogEvent::Added { action, meta: published } => {
                assert_eq!(action.kind, "A");
                assert_eq!(published, meta);
            }
            other => panic!("unexpected event {other:?}"),
        }

        // Duplicates publish nothing.
        let again = log
            .add(Action::new("A"), NewMeta::with_id((7, "n1", 0)))
            .await
            .unwrap();
        assert_eq!(again, InsertResult::AlreadyExists);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_each_stops_on_break() {
        let log = fixed_log(Arc::new(AtomicI64::new(1)));
        for _ in 0..5 {
            log.add(Action::new("A"), NewMeta::new().reason("test")).await.unwrap();
        }

        let mut seen = Vec::new();
        log.each(Order::Created, |_, meta| {
            seen.push(meta.id.seq);
            if seen.len() == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .await
        .unwrap();
        assert_eq!(seen, vec![4, 3, 2]);
    }

    #[tokio::test]
    async fn test_remove_reason_publishes_cleaned() {
        let log = fixed_log(Arc::new(AtomicI64::new(1)));
        log.add(Action::new("A"), NewMeta::new().reason("a")).await.unwrap();
        log.add(Action::new("B"), NewMeta::new().reasons(["a", "b"])).await.unwrap();
        let mut events = log.subscribe();

        let removed = log.remove_reason("a", &ReasonCriteria::new()).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0.kind, "A");

        match events.recv().await.unwrap() {
            LogEvent::Cleaned { action, meta } => {
                assert_eq!(action.kind, "A");
                assert_eq!(meta.added, 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(events.try_recv().is_err());
    }
}
