//! Test fixtures and helpers.
//!
//! Common setup code for store and sync tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use actionlog_core::{Action, ActionId, Meta, NewMeta};
use actionlog_store::{Entry, InsertResult, Log, MemoryStore, Result, Store};

/// Reason attached by [`entry`] and [`TestFixture::add`].
pub const TEST_REASON: &str = "test";

/// The four entries of the created-order scenario, as `(id, time)`.
pub const SCENARIO: [((i64, &str, u64), i64); 4] = [
    ((1, "a", 0), 1),
    ((1, "c", 0), 2),
    ((1, "b", 1), 2),
    ((3, "b", 0), 2),
];

/// Expected created order of [`SCENARIO`].
pub const SCENARIO_CREATED: [(i64, &str, u64); 4] =
    [(1, "c", 0), (1, "b", 1), (3, "b", 0), (1, "a", 0)];

/// An action with a kind only.
pub fn action(kind: &str) -> Action {
    Action::new(kind)
}

/// An entry with the given id and the test reason.
pub fn entry(id: (i64, &str, u64)) -> (Action, NewMeta) {
    (action("test"), NewMeta::with_id(id).reason(TEST_REASON))
}

/// Insert entries in order and return the stored metas.
///
/// Panics if an id is already present.
pub async fn fill<S, I>(store: &S, entries: I) -> Result<Vec<Meta>>
where
    S: Store + ?Sized,
    I: IntoIterator<Item = (Action, NewMeta)>,
{
    let mut stored = Vec::new();
    for (action, meta) in entries {
        match store.add(action, meta).await? {
            InsertResult::Added(meta) => stored.push(meta),
            InsertResult::AlreadyExists => panic!("fixture entry inserted twice"),
        }
    }
    Ok(stored)
}

/// Insert the created-order scenario.
pub async fn fill_scenario<S: Store + ?Sized>(store: &S) -> Result<Vec<Meta>> {
    let entries = SCENARIO.map(|(id, time)| {
        (
            action("scenario"),
            NewMeta::with_id(id).time(time).reason(TEST_REASON),
        )
    });
    fill(store, entries).await
}

/// Ids of `entries`, in order.
pub fn ids(entries: &[Entry]) -> Vec<ActionId> {
    entries.iter().map(|(_, meta)| meta.id.clone()).collect()
}

/// `added` values of `entries`, in order.
pub fn added(entries: &[Entry]) -> Vec<u64> {
    entries.iter().map(|(_, meta)| meta.added).collect()
}

/// A log over a memory store with a clock the test controls.
pub struct TestFixture {
    pub log: Arc<Log<MemoryStore>>,
    clock: Arc<AtomicI64>,
}

impl TestFixture {
    /// Create a fixture whose clock starts at `1`.
    pub fn new(node_id: &str) -> Self {
        Self::with_store(node_id, MemoryStore::new())
    }

    pub fn with_store(node_id: &str, store: MemoryStore) -> Self {
        let clock = Arc::new(AtomicI64::new(1));
        let reader = Arc::clone(&clock);
        let log = Log::with_node_id(store, node_id)
            .with_clock(move || reader.load(Ordering::SeqCst));
        Self {
            log: Arc::new(log),
            clock,
        }
    }

    pub fn now(&self) -> i64 {
        self.clock.load(Ordering::SeqCst)
    }

    pub fn set_time(&self, time: i64) {
        self.clock.store(time, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: i64) {
        self.clock.fetch_add(ms, Ordering::SeqCst);
    }

    /// Add an action of `kind` with a generated id and the test reason.
    pub async fn add(&self, kind: &str) -> Result<Meta> {
        let result = self
            .log
            .add(action(kind), NewMeta::new().reason(TEST_REASON))
            .await?;
        // Generated ids are unique, so the log always stores them.
        Ok(result
            .into_meta()
            .unwrap_or_else(|| panic!("generated id collided")))
    }
}
