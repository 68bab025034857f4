//! In-memory implementation of the Store trait.
//!
//! Same semantics as SQLite, but everything lives in memory and is lost
//! when the store is dropped.

use std::collections::{BTreeMap, HashMap};

use actionlog_core::{
    validate_new_entry, Action, ActionId, CreatedKey, Meta, MetaDiff, NewMeta, Order,
    SyncCursor, SyncCursorUpdate, ValidationError,
};
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{Result, StoreError};
use crate::traits::{Entry, GetOptions, InsertResult, Page, PageToken, ReasonCriteria, Store};

/// Default number of entries per page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// In-memory store implementation.
///
/// Thread-safe via RwLock. Every operation holds the lock for its whole
/// duration, which makes each call atomic and serializes `added`.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
    page_size: usize,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Entries keyed by `added`, which is also the added order.
    entries: BTreeMap<u64, Entry>,

    /// Id index: id -> added.
    ids: HashMap<ActionId, u64>,

    /// Created order index: key -> added.
    created: BTreeMap<CreatedKey, u64>,

    last_added: u64,

    last_synced: SyncCursor,
}

impl MemoryStoreInner {
    /// Resolve up to `limit` entries from an iterator of `added` values.
    fn resolve<'a>(&self, added: impl Iterator<Item = &'a u64>, limit: usize) -> Vec<Entry> {
        added
            .filter_map(|added| self.entries.get(added).cloned())
            .take(limit)
            .collect()
    }

    fn unlink(&mut self, added: u64) -> Option<Entry> {
        let entry = self.entries.remove(&added)?;
        self.ids.remove(&entry.1.id);
        self.created.remove(&entry.1.created_key());
        Some(entry)
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create a store returning at most `page_size` entries per page.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
            page_size: page_size.max(1),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn add(&self, action: Action, meta: NewMeta) -> Result<InsertResult> {
        validate_new_entry(&action, &meta)?;
        let id = meta.id.as_ref().ok_or(ValidationError::MissingId)?;

        let mut inner = self.inner.write();
        if inner.ids.contains_key(id) {
            return Ok(InsertResult::AlreadyExists);
        }

        let added = inner.last_added + 1;
        let meta = meta.into_meta(added)?;
        inner.last_added = added;
        inner.ids.insert(meta.id.clone(), added);
        inner.created.insert(meta.created_key(), added);
        inner.entries.insert(added, (action, meta.clone()));

        Ok(InsertResult::Added(meta))
    }

    async fn has(&self, id: &ActionId) -> Result<bool> {
        Ok(self.inner.read().ids.contains_key(id))
    }

    async fn by_id(&self, id: &ActionId) -> Result<Option<Entry>> {
        let inner = self.inner.read();
        Ok(inner
            .ids
            .get(id)
            .and_then(|added| inner.entries.get(added))
            .cloned())
    }

    async fn get(&self, options: GetOptions) -> Result<Page> {
        let inner = self.inner.read();
        let limit = self.page_size + 1;

        let window = match (options.order, options.after.as_ref()) {
            (Order::Created, None) => inner.resolve(inner.created.values().rev(), limit),
            (Order::Created, Some(PageToken::Created(key))) => inner.resolve(
                inner.created.range(..key.clone()).rev().map(|(_, added)| added),
                limit,
            ),
            (Order::Added, None) => inner.resolve(inner.entries.keys().rev(), limit),
            (Order::Added, Some(PageToken::Added(added))) => {
                inner.resolve(inner.entries.range(..*added).rev().map(|(added, _)| added), limit)
            }
            (order, Some(token)) => {
                return Err(StoreError::InvalidData(format!(
                    "page token {token:?} does not belong to {order:?} order"
                )))
            }
        };

        Ok(Page::from_window(window, self.page_size, options.order))
    }

    async fn remove(&self, id: &ActionId) -> Result<Option<Entry>> {
        let mut inner = self.inner.write();
        let Some(added) = inner.ids.get(id).copied() else {
            return Ok(None);
        };
        Ok(inner.unlink(added))
    }

    async fn change_meta(&self, id: &ActionId, diff: MetaDiff) -> Result<bool> {
        let mut inner = self.inner.write();
        let Some(added) = inner.ids.get(id).copied() else {
            return Ok(false);
        };
        match inner.entries.get_mut(&added) {
            Some((_, meta)) => {
                meta.apply(diff);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_reason(
        &self,
        reason: &str,
        criteria: &ReasonCriteria,
        on_removed: &mut (dyn FnMut(Action, Meta) + Send),
    ) -> Result<usize> {
        let removed = {
            let mut inner = self.inner.write();

            let candidates: Vec<u64> = match &criteria.id {
                Some(id) => inner.ids.get(id).copied().into_iter().collect(),
                None => {
                    let min = criteria.min_added.unwrap_or(0);
                    let max = criteria.max_added.unwrap_or(u64::MAX);
                    if min > max {
                        Vec::new()
                    } else {
                        inner.entries.range(min..=max).map(|(added, _)| *added).collect()
                    }
                }
            };

            let mut removed = Vec::new();
            for added in candidates {
                let Some((_, meta)) = inner.entries.get_mut(&added) else {
                    continue;
                };
                if !criteria.matches(meta) || !meta.remove_reason(reason) {
                    continue;
                }
                if meta.reasons.is_empty() {
                    removed.extend(inner.unlink(added));
                }
            }
            removed
        };

        let count = removed.len();
        if count > 0 {
            tracing::debug!(reason, count, "removed entries without reasons");
        }
        for (action, meta) in removed {
            on_removed(action, meta);
        }
        Ok(count)
    }

    async fn get_last_added(&self) -> Result<u64> {
        Ok(self.inner.read().last_added)
    }

    async fn get_last_synced(&self) -> Result<SyncCursor> {
        Ok(self.inner.read().last_synced)
    }

    async fn set_last_synced(&self, update: SyncCursorUpdate) -> Result<()> {
        self.inner.write().last_synced.merge(update);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StoreExt;

    fn meta(id: (i64, &str, u64)) -> NewMeta {
        NewMeta::with_id(id).reason("test")
    }

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStore::new();

        let result = store.add(Action::new("A"), meta((1, "a", 0))).await.unwrap();
        let stored = result.meta().unwrap();
        assert_eq!(stored.added, 1);
        assert_eq!(stored.time, 1);

        let (action, meta) = store.by_id(&ActionId::new(1, "a", 0)).await.unwrap().unwrap();
        assert_eq!(action.kind, "A");
        assert_eq!(meta.added, 1);
    }

    #[tokio::test]
    async fn test_memory_store_idempotent() {
        let store = MemoryStore::new();

        let r1 = store.add(Action::new("A"), meta((1, "a", 0))).await.unwrap();
        assert!(r1.is_added());

        let r2 = store
            .add(Action::new("B"), meta((1, "a", 0)).time(50))
            .await
            .unwrap();
        assert_eq!(r2, InsertResult::AlreadyExists);
        assert_eq!(store.get_last_added().await.unwrap(), 1);

        let (action, meta) = store.by_id(&ActionId::new(1, "a", 0)).await.unwrap().unwrap();
        assert_eq!(action.kind, "A");
        assert_eq!(meta.time, 1);
    }

    #[tokio::test]
    async fn test_pages_split_by_page_size() {
        let store = MemoryStore::with_page_size(2);
        for i in 1..=5 {
            store.add(Action::new("A"), meta((i, "a", 0))).await.unwrap();
        }

        let first = store.get(GetOptions::added()).await.unwrap();
        assert_eq!(first.entries.len(), 2);
        assert_eq!(first.entries[0].1.added, 5);

        let all = store.all(Order::Added).await.unwrap();
        let added: Vec<u64> = all.iter().map(|(_, m)| m.added).collect();
        assert_eq!(added, vec![5, 4, 3, 2, 1]);
    }

    #[tokio::test]
    async fn test_mismatched_token_is_rejected() {
        let store = MemoryStore::new();
        let options = GetOptions {
            order: Order::Created,
            after: Some(PageToken::Added(3)),
        };
        assert!(matches!(
            store.get(options).await,
            Err(StoreError::InvalidData(_))
        ));
    }
}
