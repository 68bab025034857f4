//! Store trait: the abstract interface for entry persistence.
//!
//! Every backend exposes exactly this surface. The conformance suite in
//! `actionlog-testkit` certifies a backend against it.

use actionlog_core::{
    Action, ActionId, CreatedKey, Meta, MetaDiff, NewMeta, Order, SyncCursor, SyncCursorUpdate,
};
use async_trait::async_trait;

use crate::error::Result;

/// A stored action with its metadata.
pub type Entry = (Action, Meta);

/// Result of adding an action.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertResult {
    /// The entry was stored; carries its final metadata including `added`.
    Added(Meta),
    /// An entry with the same id exists (idempotent - not an error).
    AlreadyExists,
}

impl InsertResult {
    /// Metadata of the new entry, if one was stored.
    pub fn meta(&self) -> Option<&Meta> {
        match self {
            InsertResult::Added(meta) => Some(meta),
            InsertResult::AlreadyExists => None,
        }
    }

    pub fn into_meta(self) -> Option<Meta> {
        match self {
            InsertResult::Added(meta) => Some(meta),
            InsertResult::AlreadyExists => None,
        }
    }

    pub fn is_added(&self) -> bool {
        matches!(self, InsertResult::Added(_))
    }
}

/// Position after which the next page starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageToken {
    /// Continue with entries older than this key.
    Created(CreatedKey),
    /// Continue with entries whose `added` is below this value.
    Added(u64),
}

/// Arguments of [`Store::get`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOptions {
    pub order: Order,
    /// `None` fetches the first page.
    pub after: Option<PageToken>,
}

impl GetOptions {
    pub fn new(order: Order) -> Self {
        Self { order, after: None }
    }

    pub fn created() -> Self {
        Self::new(Order::Created)
    }

    pub fn added() -> Self {
        Self::new(Order::Added)
    }
}

impl From<Order> for GetOptions {
    fn from(order: Order) -> Self {
        Self::new(order)
    }
}

/// One page of an ordered iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub entries: Vec<Entry>,
    /// Options fetching the following page. `None` on the last page.
    pub next: Option<GetOptions>,
}

impl Page {
    /// Build a page from up to `page_size + 1` entries already in `order`.
    ///
    /// The extra entry only signals that another page exists; it is dropped.
    pub fn from_window(mut entries: Vec<Entry>, page_size: usize, order: Order) -> Self {
        let has_more = entries.len() > page_size;
        entries.truncate(page_size);
        let next = match entries.last() {
            Some((_, meta)) if has_more => Some(GetOptions {
                order,
                after: Some(match order {
                    Order::Created => PageToken::Created(meta.created_key()),
                    Order::Added => PageToken::Added(meta.added),
                }),
            }),
            _ => None,
        };
        Self { entries, next }
    }
}

/// Filter for [`Store::remove_reason`].
///
/// Bounds are inclusive. `max_added: Some(0)` is a real bound that matches
/// nothing, not "unset".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReasonCriteria {
    pub min_added: Option<u64>,
    pub max_added: Option<u64>,
    /// Only touch the entry with this id.
    pub id: Option<ActionId>,
}

impl ReasonCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_added(mut self, value: u64) -> Self {
        self.min_added = Some(value);
        self
    }

    pub fn max_added(mut self, value: u64) -> Self {
        self.max_added = Some(value);
        self
    }

    pub fn id(mut self, id: impl Into<ActionId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Whether an entry falls inside the criteria (reasons aside).
    pub fn matches(&self, meta: &Meta) -> bool {
        self.min_added.map_or(true, |min| meta.added >= min)
            && self.max_added.map_or(true, |max| meta.added <= max)
            && self.id.as_ref().map_or(true, |id| &meta.id == id)
    }
}

/// The Store trait: async interface for entry persistence.
///
/// Each call is atomic on its own. Concurrent calls may interleave, but
/// `added` values stay strictly increasing and are never reused, even for
/// entries that were later removed.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Entry Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert an action.
    ///
    /// # Returns
    /// - `Added(meta)` with the assigned `added` if the id was new.
    /// - `AlreadyExists` if the id is known; nothing is changed.
    ///
    /// # Errors
    /// `StoreError::Validation` when `meta.id` is missing or the action
    /// has an empty type.
    async fn add(&self, action: Action, meta: NewMeta) -> Result<InsertResult>;

    /// Check if an entry exists.
    async fn has(&self, id: &ActionId) -> Result<bool>;

    /// Get an entry by id.
    async fn by_id(&self, id: &ActionId) -> Result<Option<Entry>>;

    /// Fetch one page in the requested order.
    ///
    /// Following `next` until it is `None` yields every live entry exactly
    /// once, in order.
    async fn get(&self, options: GetOptions) -> Result<Page>;

    /// Remove an entry regardless of its reasons.
    ///
    /// Returns the removed entry, or `None` if the id is unknown.
    async fn remove(&self, id: &ActionId) -> Result<Option<Entry>>;

    /// Merge `diff` into the entry's meta.
    ///
    /// Returns `false` if the id is unknown.
    async fn change_meta(&self, id: &ActionId, diff: MetaDiff) -> Result<bool>;

    /// Drop `reason` from every entry matching `criteria`.
    ///
    /// Entries left without reasons are deleted and passed to `on_removed`
    /// in ascending `added` order. Returns how many entries were deleted.
    async fn remove_reason(
        &self,
        reason: &str,
        criteria: &ReasonCriteria,
        on_removed: &mut (dyn FnMut(Action, Meta) + Send),
    ) -> Result<usize>;

    // ─────────────────────────────────────────────────────────────────────────
    // Counters
    // ─────────────────────────────────────────────────────────────────────────

    /// Highest `added` ever assigned; `0` for a fresh store.
    async fn get_last_added(&self) -> Result<u64>;

    /// Replication cursor; `{sent: 0, received: 0}` for a fresh store.
    async fn get_last_synced(&self) -> Result<SyncCursor>;

    /// Overwrite only the cursor fields present in `update`.
    async fn set_last_synced(&self, update: SyncCursorUpdate) -> Result<()>;
}

/// Extension trait for common store patterns.
pub trait StoreExt: Store {
    /// Drain every page of `order` into one vector.
    fn all(&self, order: Order) -> impl std::future::Future<Output = Result<Vec<Entry>>> + Send;
}

impl<S: Store + ?Sized> StoreExt for S {
    async fn all(&self, order: Order) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        let mut options = Some(GetOptions::new(order));
        while let Some(current) = options {
            let page = self.get(current).await?;
            entries.extend(page.entries);
            options = page.next;
        }
        Ok(entries)
    }
}

#[async_trait]
impl<S: Store + ?Sized> Store for std::sync::Arc<S> {
    async fn add(&self, action: Action, meta: NewMeta) -> Result<InsertResult> {
        (**self).add(action, meta).await
    }

    async fn has(&self, id: &ActionId) -> Result<bool> {
        (**self).has(id).await
    }

    async fn by_id(&self, id: &ActionId) -> Result<Option<Entry>> {
        (**self).by_id(id).await
    }

    async fn get(&self, options: GetOptions) -> Result<Page> {
        (**self).get(options).await
    }

    async fn remove(&self, id: &ActionId) -> Result<Option<Entry>> {
        (**self).remove(id).await
    }

    async fn change_meta(&self, id: &ActionId, diff: MetaDiff) -> Result<bool> {
        (**self).change_meta(id, diff).await
    }

    async fn remove_reason(
        &self,
        reason: &str,
        criteria: &ReasonCriteria,
        on_removed: &mut (dyn FnMut(Action, Meta) + Send),
    ) -> Result<usize> {
        (**self).remove_reason(reason, criteria, on_removed).await
    }

    async fn get_last_added(&self) -> Result<u64> {
        (**self).get_last_added().await
    }

    async fn get_last_synced(&self) -> Result<SyncCursor> {
        (**self).get_last_synced().await
    }

    async fn set_last_synced(&self, update: SyncCursorUpdate) -> Result<()> {
        (**self).set_last_synced(update).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: (i64, &str, u64), added: u64) -> Entry {
        let meta = NewMeta::with_id(id).into_meta(added).unwrap();
        (Action::new("test"), meta)
    }

    #[test]
    fn test_page_from_window_sets_next() {
        let window = vec![entry((3, "a", 0), 3), entry((2, "a", 0), 2), entry((1, "a", 0), 1)];
        let page = Page::from_window(window, 2, Order::Added);
        assert_eq!(page.entries.len(), 2);
        assert_eq!(
            page.next,
            Some(GetOptions {
                order: Order::Added,
                after: Some(PageToken::Added(2)),
            })
        );
    }

    #[test]
    fn test_page_from_window_last_page() {
        let window = vec![entry((3, "a", 0), 3), entry((2, "a", 0), 2)];
        let page = Page::from_window(window, 2, Order::Created);
        assert_eq!(page.entries.len(), 2);
        assert!(page.next.is_none());

        let page = Page::from_window(Vec::new(), 2, Order::Created);
        assert!(page.entries.is_empty());
        assert!(page.next.is_none());
    }

    #[test]
    fn test_reason_criteria_bounds() {
        let (_, meta) = entry((1, "a", 0), 2);
        assert!(ReasonCriteria::new().matches(&meta));
        assert!(ReasonCriteria::new().min_added(2).matches(&meta));
        assert!(!ReasonCriteria::new().min_added(3).matches(&meta));
        assert!(ReasonCriteria::new().max_added(2).matches(&meta));
        assert!(!ReasonCriteria::new().max_added(0).matches(&meta));
        assert!(ReasonCriteria::new().id((1, "a", 0)).matches(&meta));
        assert!(!ReasonCriteria::new().id((1, "b", 0)).matches(&meta));
    }
}
