//! SQLite implementation of the Store trait.
//!
//! The persistent backend. It uses rusqlite with bundled SQLite, wrapped in
//! async via tokio::spawn_blocking. Action fields and extra meta fields are
//! stored as CBOR blobs; ids, times and reasons get real columns so both
//! orders and `remove_reason` run as indexed queries.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use actionlog_core::{
    validate_new_entry, Action, ActionId, Meta, MetaDiff, NewMeta, Order, SyncCursor,
    SyncCursorUpdate, ValidationError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};
use crate::memory::DEFAULT_PAGE_SIZE;
use crate::migration::{self, COUNTER_LAST_ADDED, COUNTER_SYNCED_RECEIVED, COUNTER_SYNCED_SENT};
use crate::traits::{Entry, GetOptions, InsertResult, Page, PageToken, ReasonCriteria, Store};

const ENTRY_COLUMNS: &str =
    "added, id_time, id_origin, id_seq, time, action_type, action_fields, extra";

const CREATED_DESC: &str = "time DESC, id_origin DESC, id_seq DESC, id_time DESC";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    page_size: usize,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "opened sqlite store");
        Self::from_connection(conn)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Return at most `page_size` entries per page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {e}")))?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

/// An `entries` row before its blobs are decoded.
struct RawEntry {
    added: i64,
    id_time: i64,
    id_origin: String,
    id_seq: i64,
    time: i64,
    action_type: String,
    action_fields: Vec<u8>,
    extra: Vec<u8>,
}

impl RawEntry {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            added: row.get(0)?,
            id_time: row.get(1)?,
            id_origin: row.get(2)?,
            id_seq: row.get(3)?,
            time: row.get(4)?,
            action_type: row.get(5)?,
            action_fields: row.get(6)?,
            extra: row.get(7)?,
        })
    }

    /// Decode blobs and attach the entry's reasons.
    fn into_entry(self, conn: &Connection) -> Result<Entry> {
        let mut stmt =
            conn.prepare_cached("SELECT reason FROM reasons WHERE added = ?1 ORDER BY reason")?;
        let reasons: BTreeSet<String> = stmt
            .query_map(params![self.added], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<_>>()?;

        let action = Action {
            kind: self.action_type,
            fields: decode_map(&self.action_fields)?,
        };
        let meta = Meta {
            id: ActionId::new(self.id_time, self.id_origin, to_u64(self.id_seq)?),
            time: self.time,
            added: to_u64(self.added)?,
            reasons,
            extra: decode_map(&self.extra)?,
        };
        Ok((action, meta))
    }
}

fn encode_map(map: &Map<String, Value>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(map, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_map(bytes: &[u8]) -> Result<Map<String, Value>> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// SQLite integers are signed; counters above `i64::MAX` cannot be stored.
fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| StoreError::InvalidData(format!("{value} does not fit in an SQLite integer")))
}

fn to_u64(value: i64) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| StoreError::InvalidData(format!("negative counter in storage: {value}")))
}

/// An id whose sequence cannot be stored cannot be present either.
fn find_added(conn: &Connection, id: &ActionId) -> Result<Option<i64>> {
    let Ok(seq) = i64::try_from(id.seq) else {
        return Ok(None);
    };
    let mut stmt = conn.prepare_cached(
        "SELECT added FROM entries WHERE id_time = ?1 AND id_origin = ?2 AND id_seq = ?3",
    )?;
    Ok(stmt
        .query_row(params![id.time, id.origin, seq], |row| row.get(0))
        .optional()?)
}

fn load_entry(conn: &Connection, added: i64) -> Result<Option<Entry>> {
    let raw = conn
        .query_row(
            &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE added = ?1"),
            params![added],
            RawEntry::from_row,
        )
        .optional()?;
    raw.map(|raw| raw.into_entry(conn)).transpose()
}

fn delete_entry(tx: &Transaction<'_>, added: i64) -> Result<()> {
    tx.execute("DELETE FROM reasons WHERE added = ?1", params![added])?;
    tx.execute("DELETE FROM entries WHERE added = ?1", params![added])?;
    Ok(())
}

fn insert_reasons<'a>(
    tx: &Transaction<'_>,
    added: i64,
    reasons: impl IntoIterator<Item = &'a String>,
) -> Result<()> {
    let mut stmt =
        tx.prepare_cached("INSERT OR IGNORE INTO reasons (added, reason) VALUES (?1, ?2)")?;
    for reason in reasons {
        stmt.execute(params![added, reason])?;
    }
    Ok(())
}

fn read_counter(conn: &Connection, name: &str) -> Result<u64> {
    let value: i64 = conn.query_row(
        "SELECT value FROM counters WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    to_u64(value)
}

fn write_counter(conn: &Connection, name: &str, value: u64) -> Result<()> {
    conn.execute(
        "UPDATE counters SET value = ?2 WHERE name = ?1",
        params![name, to_i64(value)?],
    )?;
    Ok(())
}

fn query_window(
    conn: &Connection,
    options: &GetOptions,
    limit: i64,
) -> Result<Vec<RawEntry>> {
    let rows = match (options.order, options.after.as_ref()) {
        (Order::Created, None) => {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {ENTRY_COLUMNS} FROM entries ORDER BY {CREATED_DESC} LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit], RawEntry::from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
        (Order::Created, Some(PageToken::Created(key))) => {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {ENTRY_COLUMNS} FROM entries
                 WHERE (time, id_origin, id_seq, id_time) < (?1, ?2, ?3, ?4)
                 ORDER BY {CREATED_DESC} LIMIT ?5"
            ))?;
            let rows = stmt.query_map(
                params![key.time, key.origin, to_i64(key.seq)?, key.id_time, limit],
                RawEntry::from_row,
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
        (Order::Added, None) => {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {ENTRY_COLUMNS} FROM entries ORDER BY added DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit], RawEntry::from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
        (Order::Added, Some(PageToken::Added(added))) => {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {ENTRY_COLUMNS} FROM entries WHERE added < ?1
                 ORDER BY added DESC LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![to_i64(*added)?, limit], RawEntry::from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
        (order, Some(token)) => {
            return Err(StoreError::InvalidData(format!(
                "page token {token:?} does not belong to {order:?} order"
            )))
        }
    };
    Ok(rows)
}

#[async_trait]
impl Store for SqliteStore {
    async fn add(&self, action: Action, meta: NewMeta) -> Result<InsertResult> {
        validate_new_entry(&action, &meta)?;
        let action_fields = encode_map(&action.fields)?;

        self.blocking(move |conn| {
            let tx = conn.transaction()?;

            let id = meta.id.as_ref().ok_or(ValidationError::MissingId)?;
            if find_added(&tx, id)?.is_some() {
                return Ok(InsertResult::AlreadyExists);
            }

            let added = read_counter(&tx, COUNTER_LAST_ADDED)? + 1;
            let meta = meta.into_meta(added)?;
            let added_sql = to_i64(added)?;

            tx.execute(
                "INSERT INTO entries (
                    added, id_time, id_origin, id_seq, time, action_type, action_fields, extra
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    added_sql,
                    meta.id.time,
                    meta.id.origin,
                    to_i64(meta.id.seq)?,
                    meta.time,
                    action.kind,
                    action_fields,
                    encode_map(&meta.extra)?,
                ],
            )?;
            insert_reasons(&tx, added_sql, &meta.reasons)?;
            write_counter(&tx, COUNTER_LAST_ADDED, added)?;

            tx.commit()?;
            Ok(InsertResult::Added(meta))
        })
        .await
    }

    async fn has(&self, id: &ActionId) -> Result<bool> {
        let id = id.clone();
        self.blocking(move |conn| Ok(find_added(conn, &id)?.is_some()))
            .await
    }

    async fn by_id(&self, id: &ActionId) -> Result<Option<Entry>> {
        let id = id.clone();
        self.blocking(move |conn| match find_added(conn, &id)? {
            Some(added) => load_entry(conn, added),
            None => Ok(None),
        })
        .await
    }

    async fn get(&self, options: GetOptions) -> Result<Page> {
        let page_size = self.page_size;
        let limit = to_i64(page_size as u64 + 1)?;

        self.blocking(move |conn| {
            let window = query_window(conn, &options, limit)?
                .into_iter()
                .map(|raw| raw.into_entry(conn))
                .collect::<Result<Vec<_>>>()?;
            Ok(Page::from_window(window, page_size, options.order))
        })
        .await
    }

    async fn remove(&self, id: &ActionId) -> Result<Option<Entry>> {
        let id = id.clone();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let Some(added) = find_added(&tx, &id)? else {
                return Ok(None);
            };
            let entry = load_entry(&tx, added)?;
            delete_entry(&tx, added)?;
            tx.commit()?;
            Ok(entry)
        })
        .await
    }

    async fn change_meta(&self, id: &ActionId, diff: MetaDiff) -> Result<bool> {
        let id = id.clone();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let Some(added) = find_added(&tx, &id)? else {
                return Ok(false);
            };
            let Some((_, mut meta)) = load_entry(&tx, added)? else {
                return Ok(false);
            };

            let replaces_reasons = diff.reasons.is_some();
            meta.apply(diff);

            tx.execute(
                "UPDATE entries SET extra = ?2 WHERE added = ?1",
                params![added, encode_map(&meta.extra)?],
            )?;
            if replaces_reasons {
                tx.execute("DELETE FROM reasons WHERE added = ?1", params![added])?;
                insert_reasons(&tx, added, &meta.reasons)?;
            }

            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn remove_reason(
        &self,
        reason: &str,
        criteria: &ReasonCriteria,
        on_removed: &mut (dyn FnMut(Action, Meta) + Send),
    ) -> Result<usize> {
        let target = reason.to_string();
        let criteria = criteria.clone();

        let removed = self
            .blocking(move |conn| {
                let tx = conn.transaction()?;

                let candidates: Vec<i64> = match &criteria.id {
                    Some(id) => find_added(&tx, id)?.into_iter().collect(),
                    None => {
                        let min = to_i64(criteria.min_added.unwrap_or(0))?;
                        let max = criteria.max_added.map(to_i64).transpose()?.unwrap_or(i64::MAX);
                        let mut stmt = tx.prepare_cached(
                            "SELECT added FROM reasons
                             WHERE reason = ?1 AND added >= ?2 AND added <= ?3
                             ORDER BY added",
                        )?;
                        let rows = stmt.query_map(params![target, min, max], |row| row.get(0))?;
                        rows.collect::<rusqlite::Result<Vec<_>>>()?
                    }
                };

                let mut removed = Vec::new();
                for added in candidates {
                    let Some((action, mut meta)) = load_entry(&tx, added)? else {
                        continue;
                    };
                    if !criteria.matches(&meta) || !meta.remove_reason(&target) {
                        continue;
                    }
                    if meta.reasons.is_empty() {
                        delete_entry(&tx, added)?;
                        removed.push((action, meta));
                    } else {
                        tx.execute(
                            "DELETE FROM reasons WHERE added = ?1 AND reason = ?2",
                            params![added, target],
                        )?;
                    }
                }

                tx.commit()?;
                Ok(removed)
            })
            .await?;

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
        self.blocking(|conn| read_counter(conn, COUNTER_LAST_ADDED))
            .await
    }

    async fn get_last_synced(&self) -> Result<SyncCursor> {
        self.blocking(|conn| {
            Ok(SyncCursor {
                sent: read_counter(conn, COUNTER_SYNCED_SENT)?,
                received: read_counter(conn, COUNTER_SYNCED_RECEIVED)?,
            })
        })
        .await
    }

    async fn set_last_synced(&self, update: SyncCursorUpdate) -> Result<()> {
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            if let Some(sent) = update.sent {
                write_counter(&tx, COUNTER_SYNCED_SENT, sent)?;
            }
            if let Some(received) = update.received {
                write_counter(&tx, COUNTER_SYNCED_RECEIVED, received)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StoreExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_sqlite_roundtrip_preserves_fields() {
        let store = SqliteStore::open_memory().unwrap();

        let action = Action::new("user/rename")
            .with("name", "Ann")
            .with("tags", json!(["a", "b"]))
            .with("score", 1.5);
        let meta = NewMeta::with_id((5, "node", 2))
            .time(7)
            .reasons(["b", "a"])
            .field("author", json!({ "id": 3 }));

        let stored = store.add(action.clone(), meta).await.unwrap().into_meta().unwrap();
        assert_eq!(stored.added, 1);

        let (loaded_action, loaded_meta) =
            store.by_id(&ActionId::new(5, "node", 2)).await.unwrap().unwrap();
        assert_eq!(loaded_action, action);
        assert_eq!(loaded_meta, stored);
        assert_eq!(loaded_meta.extra.get("author"), Some(&json!({ "id": 3 })));
    }

    #[tokio::test]
    async fn test_sqlite_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            for i in 1..=3 {
                store
                    .add(Action::new("A"), NewMeta::with_id((i, "a", 0)).reason("keep"))
                    .await
                    .unwrap();
            }
            store.remove(&ActionId::new(3, "a", 0)).await.unwrap();
            store
                .set_last_synced(SyncCursorUpdate::both(2, 9))
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get_last_added().await.unwrap(), 3);
        assert_eq!(
            store.get_last_synced().await.unwrap(),
            SyncCursor { sent: 2, received: 9 }
        );
        assert!(store.has(&ActionId::new(2, "a", 0)).await.unwrap());
        assert!(!store.has(&ActionId::new(3, "a", 0)).await.unwrap());

        let result = store
            .add(Action::new("A"), NewMeta::with_id((4, "a", 0)).reason("keep"))
            .await
            .unwrap();
        assert_eq!(result.meta().unwrap().added, 4);
    }

    #[tokio::test]
    async fn test_sqlite_created_pages() {
        let store = SqliteStore::open_memory().unwrap().with_page_size(1);
        for (id, time) in [((1, "a", 0), 1), ((1, "c", 0), 2), ((1, "b", 1), 2), ((3, "b", 0), 2)] {
            store
                .add(Action::new("A"), NewMeta::with_id(id).time(time).reason("test"))
                .await
                .unwrap();
        }

        let ids: Vec<String> = store
            .all(Order::Created)
            .await
            .unwrap()
            .into_iter()
            .map(|(_, meta)| meta.id.to_string())
            .collect();
        assert_eq!(ids, vec!["1 c 0", "1 b 1", "3 b 0", "1 a 0"]);
    }

    #[tokio::test]
    async fn test_sqlite_change_meta_replaces_reasons() {
        let store = SqliteStore::open_memory().unwrap();
        let id = ActionId::new(1, "a", 0);
        store
            .add(Action::new("A"), NewMeta::with_id(id.clone()).reason("a"))
            .await
            .unwrap();

        let changed = store
            .change_meta(&id, MetaDiff::new().reasons(["b", "c"]).field("seen", true))
            .await
            .unwrap();
        assert!(changed);

        let (_, meta) = store.by_id(&id).await.unwrap().unwrap();
        let reasons: Vec<&str> = meta.reasons.iter().map(String::as_str).collect();
        assert_eq!(reasons, vec!["b", "c"]);
        assert_eq!(meta.extra.get("seen"), Some(&json!(true)));

        let mut removed = Vec::new();
        let count = store
            .remove_reason("b", &ReasonCriteria::new(), &mut |_, meta| removed.push(meta.id))
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert!(removed.is_empty());
        assert!(store.has(&id).await.unwrap());
    }
}
