//! Per-action metadata and the sync cursor.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::order::CreatedKey;
use crate::types::ActionId;

/// Keys owned by the store. They are never taken from extra fields.
pub const RESERVED_META_KEYS: [&str; 4] = ["id", "time", "added", "reasons"];

/// Metadata of a stored action.
///
/// `id`, `time` and `added` are fixed once the entry is stored. `reasons`
/// changes through `change_meta` and `remove_reason`; an entry whose
/// reasons run out during `remove_reason` is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub id: ActionId,
    pub time: i64,
    /// Store-local insertion counter. Zero for entries not stored yet.
    pub added: u64,
    pub reasons: BTreeSet<String>,
    /// Arbitrary fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Meta {
    /// Sort key of this entry in created order.
    pub fn created_key(&self) -> CreatedKey {
        CreatedKey::new(self.time, &self.id)
    }

    /// Merge a diff into this meta. `id`, `time` and `added` are untouched.
    pub fn apply(&mut self, diff: MetaDiff) {
        if let Some(reasons) = diff.reasons {
            self.reasons = reasons.into_iter().collect();
        }
        for (key, value) in diff.extra {
            if !is_reserved(&key) {
                self.extra.insert(key, value);
            }
        }
    }

    /// Drop one reason. Returns `true` if it was present.
    pub fn remove_reason(&mut self, reason: &str) -> bool {
        self.reasons.remove(reason)
    }
}

/// Metadata supplied when adding an action.
///
/// `id` is required by every store; it is optional here so the log layer
/// can fill it in. `time` defaults to `id.time`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewMeta {
    pub id: Option<ActionId>,
    pub time: Option<i64>,
    pub reasons: Vec<String>,
    pub extra: Map<String, Value>,
}

impl NewMeta {
    /// Empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata with the given id.
    pub fn with_id(id: impl Into<ActionId>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn time(mut self, time: i64) -> Self {
        self.time = Some(time);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reasons.push(reason.into());
        self
    }

    pub fn reasons<I, R>(mut self, reasons: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        self.reasons.extend(reasons.into_iter().map(Into::into));
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Build the stored metadata, stamping it with `added`.
    pub fn into_meta(self, added: u64) -> Result<Meta, ValidationError> {
        let id = self.id.ok_or(ValidationError::MissingId)?;
        let time = self.time.unwrap_or(id.time);
        let extra = self
            .extra
            .into_iter()
            .filter(|(key, _)| !is_reserved(key))
            .collect();
        Ok(Meta {
            id,
            time,
            added,
            reasons: self.reasons.into_iter().collect(),
            extra,
        })
    }
}

impl From<Meta> for NewMeta {
    /// Re-insert a stored entry elsewhere. The old `added` is dropped.
    fn from(meta: Meta) -> Self {
        Self {
            id: Some(meta.id),
            time: Some(meta.time),
            reasons: meta.reasons.into_iter().collect(),
            extra: meta.extra,
        }
    }
}

/// Shallow merge for `change_meta`. New keys win.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaDiff {
    /// Replaces the whole reason set when present.
    pub reasons: Option<Vec<String>>,
    pub extra: Map<String, Value>,
}

impl MetaDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reasons<I, R>(mut self, reasons: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        self.reasons = Some(reasons.into_iter().map(Into::into).collect());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Highest `added` values acknowledged as sent to and received from the peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub sent: u64,
    pub received: u64,
}

impl SyncCursor {
    /// Overwrite only the fields present in `update`.
    pub fn merge(&mut self, update: SyncCursorUpdate) {
        if let Some(sent) = update.sent {
            self.sent = sent;
        }
        if let Some(received) = update.received {
            self.received = received;
        }
    }
}

/// Partial update of a [`SyncCursor`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCursorUpdate {
    pub sent: Option<u64>,
    pub received: Option<u64>,
}

impl SyncCursorUpdate {
    pub fn sent(value: u64) -> Self {
        Self {
            sent: Some(value),
            received: None,
        }
    }

    pub fn received(value: u64) -> Self {
        Self {
            sent: None,
            received: Some(value),
        }
    }

    pub fn both(sent: u64, received: u64) -> Self {
        Self {
            sent: Some(sent),
            received: Some(received),
        }
    }
}

fn is_reserved(key: &str) -> bool {
    RESERVED_META_KEYS.contains(&key)
}
