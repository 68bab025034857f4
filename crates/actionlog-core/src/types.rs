//! Strong type definitions for the action log.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of an action: `(logical time, origin node, sequence)`.
///
/// Two entries with equal ids are the same entry. The id is assigned once,
/// by the node that created the action, and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(i64, String, u64)", into = "(i64, String, u64)")]
pub struct ActionId {
    /// Logical creation time in milliseconds.
    pub time: i64,
    /// Identifier of the node that created the action.
    pub origin: String,
    /// Disambiguates actions created by one node within the same millisecond.
    pub seq: u64,
}

impl ActionId {
    /// Largest sequence number every store backend can hold.
    pub const MAX_SEQ: u64 = i64::MAX as u64;

    /// Create a new id.
    pub fn new(time: i64, origin: impl Into<String>, seq: u64) -> Self {
        Self {
            time,
            origin: origin.into(),
            seq,
        }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.time, self.origin, self.seq)
    }
}

/// Error returned when an [`ActionId`] string is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed action id: {0:?}")]
pub struct ParseIdError(pub String);

impl FromStr for ActionId {
    type Err = ParseIdError;

    /// Parse the `"<time> <origin> <seq>"` form produced by `Display`.
    ///
    /// The origin may itself contain spaces.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseIdError(s.to_string());
        let (time, rest) = s.split_once(' ').ok_or_else(err)?;
        let (origin, seq) = rest.rsplit_once(' ').ok_or_else(err)?;
        if origin.is_empty() {
            return Err(err());
        }
        Ok(Self {
            time: time.parse().map_err(|_| err())?,
            origin: origin.to_string(),
            seq: seq.parse().map_err(|_| err())?,
        })
    }
}

impl From<(i64, String, u64)> for ActionId {
    fn from((time, origin, seq): (i64, String, u64)) -> Self {
        Self { time, origin, seq }
    }
}

impl From<(i64, &str, u64)> for ActionId {
    fn from((time, origin, seq): (i64, &str, u64)) -> Self {
        Self::new(time, origin, seq)
    }
}

impl From<ActionId> for (i64, String, u64) {
    fn from(id: ActionId) -> Self {
        (id.time, id.origin, id.seq)
    }
}
