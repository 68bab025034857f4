//! Error types for the action log core.

use thiserror::Error;

/// Contract violations detected before an entry reaches a store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("meta.id is required")]
    MissingId,

    #[error("action type must not be empty")]
    EmptyActionType,

    #[error("id sequence {0} exceeds {max}", max = crate::ActionId::MAX_SEQ)]
    SeqOutOfRange(u64),
}
