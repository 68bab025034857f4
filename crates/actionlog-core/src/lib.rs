//! # Action Log Core
//!
//! Pure primitives for the action log: actions, their metadata, and the
//! orderings every store must agree on.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Action`] - Opaque payload with a `type` tag
//! - [`ActionId`] - `(time, origin, seq)` identity of an action
//! - [`Meta`] - Ordering and retention metadata of a stored action
//! - [`NewMeta`] - Metadata supplied by the caller on insertion
//! - [`MetaDiff`] - Shallow merge applied by `change_meta`
//! - [`SyncCursor`] - `{sent, received}` replication high-water marks
//!
//! ## Orderings
//!
//! Stores expose two orders, both newest first. See [`order`] module.

pub mod action;
pub mod error;
pub mod meta;
pub mod order;
pub mod types;
pub mod validation;

pub use action::Action;
pub use error::ValidationError;
pub use meta::{Meta, MetaDiff, NewMeta, SyncCursor, SyncCursorUpdate, RESERVED_META_KEYS};
pub use order::{compare_created, CreatedKey, Order};
pub use types::{ActionId, ParseIdError};
pub use validation::validate_new_entry;
