//! # Action Log Testkit
//!
//! Testing utilities for the action log.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Conformance suite**: Every contract a store backend must honor
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: Helpers for setting up test scenarios
//!
//! ## Certifying a Store
//!
//! A backend is compatible when the suite passes against fresh instances:
//!
//! ```rust,ignore
//! use actionlog_store::MemoryStore;
//! use actionlog_testkit::run_conformance;
//!
//! #[tokio::test]
//! async fn memory_store_conforms() {
//!     run_conformance(MemoryStore::new).await;
//! }
//! ```
//!
//! ## Property Testing
//!
//! Use the generators with proptest:
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use actionlog_testkit::generators::{entries, entry_from_params};
//!
//! proptest! {
//!     #[test]
//!     fn every_entry_is_listed(params in entries(32)) {
//!         // insert with entry_from_params, then drain both orders
//!     }
//! }
//! ```

use std::sync::Once;

use tracing_subscriber::filter::LevelFilter;

pub mod conformance;
pub mod fixtures;
pub mod generators;

pub use conformance::run_conformance;
pub use fixtures::{entry, fill, fill_scenario, TestFixture, SCENARIO, SCENARIO_CREATED};
pub use generators::{entry_from_params, EntryParams};

/// Install a `fmt` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(LevelFilter::DEBUG)
            .try_init();
    });
}
