//! Property tests for store orderings and the log.

use std::collections::{BTreeSet, HashSet};

use actionlog_core::{compare_created, ActionId, Order};
use actionlog_store::{InsertResult, MemoryStore, SqliteStore, Store, StoreExt};
use actionlog_testkit::generators::{entries, entry_from_params, EntryParams};
use actionlog_testkit::TestFixture;
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

/// Insert `params` and return the ids that were new, in insertion order.
async fn insert<S: Store>(store: &S, params: &[EntryParams]) -> Vec<ActionId> {
    let mut inserted = Vec::new();
    for p in params {
        let (action, meta) = entry_from_params(p);
        if let InsertResult::Added(meta) = store.add(action, meta).await.unwrap() {
            inserted.push(meta.id);
        }
    }
    inserted
}

async fn check_orders<S: Store>(store: &S, params: &[EntryParams]) -> Result<(), TestCaseError> {
    let inserted = insert(store, params).await;

    let unique: HashSet<&ActionId> = params.iter().map(|p| &p.id).collect();
    prop_assert_eq!(inserted.len(), unique.len());

    let created = store.all(Order::Created).await.unwrap();
    prop_assert_eq!(created.len(), inserted.len());
    for pair in created.windows(2) {
        prop_assert_eq!(
            compare_created(&pair[0].1, &pair[1].1),
            std::cmp::Ordering::Less
        );
    }

    let by_added = store.all(Order::Added).await.unwrap();
    let mut expected = inserted.clone();
    expected.reverse();
    let actual: Vec<ActionId> = by_added.iter().map(|(_, m)| m.id.clone()).collect();
    prop_assert_eq!(actual, expected);

    let created_ids: BTreeSet<String> = created.iter().map(|(_, m)| m.id.to_string()).collect();
    let added_ids: BTreeSet<String> = by_added.iter().map(|(_, m)| m.id.to_string()).collect();
    prop_assert_eq!(created_ids, added_ids);

    prop_assert_eq!(
        store.get_last_added().await.unwrap(),
        inserted.len() as u64
    );
    Ok(())
}

proptest! {
    #[test]
    fn memory_orders_are_total(params in entries(40), page_size in 1usize..8) {
        runtime().block_on(check_orders(&MemoryStore::with_page_size(page_size), &params))?;
    }

    #[test]
    fn sqlite_orders_are_total(params in entries(40), page_size in 1usize..8) {
        let store = SqliteStore::open_memory().unwrap().with_page_size(page_size);
        runtime().block_on(check_orders(&store, &params))?;
    }

    #[test]
    fn backends_agree_on_created_order(params in entries(40)) {
        runtime().block_on(async {
            let memory = MemoryStore::new();
            let sqlite = SqliteStore::open_memory().unwrap();
            insert(&memory, &params).await;
            insert(&sqlite, &params).await;

            let a = memory.all(Order::Created).await.unwrap();
            let b = sqlite.all(Order::Created).await.unwrap();
            prop_assert_eq!(a, b);
            Ok(())
        })?;
    }

    #[test]
    fn log_ids_are_unique_under_a_stalled_clock(steps in prop::collection::vec(-2i64..3, 1..40)) {
        runtime().block_on(async {
            let fixture = TestFixture::new("node");
            fixture.set_time(100);
            let mut seen = HashSet::new();
            for step in steps {
                fixture.advance(step);
                let meta = fixture.add("tick").await.unwrap();
                prop_assert!(seen.insert(meta.id.clone()), "duplicate id {}", meta.id);
            }
            Ok(())
        })?;
    }
}
