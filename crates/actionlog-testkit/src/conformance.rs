//! Store conformance suite.
//!
//! Every backend is certified by running [`run_conformance`] with a
//! constructor that returns a fresh, empty store. Each check gets its own
//! store, so checks never see each other's entries. Checks panic on the
//! first violated expectation, which makes them usable straight from a
//! `#[tokio::test]`.

use actionlog_core::{
    compare_created, Action, ActionId, MetaDiff, NewMeta, Order, SyncCursor, SyncCursorUpdate,
    ValidationError,
};
use actionlog_store::{GetOptions, InsertResult, ReasonCriteria, Store, StoreError, StoreExt};
use futures_util::future::{join, join_all};

use crate::fixtures::{
    added, entry, fill, fill_scenario, ids, SCENARIO_CREATED, TEST_REASON,
};

/// Run every check against fresh stores from `make`.
pub async fn run_conformance<S, F>(make: F)
where
    S: Store,
    F: Fn() -> S,
{
    crate::init_tracing();

    empty_store(&make()).await;
    created_order(&make()).await;
    added_order(&make()).await;
    idempotent_add(&make()).await;
    missing_id_rejected(&make()).await;
    seq_out_of_range(&make()).await;
    time_defaults_to_id(&make()).await;
    has_and_remove(&make()).await;
    change_meta(&make()).await;
    extra_fields_preserved(&make()).await;
    remove_reason(&make()).await;
    remove_reason_bounds(&make(), ReasonCriteria::new().min_added(2), &[2, 3]).await;
    remove_reason_bounds(&make(), ReasonCriteria::new().max_added(2), &[1, 2]).await;
    remove_reason_bounds(
        &make(),
        ReasonCriteria::new().min_added(2).max_added(2),
        &[2],
    )
    .await;
    remove_reason_bounds(&make(), ReasonCriteria::new().max_added(0), &[]).await;
    remove_reason_by_id(&make()).await;
    remove_reason_callback_order(&make()).await;
    last_added_survives_removal(&make()).await;
    concurrent_adds(&make()).await;
    sync_cursor_merge(&make()).await;
    pagination_covers_every_entry(&make()).await;
    pagination_survives_mutation(&make()).await;
}

fn id(time: i64, origin: &str, seq: u64) -> ActionId {
    ActionId::new(time, origin, seq)
}

macro_rules! check {
    ($name:expr) => {
        tracing::debug!(check = $name, "running store check");
    };
}

/// A fresh store is empty in both orders and has zeroed counters.
pub async fn empty_store<S: Store + ?Sized>(store: &S) {
    check!("empty_store");
    for order in [Order::Created, Order::Added] {
        let page = store.get(GetOptions::new(order)).await.unwrap();
        assert!(page.entries.is_empty());
        assert!(page.next.is_none());
        assert!(store.all(order).await.unwrap().is_empty());
    }
    assert_eq!(store.get_last_added().await.unwrap(), 0);
    assert_eq!(
        store.get_last_synced().await.unwrap(),
        SyncCursor {
            sent: 0,
            received: 0
        }
    );
}

/// Created order: time, then origin, then sequence, all descending.
pub async fn created_order<S: Store + ?Sized>(store: &S) {
    check!("created_order");
    fill_scenario(store).await.unwrap();

    let entries = store.all(Order::Created).await.unwrap();
    let expected: Vec<ActionId> = SCENARIO_CREATED.iter().cloned().map(ActionId::from).collect();
    assert_eq!(ids(&entries), expected);
}

/// Added order is reverse insertion order and `added` counts from 1.
pub async fn added_order<S: Store + ?Sized>(store: &S) {
    check!("added_order");
    let stored = fill(
        store,
        [entry((5, "a", 0)), entry((1, "b", 0)), entry((3, "c", 0))],
    )
    .await
    .unwrap();
    assert_eq!(stored.iter().map(|m| m.added).collect::<Vec<_>>(), vec![1, 2, 3]);

    let entries = store.all(Order::Added).await.unwrap();
    assert_eq!(added(&entries), vec![3, 2, 1]);
    assert_eq!(
        ids(&entries),
        vec![id(3, "c", 0), id(1, "b", 0), id(5, "a", 0)]
    );
    assert_eq!(store.get_last_added().await.unwrap(), 3);
}

/// A second insertion with a known id changes nothing.
pub async fn idempotent_add<S: Store + ?Sized>(store: &S) {
    check!("idempotent_add");
    let first = store
        .add(
            Action::new("first"),
            NewMeta::with_id((1, "a", 0)).time(10).reason("a"),
        )
        .await
        .unwrap();
    assert!(first.is_added());
    assert_eq!(first.meta().map(|m| m.added), Some(1));

    let second = store
        .add(
            Action::new("second"),
            NewMeta::with_id((1, "a", 0)).time(20).reason("b"),
        )
        .await
        .unwrap();
    assert_eq!(second, InsertResult::AlreadyExists);

    let (action, meta) = store.by_id(&id(1, "a", 0)).await.unwrap().unwrap();
    assert_eq!(action.kind, "first");
    assert_eq!(meta.time, 10);
    assert_eq!(meta.added, 1);
    assert!(meta.reasons.contains("a") && !meta.reasons.contains("b"));
    assert_eq!(store.get_last_added().await.unwrap(), 1);

    let (action, meta) = entry((2, "a", 0));
    let next = store.add(action, meta).await.unwrap();
    assert_eq!(next.meta().map(|m| m.added), Some(2));
}

/// Entries without an id are rejected and consume no `added` value.
pub async fn missing_id_rejected<S: Store + ?Sized>(store: &S) {
    check!("missing_id_rejected");
    let result = store
        .add(Action::new("a"), NewMeta::new().reason(TEST_REASON))
        .await;
    assert!(matches!(
        result,
        Err(StoreError::Validation(ValidationError::MissingId))
    ));
    assert_eq!(store.get_last_added().await.unwrap(), 0);
    assert!(store.all(Order::Added).await.unwrap().is_empty());
}

/// Ids past [`ActionId::MAX_SEQ`] are rejected on add and absent otherwise.
pub async fn seq_out_of_range<S: Store + ?Sized>(store: &S) {
    check!("seq_out_of_range");
    fill(store, [entry((1, "a", 0))]).await.unwrap();
    let far = id(1, "a", u64::MAX);

    assert!(!store.has(&far).await.unwrap());
    assert!(store.by_id(&far).await.unwrap().is_none());
    assert!(store.remove(&far).await.unwrap().is_none());
    assert!(!store
        .change_meta(&far, MetaDiff::new().field("x", 1))
        .await
        .unwrap());

    let mut removed = Vec::new();
    let criteria = ReasonCriteria::new().id(far.clone());
    store
        .remove_reason(TEST_REASON, &criteria, &mut |_, meta| removed.push(meta.id))
        .await
        .unwrap();
    assert!(removed.is_empty());

    let result = store
        .add(Action::new("a"), NewMeta::with_id(far).reason(TEST_REASON))
        .await;
    assert!(matches!(
        result,
        Err(StoreError::Validation(ValidationError::SeqOutOfRange(u64::MAX)))
    ));

    let (action, meta) = entry((2, "a", ActionId::MAX_SEQ));
    assert!(matches!(
        store.add(action, meta).await.unwrap(),
        InsertResult::Added(_)
    ));
    assert!(store.has(&id(2, "a", ActionId::MAX_SEQ)).await.unwrap());
    assert_eq!(store.get_last_added().await.unwrap(), 2);
}

/// `time` falls back to the id's time.
pub async fn time_defaults_to_id<S: Store + ?Sized>(store: &S) {
    check!("time_defaults_to_id");
    let (action, meta) = entry((42, "a", 0));
    let stored = store.add(action, meta).await.unwrap().into_meta().unwrap();
    assert_eq!(stored.time, 42);
}

pub async fn has_and_remove<S: Store + ?Sized>(store: &S) {
    check!("has_and_remove");
    fill(store, [entry((1, "a", 0)), entry((2, "a", 0))]).await.unwrap();

    assert!(store.has(&id(1, "a", 0)).await.unwrap());
    assert!(!store.has(&id(9, "a", 0)).await.unwrap());

    let (_, removed) = store.remove(&id(1, "a", 0)).await.unwrap().unwrap();
    assert_eq!(removed.added, 1);
    assert!(!store.has(&id(1, "a", 0)).await.unwrap());
    assert!(store.remove(&id(1, "a", 0)).await.unwrap().is_none());
    assert!(store.remove(&id(9, "a", 0)).await.unwrap().is_none());

    assert_eq!(ids(&store.all(Order::Created).await.unwrap()), vec![id(2, "a", 0)]);
    assert_eq!(ids(&store.all(Order::Added).await.unwrap()), vec![id(2, "a", 0)]);
}

/// `change_meta` merges fields and never touches id, time or added.
pub async fn change_meta<S: Store + ?Sized>(store: &S) {
    check!("change_meta");
    fill(
        store,
        [(
            Action::new("a"),
            NewMeta::with_id((1, "a", 0))
                .time(5)
                .reason("a")
                .field("kept", 1)
                .field("replaced", 1),
        )],
    )
    .await
    .unwrap();

    assert!(!store
        .change_meta(&id(9, "a", 0), MetaDiff::new().field("x", 1))
        .await
        .unwrap());

    let diff = MetaDiff::new()
        .field("replaced", 2)
        .field("new", "yes")
        .field("time", 99)
        .field("added", 99)
        .reasons(["b", "c"]);
    assert!(store.change_meta(&id(1, "a", 0), diff).await.unwrap());

    let (_, meta) = store.by_id(&id(1, "a", 0)).await.unwrap().unwrap();
    assert_eq!(meta.id, id(1, "a", 0));
    assert_eq!(meta.time, 5);
    assert_eq!(meta.added, 1);
    assert_eq!(
        meta.reasons.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["b", "c"]
    );
    assert_eq!(meta.extra.get("kept"), Some(&serde_json::json!(1)));
    assert_eq!(meta.extra.get("replaced"), Some(&serde_json::json!(2)));
    assert_eq!(meta.extra.get("new"), Some(&serde_json::json!("yes")));
    assert!(!meta.extra.contains_key("time") && !meta.extra.contains_key("added"));
}

/// Action fields and unknown meta fields come back verbatim.
pub async fn extra_fields_preserved<S: Store + ?Sized>(store: &S) {
    check!("extra_fields_preserved");
    let action = Action::new("rename")
        .with("name", "draft")
        .with("nested", serde_json::json!({ "list": [1, 2, 3], "flag": true }));
    let meta = NewMeta::with_id((1, "a", 0))
        .reason(TEST_REASON)
        .field("user", "alice")
        .field("channel", serde_json::json!({ "id": 7 }));
    store.add(action.clone(), meta).await.unwrap();

    let (stored, meta) = store.by_id(&id(1, "a", 0)).await.unwrap().unwrap();
    assert_eq!(stored, action);
    assert_eq!(meta.extra.get("user"), Some(&serde_json::json!("alice")));
    assert_eq!(
        meta.extra.get("channel"),
        Some(&serde_json::json!({ "id": 7 }))
    );

    let all = store.all(Order::Created).await.unwrap();
    assert_eq!(all[0].0, action);
    assert_eq!(all[0].1, meta);
}

/// Entries whose last reason goes are deleted and reported; others lose
/// the reason but keep everything else.
pub async fn remove_reason<S: Store + ?Sized>(store: &S) {
    check!("remove_reason");
    fill(
        store,
        [
            (Action::new("only-a"), NewMeta::with_id((1, "a", 0)).reason("a")),
            (
                Action::new("a-and-b"),
                NewMeta::with_id((2, "a", 0)).reasons(["a", "b"]).field("x", 1),
            ),
            (Action::new("only-b"), NewMeta::with_id((3, "a", 0)).reason("b")),
        ],
    )
    .await
    .unwrap();

    let mut removed = Vec::new();
    let count = store
        .remove_reason("a", &ReasonCriteria::new(), &mut |action, meta| {
            removed.push((action, meta))
        })
        .await
        .unwrap();

    assert_eq!(count, 1);
    assert_eq!(removed.len(), 1);
    let (action, meta) = &removed[0];
    assert_eq!(action.kind, "only-a");
    assert_eq!(meta.id, id(1, "a", 0));
    assert_eq!(meta.added, 1);
    assert!(meta.reasons.is_empty());

    assert!(!store.has(&id(1, "a", 0)).await.unwrap());
    let (_, kept) = store.by_id(&id(2, "a", 0)).await.unwrap().unwrap();
    assert_eq!(kept.reasons.iter().collect::<Vec<_>>(), vec!["b"]);
    assert_eq!(kept.added, 2);
    assert_eq!(kept.extra.get("x"), Some(&serde_json::json!(1)));
    let (_, untouched) = store.by_id(&id(3, "a", 0)).await.unwrap().unwrap();
    assert_eq!(untouched.reasons.iter().collect::<Vec<_>>(), vec!["b"]);
}

/// Bounds are inclusive and zero is a real bound.
pub async fn remove_reason_bounds<S: Store + ?Sized>(
    store: &S,
    criteria: ReasonCriteria,
    expected: &[u64],
) {
    check!("remove_reason_bounds");
    fill(
        store,
        [entry((1, "a", 0)), entry((2, "a", 0)), entry((3, "a", 0))],
    )
    .await
    .unwrap();

    let mut removed = Vec::new();
    store
        .remove_reason(TEST_REASON, &criteria, &mut |_, meta| removed.push(meta.added))
        .await
        .unwrap();
    assert_eq!(removed, expected, "criteria {criteria:?}");

    let left = added(&store.all(Order::Added).await.unwrap());
    let survivors: Vec<u64> = [3, 2, 1]
        .into_iter()
        .filter(|added| !expected.contains(added))
        .collect();
    assert_eq!(left, survivors, "criteria {criteria:?}");
}

pub async fn remove_reason_by_id<S: Store + ?Sized>(store: &S) {
    check!("remove_reason_by_id");
    fill(store, [entry((1, "a", 0)), entry((2, "a", 0))]).await.unwrap();

    let mut removed = Vec::new();
    let criteria = ReasonCriteria::new().id((2, "a", 0));
    store
        .remove_reason(TEST_REASON, &criteria, &mut |_, meta| removed.push(meta.id))
        .await
        .unwrap();
    assert_eq!(removed, vec![id(2, "a", 0)]);
    assert!(store.has(&id(1, "a", 0)).await.unwrap());
}

/// Overlapping adds get distinct, gapless `added` values, and the counter
/// can be read while they run.
pub async fn concurrent_adds<S: Store + ?Sized>(store: &S) {
    check!("concurrent_adds");
    const N: u64 = 32;

    let adds = join_all((0..N).map(move |i| {
        let (action, meta) = entry((i as i64, "a", 0));
        store.add(action, meta)
    }));
    let reads = join_all((0..N).map(move |_| store.get_last_added()));
    let (results, counters) = join(adds, reads).await;

    let mut assigned: Vec<u64> = results
        .into_iter()
        .map(|result| result.unwrap().into_meta().unwrap().added)
        .collect();
    assigned.sort_unstable();
    assert_eq!(assigned, (1..=N).collect::<Vec<_>>());
    for counter in counters {
        assert!(counter.unwrap() <= N);
    }

    assert_eq!(store.get_last_added().await.unwrap(), N);
    let listed = added(&store.all(Order::Added).await.unwrap());
    assert_eq!(listed, (1..=N).rev().collect::<Vec<_>>());
}

/// Removed entries are reported in ascending `added` order.
pub async fn remove_reason_callback_order<S: Store + ?Sized>(store: &S) {
    check!("remove_reason_callback_order");
    // Created order differs from added order here.
    fill(
        store,
        [
            entry((9, "a", 0)),
            entry((1, "a", 0)),
            entry((5, "a", 0)),
            entry((3, "a", 0)),
        ],
    )
    .await
    .unwrap();

    let mut removed = Vec::new();
    store
        .remove_reason(TEST_REASON, &ReasonCriteria::new(), &mut |_, meta| {
            removed.push(meta.added)
        })
        .await
        .unwrap();
    assert_eq!(removed, vec![1, 2, 3, 4]);
    assert!(store.all(Order::Created).await.unwrap().is_empty());
}

/// `added` is never reused, even after the newest entry is removed.
pub async fn last_added_survives_removal<S: Store + ?Sized>(store: &S) {
    check!("last_added_survives_removal");
    fill(
        store,
        [entry((1, "a", 0)), entry((2, "a", 0)), entry((3, "a", 0))],
    )
    .await
    .unwrap();
    store.remove(&id(3, "a", 0)).await.unwrap();
    store
        .remove_reason(TEST_REASON, &ReasonCriteria::new().id((2, "a", 0)), &mut |_, _| {})
        .await
        .unwrap();
    assert_eq!(store.get_last_added().await.unwrap(), 3);

    let (action, meta) = entry((4, "a", 0));
    let stored = store.add(action, meta).await.unwrap().into_meta().unwrap();
    assert_eq!(stored.added, 4);

    // Re-adding a removed id is a new insertion.
    let (action, meta) = entry((3, "a", 0));
    let stored = store.add(action, meta).await.unwrap().into_meta().unwrap();
    assert_eq!(stored.added, 5);
}

/// `set_last_synced` only overwrites the fields it is given.
pub async fn sync_cursor_merge<S: Store + ?Sized>(store: &S) {
    check!("sync_cursor_merge");
    assert_eq!(store.get_last_synced().await.unwrap(), SyncCursor::default());

    store.set_last_synced(SyncCursorUpdate::sent(1)).await.unwrap();
    assert_eq!(
        store.get_last_synced().await.unwrap(),
        SyncCursor { sent: 1, received: 0 }
    );

    store.set_last_synced(SyncCursorUpdate::both(2, 1)).await.unwrap();
    assert_eq!(
        store.get_last_synced().await.unwrap(),
        SyncCursor { sent: 2, received: 1 }
    );

    store.set_last_synced(SyncCursorUpdate::received(5)).await.unwrap();
    assert_eq!(
        store.get_last_synced().await.unwrap(),
        SyncCursor { sent: 2, received: 5 }
    );

    store.set_last_synced(SyncCursorUpdate::default()).await.unwrap();
    assert_eq!(
        store.get_last_synced().await.unwrap(),
        SyncCursor { sent: 2, received: 5 }
    );
}

/// Draining pages yields every entry once, sorted, in both orders.
pub async fn pagination_covers_every_entry<S: Store + ?Sized>(store: &S) {
    check!("pagination_covers_every_entry");
    let origins = ["a", "b", "c"];
    let entries = (0..250u64).map(|n| {
        let origin = origins[(n % 3) as usize];
        let (action, meta) = entry(((n % 7) as i64, origin, n));
        (action, meta.time((n % 5) as i64))
    });
    fill(store, entries).await.unwrap();

    let created = store.all(Order::Created).await.unwrap();
    assert_eq!(created.len(), 250);
    for pair in created.windows(2) {
        assert_eq!(
            compare_created(&pair[0].1, &pair[1].1),
            std::cmp::Ordering::Less,
            "{} must precede {}",
            pair[0].1.id,
            pair[1].1.id
        );
    }

    let by_added = store.all(Order::Added).await.unwrap();
    assert_eq!(added(&by_added), (1..=250).rev().collect::<Vec<_>>());
}

/// Following `next` after a mutation never duplicates an entry.
pub async fn pagination_survives_mutation<S: Store + ?Sized>(store: &S) {
    check!("pagination_survives_mutation");
    let entries = (0..250u64).map(|n| entry((n as i64, "a", 0)));
    fill(store, entries).await.unwrap();

    for order in [Order::Created, Order::Added] {
        let first = store.get(GetOptions::new(order)).await.unwrap();
        let Some(next) = first.next.clone() else {
            // Single-page backends have nothing to resume.
            continue;
        };

        // Newest entry goes to the head; one unseen entry disappears.
        let (action, meta) = entry((1_000 + order_index(order), "z", 0));
        store.add(action, meta).await.unwrap();
        let (_, last) = first.entries.last().unwrap();
        let unseen = match order {
            Order::Created => id(last.id.time - 1, "a", 0),
            Order::Added => store
                .all(Order::Added)
                .await
                .unwrap()
                .into_iter()
                .find(|(_, meta)| meta.added < last.added)
                .map(|(_, meta)| meta.id)
                .unwrap(),
        };
        store.remove(&unseen).await.unwrap();

        let mut seen = ids(&first.entries);
        let mut options = Some(next);
        while let Some(current) = options {
            let page = store.get(current).await.unwrap();
            seen.extend(ids(&page.entries));
            options = page.next;
        }

        let mut unique = seen.clone();
        unique.sort_by(|a, b| (a.time, &a.origin, a.seq).cmp(&(b.time, &b.origin, b.seq)));
        unique.dedup();
        assert_eq!(unique.len(), seen.len(), "duplicate entry in {order:?} pages");
        assert!(!seen.contains(&unseen));
    }
}

fn order_index(order: Order) -> i64 {
    match order {
        Order::Created => 0,
        Order::Added => 1,
    }
}
