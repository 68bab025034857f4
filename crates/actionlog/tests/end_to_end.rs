//! Replication between two replicas over local connections.

use std::time::Duration;

use actionlog::{
    local_pair, verify_convergence, Action, ActionId, Error, Log, MemoryStore, NewMeta,
    NodeOptions, NodeState, Order, Replica, SqliteStore, Store, StoreExt, SyncCursor,
};
use actionlog_sync::SyncError;

const WAIT: Duration = Duration::from_secs(5);

async fn add(replica: &Replica<impl Store + 'static>, kind: &str) -> ActionId {
    let result = replica
        .add(Action::new(kind), NewMeta::new().reason("test"))
        .await
        .unwrap();
    result.into_meta().unwrap().id
}

async fn wait_converged<A: Store + 'static, B: Store + 'static>(a: &Replica<A>, b: &Replica<B>) {
    tokio::time::timeout(WAIT, async {
        while !verify_convergence(a.store(), b.store())
            .await
            .unwrap()
            .is_converged()
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("replicas did not converge");
}

async fn wait_len(replica: &Replica<impl Store + 'static>, len: usize) {
    tokio::time::timeout(WAIT, async {
        while replica.store().all(Order::Added).await.unwrap().len() < len {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("entries did not arrive");
}

#[tokio::test]
async fn replicas_exchange_backlog_and_live_entries() {
    actionlog_testkit::init_tracing();
    let client = Replica::with_node_id(MemoryStore::new(), "client");
    let server = Replica::with_node_id(MemoryStore::new(), "server");

    for _ in 0..3 {
        add(&client, "client:early").await;
    }
    for _ in 0..2 {
        add(&server, "server:early").await;
    }

    let (a, b) = local_pair();
    let mut passive = server.accept(b, NodeOptions::default()).unwrap();
    let mut active = client.connect(a, NodeOptions::default()).unwrap();
    active.wait_for(NodeState::Synchronized).await.unwrap();
    passive.wait_for(NodeState::Synchronized).await.unwrap();

    wait_converged(&client, &server).await;
    assert_eq!(client.digest().await.unwrap().entries, 5);

    let live = add(&server, "server:live").await;
    add(&client, "client:live").await;
    wait_converged(&client, &server).await;
    assert!(client.store().has(&live).await.unwrap());
    assert_eq!(server.digest().await.unwrap().entries, 7);
}

#[tokio::test]
async fn cursors_follow_acknowledged_entries() {
    let client = Replica::with_node_id(MemoryStore::new(), "client");
    let server = Replica::with_node_id(MemoryStore::new(), "server");
    add(&client, "a").await;
    add(&client, "b").await;
    add(&server, "c").await;

    let (a, b) = local_pair();
    let _passive = server.accept(b, NodeOptions::default()).unwrap();
    let _active = client.connect(a, NodeOptions::default()).unwrap();
    wait_converged(&client, &server).await;

    tokio::time::timeout(WAIT, async {
        loop {
            let cursor = client.store().get_last_synced().await.unwrap();
            // Client sent its entries 1 and 2 and received the server's entry 1.
            if cursor == (SyncCursor { sent: 2, received: 1 }) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("cursor did not advance");
}

#[tokio::test]
async fn dropped_active_node_destroys_passive_node() {
    let client = Replica::new(MemoryStore::new());
    let server = Replica::new(MemoryStore::new());

    let (a, b) = local_pair();
    let passive = server.accept(b, NodeOptions::default()).unwrap();
    let mut active = client.connect(a, NodeOptions::default()).unwrap();
    active.wait_for(NodeState::Synchronized).await.unwrap();

    active.abort();
    assert!(matches!(active.join().await, Err(Error::Join(_))));

    tokio::time::timeout(WAIT, passive.join())
        .await
        .expect("passive node kept running")
        .unwrap();
}

#[tokio::test]
async fn reconnect_resumes_from_cursor() {
    let client = Replica::with_node_id(MemoryStore::new(), "client");
    let server = Replica::with_node_id(MemoryStore::new(), "server");
    add(&client, "first").await;

    let (a, b) = local_pair();
    let _passive = server.accept(b, NodeOptions::default()).unwrap();
    let active = client.connect(a, NodeOptions::default()).unwrap();
    wait_converged(&client, &server).await;
    active.abort();

    add(&client, "offline").await;
    add(&server, "offline").await;

    let (a, b) = local_pair();
    let _passive = server.accept(b, NodeOptions::default()).unwrap();
    let _active = client.connect(a, NodeOptions::default()).unwrap();
    wait_converged(&client, &server).await;
    assert_eq!(server.digest().await.unwrap().entries, 3);
}

#[tokio::test]
async fn filters_keep_entries_local() {
    let client = Replica::with_node_id(MemoryStore::new(), "client");
    let server = Replica::with_node_id(MemoryStore::new(), "server");
    let private = add(&server, "private").await;
    let public = add(&server, "public").await;

    let (a, b) = local_pair();
    let options = NodeOptions::default().with_out_filter(|action, _| action.kind != "private");
    let _passive = server.accept(b, options).unwrap();
    let _active = client.connect(a, NodeOptions::default()).unwrap();

    wait_len(&client, 1).await;
    assert!(client.store().has(&public).await.unwrap());
    assert!(!client.store().has(&private).await.unwrap());
}

#[tokio::test]
async fn fix_time_translates_between_clocks() {
    let client = Replica::from_log(
        Log::with_node_id(MemoryStore::new(), "client").with_clock(|| 1_000_000),
    );
    let server = Replica::from_log(
        Log::with_node_id(MemoryStore::new(), "server").with_clock(|| 1_010_000),
    );
    let from_server = add(&server, "server").await;

    let (a, b) = local_pair();
    let _passive = server.accept(b, NodeOptions::default()).unwrap();
    let _active = client
        .connect(a, NodeOptions::default().with_fix_time(true))
        .unwrap();
    wait_len(&client, 1).await;

    let (_, meta) = client.store().by_id(&from_server).await.unwrap().unwrap();
    assert_eq!(meta.time, 1_000_000);

    let from_client = add(&client, "client").await;
    wait_len(&server, 2).await;
    let (_, meta) = server.store().by_id(&from_client).await.unwrap().unwrap();
    assert_eq!(meta.time, 1_010_000);
}

#[tokio::test]
async fn sqlite_replica_keeps_synced_entries_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("client.db");

    let server = Replica::with_node_id(MemoryStore::new(), "server");
    add(&server, "a").await;
    add(&server, "b").await;

    {
        let client = Replica::with_node_id(SqliteStore::open(&path).unwrap(), "client");
        let (a, b) = local_pair();
        let _passive = server.accept(b, NodeOptions::default()).unwrap();
        let active = client.connect(a, NodeOptions::default()).unwrap();
        wait_converged(&client, &server).await;
        tokio::time::timeout(WAIT, async {
            while client.store().get_last_synced().await.unwrap().received < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("cursor did not advance");
        active.abort();
        let _ = active.join().await;
    }

    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(store.all(Order::Created).await.unwrap().len(), 2);
    assert_eq!(store.get_last_synced().await.unwrap().received, 2);
}

#[tokio::test]
async fn passive_rejects_fix_time() {
    let server = Replica::new(MemoryStore::new());
    let (_, b) = local_pair();
    let err = server
        .accept(b, NodeOptions::default().with_fix_time(true))
        .unwrap_err();
    assert!(matches!(err, Error::Sync(SyncError::InvalidOptions(_))));
}
