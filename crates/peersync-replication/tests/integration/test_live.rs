//! Live two-peer convergence tests
//!
//! Two full replication stacks share one in-memory store and one
//! in-memory mesh. Each test peer applies its pulled batches into a local
//! map, standing in for the host database.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use peersync_core::config::{DriveOptions, SyncOptions};
use peersync_core::domain::DocumentState;
use peersync_core::memory::{InMemoryMeshHub, MemoryObjectStore};
use peersync_replication::DriveReplication;

use crate::common;

/// A test peer: the replication plus its local collection
struct TestPeer {
    replication: Arc<DriveReplication>,
    collection: Arc<Mutex<HashMap<String, DocumentState>>>,
}

impl TestPeer {
    async fn start(store: Arc<MemoryObjectStore>, hub: &InMemoryMeshHub) -> Self {
        let mut options = SyncOptions::new(
            "id",
            DriveOptions::new("client-id", "token", "/apps/live-test"),
        );
        // Lease timeouts in the hundreds of milliseconds keep contention
        // waits test-sized
        options.drive.transaction_timeout = Duration::from_millis(400);
        options.pull_batch_size = 10;

        let replication = DriveReplication::start(options, store, Some(hub.connector()))
            .await
            .unwrap();

        let collection = Arc::new(Mutex::new(HashMap::new()));
        let mut batches = replication.pulled_batches();
        let apply_into = collection.clone();
        tokio::spawn(async move {
            while let Ok(batch) = batches.recv().await {
                let mut collection = apply_into.lock().await;
                for doc in batch.documents {
                    let Some(id) = doc.primary_key("id").map(str::to_string) else {
                        continue;
                    };
                    if doc.is_deleted() {
                        collection.remove(&id);
                    } else {
                        collection.insert(id, doc);
                    }
                }
            }
        });

        Self {
            replication,
            collection,
        }
    }

    async fn has(&self, id: &str) -> bool {
        self.collection.lock().await.contains_key(id)
    }

    async fn len(&self) -> usize {
        self.collection.lock().await.len()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_live_peers_converge() {
    common::init_tracing();
    let store = Arc::new(MemoryObjectStore::new());
    let hub = InMemoryMeshHub::new();

    let peer_a = TestPeer::start(store.clone(), &hub).await;
    let peer_b = TestPeer::start(store.clone(), &hub).await;

    // Each peer seeds one document
    peer_a
        .replication
        .push(vec![common::insert_row(common::doc("doc-a", 1))])
        .await
        .unwrap();
    peer_b
        .replication
        .push(vec![common::insert_row(common::doc("doc-b", 1))])
        .await
        .unwrap();

    common::wait_until("both peers see both documents", || async {
        peer_a.has("doc-a").await
            && peer_a.has("doc-b").await
            && peer_b.has("doc-a").await
            && peer_b.has("doc-b").await
    })
    .await;

    // An insert on A reaches B through the RESYNC ping
    peer_a
        .replication
        .push(vec![common::insert_row(common::doc("doc-a2", 1))])
        .await
        .unwrap();
    common::wait_until("insert propagates to B", || async {
        peer_b.has("doc-a2").await
    })
    .await;

    // A deletion on B reaches A as a tombstone
    peer_b
        .replication
        .push(vec![common::update_row(
            common::deleted_doc("doc-a2"),
            common::doc("doc-a2", 1),
        )])
        .await
        .unwrap();
    common::wait_until("deletion propagates to A", || async {
        !peer_a.has("doc-a2").await
    })
    .await;

    peer_a.replication.cancel().await;
    peer_b.replication.cancel().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bulk_and_simultaneous_inserts_converge() {
    let store = Arc::new(MemoryObjectStore::new());
    let hub = InMemoryMeshHub::new();

    let peer_a = TestPeer::start(store.clone(), &hub).await;
    let peer_b = TestPeer::start(store.clone(), &hub).await;
    peer_a.replication.await_initial_replication().await;
    peer_b.replication.await_initial_replication().await;

    // Bulk insert on A converges on B
    let bulk = (0..10)
        .map(|i| common::insert_row(common::doc(&format!("bulk-{i}"), i)))
        .collect();
    peer_a.replication.push(bulk).await.unwrap();
    common::wait_until("bulk insert converges on B", || async {
        peer_b.len().await >= 10
    })
    .await;

    // Simultaneous inserts on both sides converge to the union
    let (from_a, from_b) = tokio::join!(
        peer_a
            .replication
            .push(vec![common::insert_row(common::doc("simul-a", 1))]),
        peer_b
            .replication
            .push(vec![common::insert_row(common::doc("simul-b", 1))]),
    );
    from_a.unwrap();
    from_b.unwrap();

    common::wait_until("both peers hold the union", || async {
        peer_a.has("simul-a").await
            && peer_a.has("simul-b").await
            && peer_b.has("simul-a").await
            && peer_b.has("simul-b").await
    })
    .await;

    peer_a.replication.cancel().await;
    peer_b.replication.cancel().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_notify_peers_triggers_remote_pull() {
    let store = Arc::new(MemoryObjectStore::new());
    let hub = InMemoryMeshHub::new();

    let peer_a = TestPeer::start(store.clone(), &hub).await;
    let peer_b = TestPeer::start(store.clone(), &hub).await;
    peer_a.replication.await_initial_replication().await;
    peer_b.replication.await_initial_replication().await;

    // Wait for the mesh before writing behind the replication's back
    common::wait_until("mesh formed", || async {
        peer_a.replication.connected_peers().await >= 1
            && peer_b.replication.connected_peers().await >= 1
    })
    .await;

    // A document written directly to the store is invisible until a pull;
    // a manual notify makes the remote peer fetch it
    let structure = peer_a.replication.structure().clone();
    common::insert_document_file(&store, &structure, &common::doc("manual-doc", 1)).await;
    peer_a.replication.notify_peers().await;

    common::wait_until("remote peer pulled the manual write", || async {
        peer_b.has("manual-doc").await
    })
    .await;

    peer_a.replication.cancel().await;
    peer_b.replication.cancel().await;
}
