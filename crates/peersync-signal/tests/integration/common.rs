//! Shared helpers for signaling integration tests

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use peersync_core::domain::{DriveStructure, FolderId, ReplicationIdentifier, SessionId};
use peersync_core::memory::MemoryObjectStore;
use peersync_core::ports::object_store::IObjectStore;

/// Enables log output for debugging; safe to call from every test
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builds the fixed layout on a fresh in-memory store
pub async fn seed_structure(store: &MemoryObjectStore) -> DriveStructure {
    let root = store.ensure_folder(&FolderId::root(), "sync").await.unwrap();
    let docs = store.ensure_folder(&root, "docs").await.unwrap();
    let signaling = store.ensure_folder(&root, "signaling").await.unwrap();
    let transaction = store.create_empty_file(&root, "transaction").await.unwrap();
    let blocker = store.create_empty_file(&root, "blocker").await.unwrap();
    let wal = store.create_empty_file(&root, "wal").await.unwrap();

    DriveStructure {
        replication_identifier: ReplicationIdentifier::derive("/sync", "id"),
        root_folder_id: root,
        docs_folder_id: docs,
        signaling_folder_id: signaling,
        transaction_file_id: transaction.id,
        blocker_file_id: blocker.id,
        wal_file_id: wal.id,
    }
}

/// A fresh shared store plus its layout
pub async fn setup() -> (Arc<MemoryObjectStore>, DriveStructure) {
    let store = Arc::new(MemoryObjectStore::new());
    let structure = seed_structure(&store).await;
    (store, structure)
}

/// Deterministic session IDs so the initiator tiebreak is predictable
pub fn session(token: &str) -> SessionId {
    SessionId::new(token)
}

/// Polls a condition until it holds or the deadline passes
pub async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
