//! Shared helpers for replication integration tests

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use peersync_core::domain::document::{doc_file_name, DocumentState};
use peersync_core::domain::{DriveStructure, FolderId, ReplicationIdentifier, SessionId, WriteRow};
use peersync_core::memory::MemoryObjectStore;
use peersync_core::ports::object_store::IObjectStore;
use peersync_replication::{DownstreamHandler, Transaction, UpstreamHandler};

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

/// A transaction for one named peer with the given lease timeout
pub fn transaction_for(
    store: &Arc<MemoryObjectStore>,
    structure: &DriveStructure,
    session: &str,
    timeout: Duration,
) -> Transaction {
    Transaction::new(
        store.clone(),
        structure.clone(),
        SessionId::new(session),
        timeout,
    )
}

/// An upstream handler keyed on `id` with the default concurrency
pub fn upstream_for(
    store: &Arc<MemoryObjectStore>,
    structure: &DriveStructure,
) -> UpstreamHandler {
    UpstreamHandler::new(store.clone(), structure.clone(), "id", 5)
}

/// A downstream handler with the default concurrency
pub fn downstream_for(
    store: &Arc<MemoryObjectStore>,
    structure: &DriveStructure,
) -> DownstreamHandler {
    DownstreamHandler::new(store.clone(), structure.clone(), 5)
}

/// A document payload with the test primary key `id`
pub fn doc(id: &str, age: i64) -> DocumentState {
    DocumentState::from_value(json!({"id": id, "age": age})).unwrap()
}

/// A tombstone payload
pub fn deleted_doc(id: &str) -> DocumentState {
    DocumentState::from_value(json!({"id": id, "_deleted": true})).unwrap()
}

/// Writes a document file directly, bypassing the write path
pub async fn insert_document_file(
    store: &MemoryObjectStore,
    structure: &DriveStructure,
    state: &DocumentState,
) {
    let id = state.primary_key("id").expect("test doc has id");
    store
        .upload_multipart(
            &structure.docs_folder_id,
            &doc_file_name(id),
            &state.to_file_value(),
        )
        .await
        .unwrap();
}

/// Reads a document file's content back, if present
pub async fn read_document_file(
    store: &MemoryObjectStore,
    structure: &DriveStructure,
    id: &str,
) -> Option<Value> {
    let meta = store
        .find_by_name(&structure.docs_folder_id, &doc_file_name(id))
        .await?;
    store.download_json(&meta.id).await.ok()
}

/// An insert row (no assumed master state)
pub fn insert_row(state: DocumentState) -> WriteRow {
    WriteRow::insert(state)
}

/// An update row carrying the writer's view of the master
pub fn update_row(state: DocumentState, assumed: DocumentState) -> WriteRow {
    WriteRow::update(state, assumed)
}

/// Polls a condition until it holds or the deadline passes
pub async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
