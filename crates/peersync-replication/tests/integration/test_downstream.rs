//! Downstream pagination tests: checkpoints, tie clusters, termination

use std::collections::HashSet;

use chrono::{TimeZone, Utc};

use peersync_core::domain::document::doc_file_name;
use peersync_core::ports::object_store::IObjectStore;

use crate::common;

#[tokio::test]
async fn test_pagination_covers_all_documents() {
    let (store, structure) = common::setup().await;
    let downstream = common::downstream_for(&store, &structure);

    for i in 0..10 {
        common::insert_document_file(&store, &structure, &common::doc(&format!("doc-{i}"), i)).await;
    }

    let mut seen = HashSet::new();
    let mut checkpoint = None;
    let mut pages = 0;
    loop {
        let result = downstream
            .fetch_changes(checkpoint.as_ref(), 3)
            .await
            .unwrap();
        if result.documents.is_empty() {
            break;
        }
        pages += 1;
        assert!(pages <= 4, "10 documents must fit in at most 4 pages of 3");
        for doc in &result.documents {
            seen.insert(doc.primary_key("id").unwrap().to_string());
        }
        checkpoint = result.checkpoint;
    }
    assert_eq!(seen.len(), 10);

    // Drained: the next call returns nothing and keeps the checkpoint
    let drained = downstream
        .fetch_changes(checkpoint.as_ref(), 3)
        .await
        .unwrap();
    assert!(drained.documents.is_empty());
    assert_eq!(drained.checkpoint, checkpoint);

    // A new document shows up as exactly one change
    common::insert_document_file(&store, &structure, &common::doc("doc-after", 99)).await;
    let result = downstream
        .fetch_changes(checkpoint.as_ref(), 3)
        .await
        .unwrap();
    assert_eq!(result.documents.len(), 1);
    assert_eq!(result.documents[0].primary_key("id"), Some("doc-after"));
    let checkpoint = result.checkpoint;

    // An update to an old document shows up as exactly one change
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let meta = store
        .find_by_name(&structure.docs_folder_id, &doc_file_name("doc-0"))
        .await
        .unwrap();
    store
        .patch_media(&meta.id, &common::doc("doc-0", 100).to_file_value())
        .await
        .unwrap();

    let result = downstream
        .fetch_changes(checkpoint.as_ref(), 3)
        .await
        .unwrap();
    assert_eq!(result.documents.len(), 1);
    assert_eq!(result.documents[0].primary_key("id"), Some("doc-0"));
}

#[tokio::test]
async fn test_tie_cluster_spanning_pages() {
    let (store, structure) = common::setup().await;
    let downstream = common::downstream_for(&store, &structure);

    // Five documents sharing one modified-time, as concurrent writers
    // produce within a single clock millisecond
    let tie = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
    for i in 0..5 {
        let state = common::doc(&format!("doc-{i}"), i);
        common::insert_document_file(&store, &structure, &state).await;
        let meta = store
            .find_by_name(&structure.docs_folder_id, &doc_file_name(&format!("doc-{i}")))
            .await
            .unwrap();
        store.set_modified_time(&meta.id, tie).await;
    }

    let mut seen = Vec::new();
    let mut checkpoint = None;
    loop {
        let result = downstream
            .fetch_changes(checkpoint.as_ref(), 2)
            .await
            .unwrap();
        if result.documents.is_empty() {
            break;
        }
        for doc in &result.documents {
            seen.push(doc.primary_key("id").unwrap().to_string());
        }
        checkpoint = result.checkpoint;
    }

    // Every document delivered exactly once despite the shared timestamp
    let distinct: HashSet<_> = seen.iter().cloned().collect();
    assert_eq!(seen.len(), 5, "no duplicates across tie pages: {seen:?}");
    assert_eq!(distinct.len(), 5);

    // The checkpoint accumulated the whole cluster
    let checkpoint = checkpoint.unwrap();
    assert_eq!(checkpoint.modified_time, tie);
    assert_eq!(checkpoint.doc_ids_with_same_modified_time.len(), 5);
}

#[tokio::test]
async fn test_checkpoint_is_monotonic() {
    let (store, structure) = common::setup().await;
    let downstream = common::downstream_for(&store, &structure);

    for i in 0..6 {
        common::insert_document_file(&store, &structure, &common::doc(&format!("doc-{i}"), i)).await;
        tokio::time::sleep(std::time::Duration::from_millis(3)).await;
    }

    let mut previous = None;
    let mut checkpoint = None;
    loop {
        let result = downstream
            .fetch_changes(checkpoint.as_ref(), 2)
            .await
            .unwrap();
        if result.documents.is_empty() {
            break;
        }
        let next = result.checkpoint.clone().unwrap();
        if let Some(previous) = &previous {
            assert!(
                next.modified_time >= *previous,
                "checkpoint moved backwards"
            );
        }
        previous = Some(next.modified_time);
        checkpoint = result.checkpoint;
    }
}

#[tokio::test]
async fn test_round_trip_returns_all_inserted_documents() {
    let (store, structure) = common::setup().await;
    let downstream = common::downstream_for(&store, &structure);

    let ids: HashSet<String> = (0..7).map(|i| format!("doc-{i}")).collect();
    for id in &ids {
        common::insert_document_file(&store, &structure, &common::doc(id, 1)).await;
    }

    let result = downstream.fetch_changes(None, 100).await.unwrap();
    let fetched: HashSet<String> = result
        .documents
        .iter()
        .map(|d| d.primary_key("id").unwrap().to_string())
        .collect();
    assert!(fetched.is_superset(&ids));
}

#[tokio::test]
async fn test_tombstones_flow_downstream() {
    let (store, structure) = common::setup().await;
    let downstream = common::downstream_for(&store, &structure);

    common::insert_document_file(&store, &structure, &common::doc("doc-0", 1)).await;
    let result = downstream.fetch_changes(None, 10).await.unwrap();
    assert_eq!(result.documents.len(), 1);

    // Tombstoned documents still flow (deletion replicates as a payload)
    common::insert_document_file(&store, &structure, &common::deleted_doc("doc-1")).await;
    let result = downstream.fetch_changes(None, 10).await.unwrap();
    let deleted = result
        .documents
        .iter()
        .find(|d| d.primary_key("id") == Some("doc-1"))
        .unwrap();
    assert!(deleted.is_deleted());
}
