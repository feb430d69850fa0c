//! Transaction protocol tests: handoff, takeover, crash recovery

use std::time::{Duration, Instant};

use serde_json::Value;

use peersync_core::domain::{ReplicationError, WalContents};
use peersync_core::ports::object_store::IObjectStore;
use peersync_replication::TryLockOutcome;

use crate::common;

const LONG: Duration = Duration::from_secs(60);

#[tokio::test]
async fn test_lock_handoff_between_peers() {
    let (store, structure) = common::setup().await;
    let peer_a = common::transaction_for(&store, &structure, "peer-aaaaaaa", LONG);
    let peer_b = common::transaction_for(&store, &structure, "peer-bbbbbbb", LONG);

    // A acquires
    let handle_a = match peer_a.try_acquire().await.unwrap() {
        TryLockOutcome::Acquired(handle) => handle,
        TryLockOutcome::Blocked { .. } => panic!("fresh lock should be free"),
    };

    // B is blocked while A holds the lease
    assert!(matches!(
        peer_b.try_acquire().await.unwrap(),
        TryLockOutcome::Blocked { .. }
    ));

    // A releases, B acquires
    peer_a.commit(handle_a).await.unwrap();
    assert!(matches!(
        peer_b.try_acquire().await.unwrap(),
        TryLockOutcome::Acquired(_)
    ));
}

#[tokio::test]
async fn test_expired_lease_takeover() {
    let (store, structure) = common::setup().await;
    let timeout = Duration::from_millis(100);
    let peer_a = common::transaction_for(&store, &structure, "peer-aaaaaaa", timeout);
    let peer_b = common::transaction_for(&store, &structure, "peer-bbbbbbb", timeout);

    // A acquires and dies without committing
    let stale_handle = match peer_a.try_acquire().await.unwrap() {
        TryLockOutcome::Acquired(handle) => handle,
        TryLockOutcome::Blocked { .. } => panic!("fresh lock should be free"),
    };

    // B's blocking acquire waits out the lease and takes over
    let started = Instant::now();
    let handle_b = peer_b.acquire().await.unwrap();
    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(90),
        "takeover should wait out the lease, took {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_secs(2),
        "takeover should happen promptly after expiry, took {elapsed:?}"
    );

    // The original holder's commit is a silent no-op
    peer_a.commit(stale_handle).await.unwrap();

    // B still holds the lock: A cannot acquire until B commits
    assert!(matches!(
        peer_a.try_acquire().await.unwrap(),
        TryLockOutcome::Blocked { .. }
    ));
    peer_b.commit(handle_b).await.unwrap();
    assert!(matches!(
        peer_a.try_acquire().await.unwrap(),
        TryLockOutcome::Acquired(_)
    ));
}

#[tokio::test]
async fn test_at_most_one_holder_under_contention() {
    let (store, structure) = common::setup().await;

    let mut handles = Vec::new();
    for i in 0..5 {
        let tx = common::transaction_for(&store, &structure, &format!("peer-{i:07}"), LONG);
        handles.push(tokio::spawn(async move { tx.try_acquire().await.unwrap() }));
    }

    let mut acquired = 0;
    for handle in handles {
        if matches!(handle.await.unwrap(), TryLockOutcome::Acquired(_)) {
            acquired += 1;
        }
    }
    assert_eq!(acquired, 1, "exactly one contender may win the etag race");
}

#[tokio::test]
async fn test_run_drains_wal_left_by_dead_holder() {
    let (store, structure) = common::setup().await;
    let tx = common::transaction_for(&store, &structure, "peer-aaaaaaa", LONG);
    let upstream = common::upstream_for(&store, &structure);

    // A crashed holder staged two rows and never applied them
    let leftover = WalContents::staged(vec![
        common::insert_row(common::doc("doc-0", 1)),
        common::insert_row(common::doc("doc-1", 2)),
    ]);
    store
        .patch_media(
            &structure.wal_file_id,
            &serde_json::to_value(&leftover).unwrap(),
        )
        .await
        .unwrap();

    // The next transaction replays the WAL before its own body runs
    let docs_before_body = tx
        .run(&upstream, || async {
            Ok::<_, ReplicationError>(store.live_file_count(&structure.docs_folder_id).await)
        })
        .await
        .unwrap();
    assert_eq!(docs_before_body, 2, "WAL must drain before the body");

    // And the WAL is empty afterwards
    let wal_value = store.download_json(&structure.wal_file_id).await.unwrap();
    assert!(WalContents::from_file_value(wal_value).unwrap().is_empty());
}

#[tokio::test]
async fn test_run_commits_even_when_body_fails() {
    let (store, structure) = common::setup().await;
    let tx = common::transaction_for(&store, &structure, "peer-aaaaaaa", LONG);
    let upstream = common::upstream_for(&store, &structure);

    let err = tx
        .run(&upstream, || async {
            Err::<(), _>(ReplicationError::Fetch {
                status: 500,
                body: "boom".to_string(),
            })
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ReplicationError::Fetch { status: 500, .. }));

    // The lock was released despite the body error
    assert!(matches!(
        tx.try_acquire().await.unwrap(),
        TryLockOutcome::Acquired(_)
    ));
}

#[tokio::test]
async fn test_commit_blanks_the_transaction_file() {
    let (store, structure) = common::setup().await;
    let tx = common::transaction_for(&store, &structure, "peer-aaaaaaa", LONG);

    let handle = match tx.try_acquire().await.unwrap() {
        TryLockOutcome::Acquired(handle) => handle,
        TryLockOutcome::Blocked { .. } => panic!("fresh lock should be free"),
    };

    // The lease body names the holder while held
    let lease = store
        .download_json(&structure.transaction_file_id)
        .await
        .unwrap();
    assert_eq!(lease["holder"], "peer-aaaaaaa");

    tx.commit(handle).await.unwrap();
    let blanked = store
        .download_json(&structure.transaction_file_id)
        .await
        .unwrap();
    assert_eq!(blanked, Value::Null);
}
