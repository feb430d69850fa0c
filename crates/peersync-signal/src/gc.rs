//! Garbage collection of stale signal files
//!
//! The signaling folder is append-only during normal operation; without
//! cleanup it grows forever. Files older than the configured maximum age
//! carry no live handshake state (their senders' sessions are long gone)
//! and are deleted in bulk. Runs once at startup and then periodically.

use chrono::Utc;
use tracing::{debug, warn};

use peersync_core::domain::{FileId, ReplicationError};
use peersync_core::ports::object_store::{ListOrder, ListQuery};

use crate::Shared;

/// Deletes signal files older than the configured maximum age
///
/// Returns the number of deleted files.
pub(crate) async fn cleanup_old_signaling_messages(
    shared: &Shared,
) -> Result<usize, ReplicationError> {
    let max_age = chrono::Duration::from_std(shared.options.max_message_age)
        .unwrap_or_else(|_| chrono::Duration::hours(24));
    let cutoff = Utc::now() - max_age;

    let listed = shared
        .store
        .list_folder(
            &shared.structure.signaling_folder_id,
            &ListQuery::any(),
            ListOrder::Unspecified,
            None,
        )
        .await?;

    let stale: Vec<FileId> = listed
        .into_iter()
        .filter(|meta| meta.created_time < cutoff)
        .map(|meta| meta.id)
        .collect();
    if stale.is_empty() {
        return Ok(0);
    }

    let count = stale.len();
    shared.store.batch_delete(&stale).await?;
    debug!(count, "Cleaned up stale signal files");
    Ok(count)
}

/// Best-effort cleanup wrapper for the background loop
pub(crate) async fn run_cleanup(shared: &Shared) {
    if let Err(err) = cleanup_old_signaling_messages(shared).await {
        warn!(error = %err, "Signal file cleanup failed");
    }
}
