//! Downstream replication checkpoint
//!
//! The checkpoint is a cursor over `docs/` ordered by server-assigned
//! modified-time. Because the store's clock has millisecond resolution,
//! several documents can share one modified-time; the checkpoint therefore
//! carries the primary keys already delivered at its modified-time so the
//! next page can skip them.
//!
//! Primary keys, not file IDs, are stored: listing returns names
//! consistently, whereas IDs change when a file is deleted and re-created.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cursor for checkpointed pagination over the document folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationCheckpoint {
    /// Server-assigned modified-time of the newest delivered document
    pub modified_time: DateTime<Utc>,
    /// Primary keys of every delivered document sharing `modified_time`
    pub doc_ids_with_same_modified_time: Vec<String>,
}

impl ReplicationCheckpoint {
    /// Returns true if a document with the given modified-time and primary
    /// key has already been delivered under this checkpoint
    pub fn already_delivered(&self, modified_time: DateTime<Utc>, primary_key: &str) -> bool {
        modified_time == self.modified_time
            && self
                .doc_ids_with_same_modified_time
                .iter()
                .any(|id| id == primary_key)
    }
}
