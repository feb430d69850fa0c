//! Downstream read path - checkpointed pagination over the document folder
//!
//! Documents are paged in `(modifiedTime, name)` order. The store's clock
//! has millisecond resolution, so several documents can share one
//! modified-time; the checkpoint carries the primary keys already
//! delivered at its instant and each page overfetches a handful of entries
//! to ride out listing lag inside such a tie cluster.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, warn};

use peersync_core::domain::document::{primary_key_of_file, DocumentState};
use peersync_core::domain::{DriveStructure, ReplicationCheckpoint, ReplicationError};
use peersync_core::ports::object_store::{FileMeta, IObjectStore, ListOrder, ListQuery};

/// Extra entries requested beyond the page size
///
/// Bounds the damage of eventual-consistency lag inside one tie cluster;
/// must stay at or above the largest expected cluster.
const CHECKPOINT_OVERFETCH: usize = 6;

/// One page of pulled documents plus the cursor for the next page
#[derive(Debug, Clone)]
pub struct PullResult {
    /// Document payloads, in checkpoint order
    pub documents: Vec<DocumentState>,
    /// Cursor after this page; unchanged when the page is empty
    pub checkpoint: Option<ReplicationCheckpoint>,
}

/// Checkpointed pagination over `docs/`
pub struct DownstreamHandler {
    store: Arc<dyn IObjectStore>,
    structure: DriveStructure,
    apply_concurrency: usize,
}

impl DownstreamHandler {
    /// Creates the handler over an initialized drive structure
    pub fn new(
        store: Arc<dyn IObjectStore>,
        structure: DriveStructure,
        apply_concurrency: usize,
    ) -> Self {
        Self {
            store,
            structure,
            apply_concurrency: apply_concurrency.max(1),
        }
    }

    /// Fetches the next page of documents after a checkpoint
    ///
    /// Repeated calls with each returned checkpoint eventually drain to an
    /// empty page with the checkpoint unchanged; the cursor's
    /// modified-time never moves backwards.
    pub async fn fetch_changes(
        &self,
        checkpoint: Option<&ReplicationCheckpoint>,
        batch_size: usize,
    ) -> Result<PullResult, ReplicationError> {
        let query = ListQuery {
            name: None,
            trashed: Some(false),
            modified_since: checkpoint.map(|c| c.modified_time),
        };
        let listed = self
            .store
            .list_folder(
                &self.structure.docs_folder_id,
                &query,
                ListOrder::ModifiedAscNameAsc,
                Some((batch_size + CHECKPOINT_OVERFETCH) as u32),
            )
            .await?;

        // Drop entries already delivered at the checkpoint's instant, then
        // cut the page.
        let page: Vec<(String, FileMeta)> = listed
            .into_iter()
            .filter_map(|meta| {
                let pk = primary_key_of_file(&meta.name)?.to_string();
                Some((pk, meta))
            })
            .filter(|(pk, meta)| {
                checkpoint.map_or(true, |c| !c.already_delivered(meta.modified_time, pk))
            })
            .take(batch_size)
            .collect();

        let Some((_, last_meta)) = page.last() else {
            return Ok(PullResult {
                documents: Vec::new(),
                checkpoint: checkpoint.cloned(),
            });
        };
        let last_modified = last_meta.modified_time;

        let mut tie_keys: Vec<String> = page
            .iter()
            .filter(|(_, meta)| meta.modified_time == last_modified)
            .map(|(pk, _)| pk.clone())
            .collect();
        if let Some(previous) = checkpoint {
            // The page ended inside the cluster the previous page already
            // started; carry its names so they stay filtered next call.
            if previous.modified_time == last_modified {
                for pk in &previous.doc_ids_with_same_modified_time {
                    if !tie_keys.contains(pk) {
                        tie_keys.push(pk.clone());
                    }
                }
            }
        }

        let documents: Vec<DocumentState> = stream::iter(page.iter().cloned())
            .map(|(pk, meta)| async move {
                let value = self.store.download_json(&meta.id).await?;
                let state = DocumentState::from_value(value);
                if state.is_none() {
                    warn!(primary_key = %pk, "Skipping document with non-object content");
                }
                Ok::<_, ReplicationError>(state)
            })
            .buffered(self.apply_concurrency)
            .try_collect::<Vec<Option<DocumentState>>>()
            .await?
            .into_iter()
            .flatten()
            .collect();

        debug!(
            documents = documents.len(),
            modified_time = %last_modified,
            ties = tie_keys.len(),
            "Fetched changes"
        );
        Ok(PullResult {
            documents,
            checkpoint: Some(ReplicationCheckpoint {
                modified_time: last_modified,
                doc_ids_with_same_modified_time: tie_keys,
            }),
        })
    }
}
