//! Upstream write path - conflict detection and the write-ahead log
//!
//! A push stages its batch in the WAL file inside the lock, then applies
//! the WAL to individual document files. The two-step shape makes a crash
//! at any point recoverable: the next transaction holder replays the
//! staged rows, and replay is idempotent because application re-classifies
//! every row against the then-current folder state and per-file writes are
//! last-writer-wins.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use tracing::{debug, info};

use peersync_core::domain::document::{doc_file_name, DocumentState};
use peersync_core::domain::{DriveStructure, ReplicationError, WalContents, WriteRow};
use peersync_core::ports::object_store::{FileMeta, IObjectStore, ListOrder, ListQuery};

/// Conflict detection and WAL processing for one replication
pub struct UpstreamHandler {
    store: Arc<dyn IObjectStore>,
    structure: DriveStructure,
    primary_key_field: String,
    apply_concurrency: usize,
}

impl UpstreamHandler {
    /// Creates the handler over an initialized drive structure
    pub fn new(
        store: Arc<dyn IObjectStore>,
        structure: DriveStructure,
        primary_key_field: impl Into<String>,
        apply_concurrency: usize,
    ) -> Self {
        Self {
            store,
            structure,
            primary_key_field: primary_key_field.into(),
            apply_concurrency: apply_concurrency.max(1),
        }
    }

    fn primary_key_of(&self, row: &WriteRow) -> Result<String, ReplicationError> {
        row.new_document_state
            .primary_key(&self.primary_key_field)
            .map(str::to_string)
            .ok_or_else(|| ReplicationError::MissingPrimaryKey(self.primary_key_field.clone()))
    }

    /// Looks up the live document file for a primary key
    async fn master_file(&self, primary_key: &str) -> Result<Option<FileMeta>, ReplicationError> {
        let mut metas = self
            .store
            .list_folder(
                &self.structure.docs_folder_id,
                &ListQuery {
                    name: Some(doc_file_name(primary_key)),
                    trashed: Some(false),
                    modified_since: None,
                },
                ListOrder::Unspecified,
                None,
            )
            .await?;
        metas.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(metas.into_iter().next())
    }

    /// Downloads the current master state of a primary key, if any
    async fn master_state(
        &self,
        primary_key: &str,
    ) -> Result<Option<DocumentState>, ReplicationError> {
        let Some(meta) = self.master_file(primary_key).await? else {
            return Ok(None);
        };
        let value = self.store.download_json(&meta.id).await?;
        Ok(DocumentState::from_value(value))
    }

    /// Detects conflicts and stages the clean rows into the WAL
    ///
    /// A row conflicts when the writer's view of the master diverges from
    /// the actual master: the assumed state differs canonically from the
    /// stored one, the assumed document vanished, or a document exists
    /// that the writer did not know about. Conflicting rows are returned
    /// for the host's conflict handler; they are never staged.
    ///
    /// Staging into a WAL that still holds rows fails with
    /// [`ReplicationError::WalNotDrained`].
    pub async fn handle_upstream_batch(
        &self,
        rows: Vec<WriteRow>,
    ) -> Result<Vec<WriteRow>, ReplicationError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let wal_value = self
            .store
            .download_json(&self.structure.wal_file_id)
            .await?;
        if !WalContents::from_file_value(wal_value)?.is_empty() {
            return Err(ReplicationError::WalNotDrained);
        }

        let checked: Vec<(WriteRow, bool)> = stream::iter(rows)
            .map(|row| async move {
                let primary_key = self.primary_key_of(&row)?;
                let current = self.master_state(&primary_key).await?;
                let conflict = match (&current, &row.assumed_master_state) {
                    (None, None) => false,
                    (Some(current), Some(assumed)) => !current.canonical_eq(assumed),
                    (Some(_), None) => true,
                    (None, Some(_)) => true,
                };
                Ok::<_, ReplicationError>((row, conflict))
            })
            .buffered(self.apply_concurrency)
            .try_collect()
            .await?;

        let mut conflicts = Vec::new();
        let mut clean = Vec::new();
        for (row, conflict) in checked {
            if conflict {
                conflicts.push(row);
            } else {
                clean.push(row);
            }
        }

        if !clean.is_empty() {
            let staged = serde_json::to_value(WalContents::staged(clean.clone()))?;
            self.store
                .patch_media(&self.structure.wal_file_id, &staged)
                .await?;
            info!(
                staged = clean.len(),
                conflicts = conflicts.len(),
                "Staged upstream batch"
            );
        } else if !conflicts.is_empty() {
            debug!(conflicts = conflicts.len(), "Entire batch conflicted");
        }

        Ok(conflicts)
    }

    /// Drains a staged WAL onto the document files
    ///
    /// Called after every transaction body and defensively at the start of
    /// each transaction, so a crashed holder's staging is finished by
    /// whoever locks next. Per-primary-key order is preserved; distinct
    /// keys apply concurrently.
    pub async fn process_wal_file(&self) -> Result<(), ReplicationError> {
        let wal_value = self
            .store
            .download_json(&self.structure.wal_file_id)
            .await?;
        let wal = WalContents::from_file_value(wal_value)?;
        let Some(rows) = wal.rows else {
            return Ok(());
        };
        if rows.is_empty() {
            return Ok(());
        }

        let total = rows.len();
        let groups = self.group_by_primary_key(rows)?;
        stream::iter(groups)
            .map(|(primary_key, group)| async move {
                for row in group {
                    self.apply_row(&primary_key, row).await?;
                }
                Ok::<_, ReplicationError>(())
            })
            .buffer_unordered(self.apply_concurrency)
            .try_collect::<Vec<()>>()
            .await?;

        // Drained: reset to empty. Restartable - a crash before this line
        // leaves the rows staged and the next holder replays them.
        self.store
            .patch_media(&self.structure.wal_file_id, &Value::Null)
            .await?;
        info!(rows = total, "Write-ahead log drained");
        Ok(())
    }

    /// Groups rows by primary key, preserving first-seen key order and
    /// per-key row order
    fn group_by_primary_key(
        &self,
        rows: Vec<WriteRow>,
    ) -> Result<Vec<(String, Vec<WriteRow>)>, ReplicationError> {
        let mut groups: Vec<(String, Vec<WriteRow>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for row in rows {
            let primary_key = self.primary_key_of(&row)?;
            match index.get(&primary_key) {
                Some(&i) => groups[i].1.push(row),
                None => {
                    index.insert(primary_key.clone(), groups.len());
                    groups.push((primary_key, vec![row]));
                }
            }
        }
        Ok(groups)
    }

    /// Applies one row: update when the document file exists, insert
    /// otherwise
    ///
    /// The existence check runs against the then-current folder state, so
    /// replaying a partially applied WAL re-classifies correctly; the
    /// insert path de-duplicates by `(parent, name)` on top.
    async fn apply_row(&self, primary_key: &str, row: WriteRow) -> Result<(), ReplicationError> {
        let file_value = row.new_document_state.to_file_value();
        match self.master_file(primary_key).await? {
            Some(meta) => {
                debug!(primary_key, "Applying update");
                self.store.patch_media(&meta.id, &file_value).await
            }
            None => {
                debug!(primary_key, "Applying insert");
                self.store
                    .upload_multipart(
                        &self.structure.docs_folder_id,
                        &doc_file_name(primary_key),
                        &file_value,
                    )
                    .await
                    .map(|_| ())
            }
        }
    }
}
