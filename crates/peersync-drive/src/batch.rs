//! Bulk deletion via the Drive REST v2 batch endpoint
//!
//! Signal-file garbage collection can delete hundreds of files per pass;
//! the v2 batch endpoint folds them into `multipart/mixed` requests of up
//! to 100 operations. A failed batch falls back to sequential deletes so
//! cleanup still makes progress against servers without batch support.

use rand::Rng;
use reqwest::{header, Method};
use tracing::{debug, warn};

use peersync_core::domain::{FileId, ReplicationError};

use crate::client::DriveClient;

/// Maximum operations per batch request (Drive API limit)
const BATCH_LIMIT: usize = 100;

impl DriveClient {
    /// Deletes several files, batching where possible
    pub async fn batch_delete_files(&self, ids: &[FileId]) -> Result<(), ReplicationError> {
        if ids.is_empty() {
            return Ok(());
        }

        for chunk in ids.chunks(BATCH_LIMIT) {
            if let Err(err) = self.send_delete_batch(chunk).await {
                warn!(
                    count = chunk.len(),
                    error = %err,
                    "Batch delete failed, falling back to sequential deletes"
                );
                for id in chunk {
                    self.delete_file_by_id(id).await?;
                }
            }
        }
        Ok(())
    }

    async fn send_delete_batch(&self, ids: &[FileId]) -> Result<(), ReplicationError> {
        let boundary = format!("peersync{:016x}", rand::thread_rng().gen::<u64>());
        let body = build_batch_body(&boundary, ids);

        self.execute_with_retry("batch.delete", || {
            self.request(Method::POST, "/batch/drive/v2")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/mixed; boundary={boundary}"),
                )
                .body(body.clone())
        })
        .await?;

        debug!(count = ids.len(), "Batch deleted signal files");
        Ok(())
    }
}

/// Builds the `multipart/mixed` body of one delete batch
fn build_batch_body(boundary: &str, ids: &[FileId]) -> String {
    let mut body = String::new();
    for (index, id) in ids.iter().enumerate() {
        body.push_str(&format!("--{boundary}\r\n"));
        body.push_str("Content-Type: application/http\r\n");
        body.push_str(&format!("Content-ID: <item-{index}>\r\n\r\n"));
        body.push_str(&format!("DELETE /drive/v2/files/{}\r\n\r\n", id.as_str()));
    }
    body.push_str(&format!("--{boundary}--"));
    body
}
