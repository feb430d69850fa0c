//! IObjectStore implementation for the Drive client
//!
//! Delegates the port operations to the [`files`](crate::files) and
//! [`batch`](crate::batch) modules.

use serde_json::Value;

use peersync_core::domain::{Etag, FileId, FolderId, ReplicationError};
use peersync_core::ports::object_store::{
    CreatedFile, FileMeta, IObjectStore, ListOrder, ListQuery,
};

use crate::client::DriveClient;

#[async_trait::async_trait]
impl IObjectStore for DriveClient {
    async fn ensure_folder(
        &self,
        parent: &FolderId,
        name: &str,
    ) -> Result<FolderId, ReplicationError> {
        self.ensure_folder_by_name(parent, name).await
    }

    async fn create_empty_file(
        &self,
        parent: &FolderId,
        name: &str,
    ) -> Result<CreatedFile, ReplicationError> {
        self.ensure_empty_file(parent, name).await
    }

    async fn file_meta(&self, id: &FileId) -> Result<FileMeta, ReplicationError> {
        self.get_file_meta(id).await
    }

    async fn conditional_fill_if_etag(
        &self,
        id: &FileId,
        etag: &Etag,
        content: &Value,
    ) -> Result<Etag, ReplicationError> {
        self.conditional_update_media(id, etag, content).await
    }

    async fn list_folder(
        &self,
        folder: &FolderId,
        query: &ListQuery,
        order: ListOrder,
        page_size: Option<u32>,
    ) -> Result<Vec<FileMeta>, ReplicationError> {
        self.list_files(folder, query, order, page_size).await
    }

    async fn download_json(&self, id: &FileId) -> Result<Value, ReplicationError> {
        self.download_json_content(id).await
    }

    async fn upload_multipart(
        &self,
        parent: &FolderId,
        name: &str,
        content: &Value,
    ) -> Result<FileId, ReplicationError> {
        self.upload_multipart_json(parent, name, content).await
    }

    async fn patch_media(&self, id: &FileId, content: &Value) -> Result<(), ReplicationError> {
        self.update_media(id, content).await
    }

    async fn delete_file(&self, id: &FileId) -> Result<(), ReplicationError> {
        self.delete_file_by_id(id).await
    }

    async fn batch_delete(&self, ids: &[FileId]) -> Result<(), ReplicationError> {
        self.batch_delete_files(ids).await
    }
}
