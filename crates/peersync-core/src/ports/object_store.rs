//! Object store port (driven/secondary port)
//!
//! Interface for the cloud file service backing the replication. The
//! primary implementation targets the Google Drive REST API, but the trait
//! only assumes a store with folders, named files, server-assigned
//! modified-times and per-file compare-and-set on etags.
//!
//! ## Design Notes
//!
//! - Queries are port-level DTOs ([`ListQuery`], [`ListOrder`]); the Drive
//!   adapter maps them to `q`/`orderBy` strings, the in-memory store
//!   filters directly. The core never builds provider query syntax.
//! - Errors are typed ([`ReplicationError`]) because the transaction
//!   protocol branches on `EtagMismatch` and the retry layer on
//!   `RateLimited`.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::errors::ReplicationError;
use crate::domain::newtypes::{Etag, FileId, FolderId};

/// Metadata of one file, as returned by a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    /// Store-assigned file ID
    pub id: FileId,
    /// File name within its folder
    pub name: String,
    /// Current etag, used for conditional writes
    pub etag: Etag,
    /// Server-assigned last modification time
    pub modified_time: DateTime<Utc>,
    /// Server-assigned creation time
    pub created_time: DateTime<Utc>,
    /// Whether the file is in the trash
    pub trashed: bool,
}

/// A freshly created file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedFile {
    /// Store-assigned file ID
    pub id: FileId,
    /// Etag of the empty file
    pub etag: Etag,
}

/// Filter for folder listings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Exact file name to match
    pub name: Option<String>,
    /// Filter on the trashed flag
    pub trashed: Option<bool>,
    /// Only files modified at or after this instant
    pub modified_since: Option<DateTime<Utc>>,
}

impl ListQuery {
    /// Matches everything
    pub fn any() -> Self {
        Self::default()
    }

    /// Matches one file by name
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Matches live (non-trashed) files
    pub fn live() -> Self {
        Self {
            trashed: Some(false),
            ..Self::default()
        }
    }
}

/// Ordering of folder listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListOrder {
    /// Provider-default order
    #[default]
    Unspecified,
    /// `modifiedTime asc, name asc` - the downstream pagination order
    ModifiedAscNameAsc,
    /// `createdTime desc` - the signaling poll order
    CreatedDesc,
}

/// Port trait for the object store backing one replication
///
/// ## Implementation Notes
///
/// - `ensure_folder` and `create_empty_file` must be idempotent under
///   concurrent callers: all racers resolve to the same ID
///   (first-listing-wins, lexicographically smallest on a creation race).
/// - `conditional_fill_if_etag` must fail with
///   [`ReplicationError::EtagMismatch`] iff the stored etag no longer
///   equals the supplied one; the transaction protocol relies on the
///   store's per-file compare-and-set being strong.
/// - Rate limiting (HTTP 429/5xx) is retried inside the adapter and only
///   surfaced as [`ReplicationError::RateLimited`] after exhaustion.
#[async_trait::async_trait]
pub trait IObjectStore: Send + Sync {
    /// Ensures a folder named `name` exists under `parent`
    ///
    /// Safe under concurrent callers: every racer observes the same
    /// resulting folder ID.
    async fn ensure_folder(
        &self,
        parent: &FolderId,
        name: &str,
    ) -> Result<FolderId, ReplicationError>;

    /// Ensures an empty file named `name` exists under `parent`
    ///
    /// Idempotent by `(parent, name)` with first-listing-wins.
    async fn create_empty_file(
        &self,
        parent: &FolderId,
        name: &str,
    ) -> Result<CreatedFile, ReplicationError>;

    /// Returns the current metadata of a file
    async fn file_meta(&self, id: &FileId) -> Result<FileMeta, ReplicationError>;

    /// Conditionally overwrites a file's content
    ///
    /// Succeeds iff the stored etag equals `etag`; returns the new etag.
    /// Pass [`Value::Null`] to blank the file.
    async fn conditional_fill_if_etag(
        &self,
        id: &FileId,
        etag: &Etag,
        content: &Value,
    ) -> Result<Etag, ReplicationError>;

    /// Lists files in a folder
    async fn list_folder(
        &self,
        folder: &FolderId,
        query: &ListQuery,
        order: ListOrder,
        page_size: Option<u32>,
    ) -> Result<Vec<FileMeta>, ReplicationError>;

    /// Downloads a file's content as JSON
    ///
    /// A zero-byte file yields [`Value::Null`].
    async fn download_json(&self, id: &FileId) -> Result<Value, ReplicationError>;

    /// Uploads a new JSON file, de-duplicating by `(parent, name)`
    ///
    /// When a live file of that name already exists, its content is
    /// replaced instead of a duplicate being created.
    async fn upload_multipart(
        &self,
        parent: &FolderId,
        name: &str,
        content: &Value,
    ) -> Result<FileId, ReplicationError>;

    /// Replaces a file's content unconditionally
    async fn patch_media(&self, id: &FileId, content: &Value) -> Result<(), ReplicationError>;

    /// Deletes a file; deleting an already-absent file succeeds
    async fn delete_file(&self, id: &FileId) -> Result<(), ReplicationError>;

    /// Deletes several files in one round trip where the store supports it
    async fn batch_delete(&self, ids: &[FileId]) -> Result<(), ReplicationError>;
}
