//! File and folder operations (Google Drive REST v3)
//!
//! Maps the object-store port operations onto `files.list`, `files.get`,
//! `files.create` (metadata and multipart), `files.update` (media) and
//! `files.delete`. Wire DTOs live here; the rest of the workspace only
//! sees the port-level types.

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::{header, Method, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use peersync_core::domain::{Etag, FileId, FolderId, ReplicationError};
use peersync_core::ports::object_store::{CreatedFile, FileMeta, ListOrder, ListQuery};

use crate::client::DriveClient;

/// MIME type marking a Drive folder
pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// Metadata fields requested for single files
const FILE_FIELDS: &str = "id,name,version,modifiedTime,createdTime,trashed";

/// Metadata fields requested for listings
const LIST_FIELDS: &str = "files(id,name,version,modifiedTime,createdTime,trashed),nextPageToken";

// ============================================================================
// Drive API response types
// ============================================================================

/// A file resource from the Drive v3 API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    /// Monotonically increasing revision counter; v3 listings carry no
    /// etag, so this stands in as the change token for listed entries
    version: Option<String>,
    modified_time: Option<DateTime<Utc>>,
    created_time: Option<DateTime<Utc>>,
    trashed: Option<bool>,
}

/// Response from `files.list`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

fn to_meta(file: DriveFile, header_etag: Option<String>) -> FileMeta {
    let etag = header_etag
        .or(file.version)
        .unwrap_or_default();
    FileMeta {
        id: FileId::new(file.id),
        name: file.name,
        etag: Etag::new(etag),
        modified_time: file.modified_time.unwrap_or_default(),
        created_time: file.created_time.unwrap_or_default(),
        trashed: file.trashed.unwrap_or(false),
    }
}

/// Reads the `ETag` response header, if the server sent one
fn response_etag(response: &Response) -> Option<String> {
    response
        .headers()
        .get(header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim_matches('"').to_string())
}

// ============================================================================
// Query composition
// ============================================================================

/// Escapes a value for embedding in a Drive `q` string
fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Composes the `q` parameter for a folder listing
fn compose_query(folder: &FolderId, query: &ListQuery, folders_only: bool) -> String {
    let mut parts = vec![format!("'{}' in parents", escape_query_value(folder.as_str()))];

    if let Some(name) = &query.name {
        parts.push(format!("name = '{}'", escape_query_value(name)));
    }
    if let Some(trashed) = query.trashed {
        parts.push(format!("trashed = {trashed}"));
    }
    if let Some(since) = query.modified_since {
        parts.push(format!(
            "modifiedTime >= '{}'",
            since.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        ));
    }
    if folders_only {
        parts.push(format!("mimeType = '{FOLDER_MIME}'"));
    }

    parts.join(" and ")
}

fn order_by(order: ListOrder) -> Option<&'static str> {
    match order {
        ListOrder::Unspecified => None,
        ListOrder::ModifiedAscNameAsc => Some("modifiedTime,name"),
        ListOrder::CreatedDesc => Some("createdTime desc"),
    }
}

// ============================================================================
// Operations
// ============================================================================

impl DriveClient {
    /// Lists files under a folder, following pagination when the caller
    /// did not bound the page size
    pub async fn list_files(
        &self,
        folder: &FolderId,
        query: &ListQuery,
        order: ListOrder,
        page_size: Option<u32>,
    ) -> Result<Vec<FileMeta>, ReplicationError> {
        let q = compose_query(folder, query, false);
        let mut results = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let response = self
                .execute_with_retry("files.list", || {
                    let mut req = self
                        .request(Method::GET, "/drive/v3/files")
                        .query(&[("q", q.as_str()), ("fields", LIST_FIELDS)]);
                    if let Some(order) = order_by(order) {
                        req = req.query(&[("orderBy", order)]);
                    }
                    if let Some(size) = page_size {
                        req = req.query(&[("pageSize", size.to_string())]);
                    }
                    if let Some(token) = &page_token {
                        req = req.query(&[("pageToken", token.as_str())]);
                    }
                    req
                })
                .await?;

            let list: DriveFileList = response
                .json()
                .await
                .map_err(|e| ReplicationError::Http(e.to_string()))?;
            results.extend(list.files.into_iter().map(|f| to_meta(f, None)));

            // A bounded listing never follows pagination; the caller asked
            // for at most one page.
            match (page_size, list.next_page_token) {
                (None, Some(token)) => page_token = Some(token),
                _ => break,
            }
        }

        debug!(count = results.len(), "Listed folder {}", folder);
        Ok(results)
    }

    /// Fetches the metadata of one file
    ///
    /// The etag comes from the `ETag` response header; Drive's v3 file
    /// resource does not embed it.
    pub async fn get_file_meta(&self, id: &FileId) -> Result<FileMeta, ReplicationError> {
        let path = format!("/drive/v3/files/{}", id.as_str());
        let response = self
            .execute_with_retry("files.get", || {
                self.request(Method::GET, &path)
                    .query(&[("fields", FILE_FIELDS)])
            })
            .await?;

        let etag = response_etag(&response);
        let file: DriveFile = response
            .json()
            .await
            .map_err(|e| ReplicationError::Http(e.to_string()))?;
        Ok(to_meta(file, etag))
    }

    /// Downloads a file's content as JSON; a zero-byte file yields `null`
    pub async fn download_json_content(&self, id: &FileId) -> Result<Value, ReplicationError> {
        let path = format!("/drive/v3/files/{}", id.as_str());
        let response = self
            .execute_with_retry("files.get media", || {
                self.request(Method::GET, &path).query(&[("alt", "media")])
            })
            .await?;

        let body = response
            .bytes()
            .await
            .map_err(|e| ReplicationError::Http(e.to_string()))?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&body)?)
    }

    /// Creates a folder and returns its ID
    async fn create_folder(
        &self,
        parent: &FolderId,
        name: &str,
    ) -> Result<FolderId, ReplicationError> {
        let metadata = json!({
            "name": name,
            "parents": [parent.as_str()],
            "mimeType": FOLDER_MIME,
        });
        let response = self
            .execute_with_retry("files.create folder", || {
                self.request(Method::POST, "/drive/v3/files")
                    .query(&[("fields", "id")])
                    .json(&metadata)
            })
            .await?;

        let file: DriveFile = response
            .json()
            .await
            .map_err(|e| ReplicationError::Http(e.to_string()))?;
        Ok(FolderId::new(file.id))
    }

    /// Lists folders of one name under a parent, smallest ID first
    async fn find_folders(
        &self,
        parent: &FolderId,
        name: &str,
    ) -> Result<Vec<FolderId>, ReplicationError> {
        let q = format!(
            "'{}' in parents and name = '{}' and mimeType = '{FOLDER_MIME}' and trashed = false",
            escape_query_value(parent.as_str()),
            escape_query_value(name)
        );
        let response = self
            .execute_with_retry("files.list folders", || {
                self.request(Method::GET, "/drive/v3/files")
                    .query(&[("q", q.as_str()), ("fields", "files(id)")])
            })
            .await?;

        let list: DriveFileList = response
            .json()
            .await
            .map_err(|e| ReplicationError::Http(e.to_string()))?;
        let mut ids: Vec<FolderId> = list.files.into_iter().map(|f| FolderId::new(f.id)).collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }

    /// Ensures a folder exists, resolving creation races to one winner
    ///
    /// List-then-create inside a best-effort check-and-set loop: when two
    /// peers create the same folder simultaneously, both re-list and
    /// resolve to the lexicographically smallest ID; the other folder is
    /// ignored.
    pub async fn ensure_folder_by_name(
        &self,
        parent: &FolderId,
        name: &str,
    ) -> Result<FolderId, ReplicationError> {
        if let Some(id) = self.find_folders(parent, name).await?.into_iter().next() {
            return Ok(id);
        }

        let created = self.create_folder(parent, name).await?;
        debug!(folder = name, id = %created, "Created folder");

        // Re-list: a concurrent creator may have won with a smaller ID.
        let mut ids = self.find_folders(parent, name).await?;
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids.into_iter().next().unwrap_or(created))
    }

    /// Lists live files of one name under a parent, smallest ID first
    async fn find_files(
        &self,
        parent: &FolderId,
        name: &str,
    ) -> Result<Vec<FileMeta>, ReplicationError> {
        let query = ListQuery {
            name: Some(name.to_string()),
            trashed: Some(false),
            modified_since: None,
        };
        let mut files = self
            .list_files(parent, &query, ListOrder::Unspecified, None)
            .await?;
        files.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(files)
    }

    /// Ensures an empty file exists, first-listing-wins
    pub async fn ensure_empty_file(
        &self,
        parent: &FolderId,
        name: &str,
    ) -> Result<CreatedFile, ReplicationError> {
        if let Some(meta) = self.find_files(parent, name).await?.into_iter().next() {
            // Listed entries carry the version counter; conditional writes
            // need the real etag from the single-file metadata.
            let meta = self.get_file_meta(&meta.id).await?;
            return Ok(CreatedFile {
                id: meta.id,
                etag: meta.etag,
            });
        }

        let metadata = json!({
            "name": name,
            "parents": [parent.as_str()],
            "mimeType": "application/json",
        });
        let response = self
            .execute_with_retry("files.create empty", || {
                self.request(Method::POST, "/drive/v3/files")
                    .query(&[("fields", "id")])
                    .json(&metadata)
            })
            .await?;
        let etag = response_etag(&response);
        let file: DriveFile = response
            .json()
            .await
            .map_err(|e| ReplicationError::Http(e.to_string()))?;
        let id = FileId::new(file.id);

        // A racer may have created the same name first; resolve like
        // ensure_folder does.
        let winner = self
            .find_files(parent, name)
            .await?
            .into_iter()
            .next()
            .map(|m| m.id)
            .unwrap_or_else(|| id.clone());
        if winner != id {
            debug!(file = name, loser = %id, winner = %winner, "Lost creation race");
            let meta = self.get_file_meta(&winner).await?;
            return Ok(CreatedFile {
                id: meta.id,
                etag: meta.etag,
            });
        }

        match etag {
            Some(etag) => Ok(CreatedFile {
                id,
                etag: Etag::new(etag),
            }),
            None => {
                let meta = self.get_file_meta(&id).await?;
                Ok(CreatedFile {
                    id: meta.id,
                    etag: meta.etag,
                })
            }
        }
    }

    /// Serializes the media body; `null` blanks the file
    fn media_body(content: &Value) -> Result<Vec<u8>, ReplicationError> {
        if content.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::to_vec(content)?)
    }

    /// Replaces a file's content unconditionally
    pub async fn update_media(&self, id: &FileId, content: &Value) -> Result<(), ReplicationError> {
        let path = format!("/upload/drive/v3/files/{}", id.as_str());
        let body = Self::media_body(content)?;
        self.execute_with_retry("files.update media", || {
            self.request(Method::PATCH, &path)
                .query(&[("uploadType", "media")])
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.clone())
        })
        .await?;
        Ok(())
    }

    /// Conditionally replaces a file's content
    ///
    /// Sends `If-Match`; the store answers 412 when the etag is stale,
    /// which [`DriveClient::execute_with_retry`] maps to
    /// [`ReplicationError::EtagMismatch`].
    pub async fn conditional_update_media(
        &self,
        id: &FileId,
        etag: &Etag,
        content: &Value,
    ) -> Result<Etag, ReplicationError> {
        let path = format!("/upload/drive/v3/files/{}", id.as_str());
        let body = Self::media_body(content)?;
        let response = self
            .execute_with_retry("files.update conditional", || {
                self.request(Method::PATCH, &path)
                    .query(&[("uploadType", "media")])
                    .header(header::IF_MATCH, format!("\"{}\"", etag.as_str()))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(body.clone())
            })
            .await?;

        match response_etag(&response) {
            Some(etag) => Ok(Etag::new(etag)),
            None => Ok(self.get_file_meta(id).await?.etag),
        }
    }

    /// Uploads a JSON file in one multipart/related request,
    /// de-duplicating by `(parent, name)`
    pub async fn upload_multipart_json(
        &self,
        parent: &FolderId,
        name: &str,
        content: &Value,
    ) -> Result<FileId, ReplicationError> {
        // De-duplicate: replaying an insert replaces the existing file.
        if let Some(existing) = self.find_files(parent, name).await?.into_iter().next() {
            self.update_media(&existing.id, content).await?;
            return Ok(existing.id);
        }

        let metadata = json!({
            "name": name,
            "parents": [parent.as_str()],
            "mimeType": "application/json",
        });
        let boundary = format!("peersync{:016x}", rand::thread_rng().gen::<u64>());
        let body = build_multipart_related(&boundary, &metadata, content)?;

        let response = self
            .execute_with_retry("files.create multipart", || {
                self.request(Method::POST, "/upload/drive/v3/files")
                    .query(&[("uploadType", "multipart"), ("fields", "id")])
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/related; boundary={boundary}"),
                    )
                    .body(body.clone())
            })
            .await?;

        let file: DriveFile = response
            .json()
            .await
            .map_err(|e| ReplicationError::Http(e.to_string()))?;
        Ok(FileId::new(file.id))
    }

    /// Deletes a file; an already-deleted file is not an error
    pub async fn delete_file_by_id(&self, id: &FileId) -> Result<(), ReplicationError> {
        let path = format!("/drive/v3/files/{}", id.as_str());
        match self
            .execute_with_retry("files.delete", || self.request(Method::DELETE, &path))
            .await
        {
            Ok(_) => Ok(()),
            Err(ReplicationError::Fetch { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Builds a `multipart/related` body with a metadata part and a media part
fn build_multipart_related(
    boundary: &str,
    metadata: &Value,
    media: &Value,
) -> Result<Vec<u8>, ReplicationError> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(&serde_json::to_vec(metadata)?);
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json\r\n\r\n");
    body.extend_from_slice(&serde_json::to_vec(media)?);
    body.extend_from_slice(format!("\r\n--{boundary}--").as_bytes());
    Ok(body)
}
