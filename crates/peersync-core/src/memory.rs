//! In-memory port implementations
//!
//! [`MemoryObjectStore`] models the semantics the replication core relies
//! on: per-file etags that change on every write, strong per-file
//! compare-and-set, server-assigned millisecond modified-times, and
//! first-listing-wins de-duplication. [`InMemoryMeshHub`] provides a peer
//! transport whose handshake flows through the signaling channel exactly
//! like a WebRTC offer/answer would.
//!
//! Both are used by the integration tests across the workspace and double
//! as reference implementations of the port contracts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::domain::errors::ReplicationError;
use crate::domain::newtypes::{Etag, FileId, FolderId, SessionId};
use crate::ports::object_store::{CreatedFile, FileMeta, IObjectStore, ListOrder, ListQuery};
use crate::ports::peer_transport::{IPeerChannel, IPeerConnector, PeerEvent};

// ============================================================================
// MemoryObjectStore
// ============================================================================

#[derive(Debug, Clone)]
struct StoredFolder {
    parent: FolderId,
    name: String,
}

#[derive(Debug, Clone)]
struct StoredFile {
    parent: FolderId,
    name: String,
    content: Value,
    etag: u64,
    modified_time: DateTime<Utc>,
    created_time: DateTime<Utc>,
    trashed: bool,
}

#[derive(Debug, Default)]
struct StoreInner {
    folders: HashMap<FolderId, StoredFolder>,
    files: HashMap<FileId, StoredFile>,
    next_id: u64,
    next_etag: u64,
}

impl StoreInner {
    fn fresh_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn fresh_etag(&mut self) -> u64 {
        self.next_etag += 1;
        self.next_etag
    }
}

/// In-memory object store shared by every peer of a test scenario
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    inner: Mutex<StoreInner>,
}

/// Truncates to the store's millisecond clock resolution
fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    Utc.timestamp_millis_opt(now.timestamp_millis())
        .single()
        .unwrap_or(now)
}

fn meta_of(id: &FileId, file: &StoredFile) -> FileMeta {
    FileMeta {
        id: id.clone(),
        name: file.name.clone(),
        etag: Etag::new(format!("mem-etag-{}", file.etag)),
        modified_time: file.modified_time,
        created_time: file.created_time,
        trashed: file.trashed,
    }
}

impl MemoryObjectStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides a file's modified-time
    ///
    /// Test hook for constructing modified-time tie clusters that a real
    /// store produces under concurrent writes within one millisecond.
    pub async fn set_modified_time(&self, id: &FileId, modified_time: DateTime<Utc>) {
        let mut inner = self.inner.lock().await;
        if let Some(file) = inner.files.get_mut(id) {
            file.modified_time = modified_time;
        }
    }

    /// Overrides a file's created-time
    ///
    /// Test hook for aging signal files past the garbage-collection cutoff.
    pub async fn set_created_time(&self, id: &FileId, created_time: DateTime<Utc>) {
        let mut inner = self.inner.lock().await;
        if let Some(file) = inner.files.get_mut(id) {
            file.created_time = created_time;
        }
    }

    /// Returns the number of live files under a folder
    pub async fn live_file_count(&self, folder: &FolderId) -> usize {
        let inner = self.inner.lock().await;
        inner
            .files
            .values()
            .filter(|f| &f.parent == folder && !f.trashed)
            .count()
    }

    /// Looks up a live file by name under a folder
    pub async fn find_by_name(&self, folder: &FolderId, name: &str) -> Option<FileMeta> {
        let inner = self.inner.lock().await;
        inner
            .files
            .iter()
            .filter(|(_, f)| &f.parent == folder && f.name == name && !f.trashed)
            .min_by(|(a, _), (b, _)| a.as_str().cmp(b.as_str()))
            .map(|(id, f)| meta_of(id, f))
    }
}

#[async_trait::async_trait]
impl IObjectStore for MemoryObjectStore {
    async fn ensure_folder(
        &self,
        parent: &FolderId,
        name: &str,
    ) -> Result<FolderId, ReplicationError> {
        let mut inner = self.inner.lock().await;

        // First-listing-wins: resolve to the lexicographically smallest ID
        // among any same-named siblings.
        let existing = inner
            .folders
            .iter()
            .filter(|(_, f)| &f.parent == parent && f.name == name)
            .map(|(id, _)| id.clone())
            .min_by(|a, b| a.as_str().cmp(b.as_str()));
        if let Some(id) = existing {
            return Ok(id);
        }

        let id = FolderId::new(format!("mem-folder-{:08}", inner.fresh_id()));
        inner.folders.insert(
            id.clone(),
            StoredFolder {
                parent: parent.clone(),
                name: name.to_string(),
            },
        );
        debug!(folder = name, id = %id, "Created folder");
        Ok(id)
    }

    async fn create_empty_file(
        &self,
        parent: &FolderId,
        name: &str,
    ) -> Result<CreatedFile, ReplicationError> {
        let mut inner = self.inner.lock().await;

        let existing = inner
            .files
            .iter()
            .filter(|(_, f)| &f.parent == parent && f.name == name && !f.trashed)
            .map(|(id, f)| (id.clone(), f.etag))
            .min_by(|(a, _), (b, _)| a.as_str().cmp(b.as_str()));
        if let Some((id, etag)) = existing {
            return Ok(CreatedFile {
                id,
                etag: Etag::new(format!("mem-etag-{etag}")),
            });
        }

        let etag = inner.fresh_etag();
        let id = FileId::new(format!("mem-file-{:08}", inner.fresh_id()));
        let now = now_millis();
        inner.files.insert(
            id.clone(),
            StoredFile {
                parent: parent.clone(),
                name: name.to_string(),
                content: Value::Null,
                etag,
                modified_time: now,
                created_time: now,
                trashed: false,
            },
        );
        Ok(CreatedFile {
            id,
            etag: Etag::new(format!("mem-etag-{etag}")),
        })
    }

    async fn file_meta(&self, id: &FileId) -> Result<FileMeta, ReplicationError> {
        let inner = self.inner.lock().await;
        let file = inner.files.get(id).ok_or_else(|| ReplicationError::Fetch {
            status: 404,
            body: format!("file not found: {id}"),
        })?;
        Ok(meta_of(id, file))
    }

    async fn conditional_fill_if_etag(
        &self,
        id: &FileId,
        etag: &Etag,
        content: &Value,
    ) -> Result<Etag, ReplicationError> {
        let mut inner = self.inner.lock().await;
        let fresh = inner.fresh_etag();
        let file = inner.files.get_mut(id).ok_or_else(|| ReplicationError::Fetch {
            status: 404,
            body: format!("file not found: {id}"),
        })?;

        if format!("mem-etag-{}", file.etag) != etag.as_str() {
            return Err(ReplicationError::EtagMismatch);
        }

        file.content = content.clone();
        file.etag = fresh;
        file.modified_time = now_millis();
        Ok(Etag::new(format!("mem-etag-{fresh}")))
    }

    async fn list_folder(
        &self,
        folder: &FolderId,
        query: &ListQuery,
        order: ListOrder,
        page_size: Option<u32>,
    ) -> Result<Vec<FileMeta>, ReplicationError> {
        let inner = self.inner.lock().await;

        let mut results: Vec<FileMeta> = inner
            .files
            .iter()
            .filter(|(_, f)| &f.parent == folder)
            .filter(|(_, f)| query.name.as_deref().map_or(true, |n| f.name == n))
            .filter(|(_, f)| query.trashed.map_or(true, |t| f.trashed == t))
            .filter(|(_, f)| {
                query
                    .modified_since
                    .map_or(true, |since| f.modified_time >= since)
            })
            .map(|(id, f)| meta_of(id, f))
            .collect();

        match order {
            ListOrder::Unspecified => results.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str())),
            ListOrder::ModifiedAscNameAsc => results
                .sort_by(|a, b| (a.modified_time, &a.name).cmp(&(b.modified_time, &b.name))),
            ListOrder::CreatedDesc => {
                results.sort_by(|a, b| (b.created_time, &b.name).cmp(&(a.created_time, &a.name)))
            }
        }

        if let Some(limit) = page_size {
            results.truncate(limit as usize);
        }
        Ok(results)
    }

    async fn download_json(&self, id: &FileId) -> Result<Value, ReplicationError> {
        let inner = self.inner.lock().await;
        let file = inner.files.get(id).ok_or_else(|| ReplicationError::Fetch {
            status: 404,
            body: format!("file not found: {id}"),
        })?;
        Ok(file.content.clone())
    }

    async fn upload_multipart(
        &self,
        parent: &FolderId,
        name: &str,
        content: &Value,
    ) -> Result<FileId, ReplicationError> {
        let mut inner = self.inner.lock().await;
        let fresh = inner.fresh_etag();

        // De-duplicate by (parent, name): replaying an insert replaces the
        // existing file instead of creating a sibling.
        let existing = inner
            .files
            .iter()
            .filter(|(_, f)| &f.parent == parent && f.name == name && !f.trashed)
            .map(|(id, _)| id.clone())
            .min_by(|a, b| a.as_str().cmp(b.as_str()));
        if let Some(id) = existing {
            let file = inner.files.get_mut(&id).expect("existing file");
            file.content = content.clone();
            file.etag = fresh;
            file.modified_time = now_millis();
            return Ok(id);
        }

        let id = FileId::new(format!("mem-file-{:08}", inner.fresh_id()));
        let now = now_millis();
        inner.files.insert(
            id.clone(),
            StoredFile {
                parent: parent.clone(),
                name: name.to_string(),
                content: content.clone(),
                etag: fresh,
                modified_time: now,
                created_time: now,
                trashed: false,
            },
        );
        Ok(id)
    }

    async fn patch_media(&self, id: &FileId, content: &Value) -> Result<(), ReplicationError> {
        let mut inner = self.inner.lock().await;
        let fresh = inner.fresh_etag();
        let file = inner.files.get_mut(id).ok_or_else(|| ReplicationError::Fetch {
            status: 404,
            body: format!("file not found: {id}"),
        })?;
        file.content = content.clone();
        file.etag = fresh;
        file.modified_time = now_millis();
        Ok(())
    }

    async fn delete_file(&self, id: &FileId) -> Result<(), ReplicationError> {
        let mut inner = self.inner.lock().await;
        inner.files.remove(id);
        Ok(())
    }

    async fn batch_delete(&self, ids: &[FileId]) -> Result<(), ReplicationError> {
        let mut inner = self.inner.lock().await;
        for id in ids {
            inner.files.remove(id);
        }
        Ok(())
    }
}

// ============================================================================
// In-memory peer mesh
// ============================================================================

#[derive(Default)]
struct HubInner {
    /// Event sender of each registered endpoint, keyed by (local, remote)
    endpoints: HashMap<(SessionId, SessionId), mpsc::UnboundedSender<PeerEvent>>,
}

/// Shared rendezvous for the in-memory peer transport
///
/// One hub per test scenario; every peer's connector holds a handle to it.
/// The offer/answer handshake still travels through the signaling folder,
/// so the transport exercises the same message flow as a WebRTC binding.
#[derive(Clone, Default)]
pub struct InMemoryMeshHub {
    inner: Arc<StdMutex<HubInner>>,
}

impl InMemoryMeshHub {
    /// Creates an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a connector for one peer
    pub fn connector(&self) -> Arc<dyn IPeerConnector> {
        Arc::new(InMemoryPeerConnector { hub: self.clone() })
    }

    fn register(
        &self,
        local: &SessionId,
        remote: &SessionId,
        tx: mpsc::UnboundedSender<PeerEvent>,
    ) {
        let mut inner = self.inner.lock().expect("hub lock");
        inner
            .endpoints
            .insert((local.clone(), remote.clone()), tx);
    }

    fn deregister(&self, local: &SessionId, remote: &SessionId) {
        let mut inner = self.inner.lock().expect("hub lock");
        inner.endpoints.remove(&(local.clone(), remote.clone()));
    }

    fn send_to(&self, local: &SessionId, remote: &SessionId, event: PeerEvent) -> bool {
        let inner = self.inner.lock().expect("hub lock");
        inner
            .endpoints
            .get(&(remote.clone(), local.clone()))
            .map(|tx| tx.send(event).is_ok())
            .unwrap_or(false)
    }
}

/// Connector handing out in-memory peer channels
pub struct InMemoryPeerConnector {
    hub: InMemoryMeshHub,
}

#[async_trait::async_trait]
impl IPeerConnector for InMemoryPeerConnector {
    async fn connect(
        &self,
        local: &SessionId,
        remote: &SessionId,
        initiator: bool,
    ) -> Result<(Box<dyn IPeerChannel>, mpsc::UnboundedReceiver<PeerEvent>), ReplicationError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.hub.register(local, remote, tx.clone());

        if initiator {
            // The offer travels through the signaling folder like an SDP
            // offer would.
            let offer = json!({"type": "offer", "from": local.as_str()});
            tx.send(PeerEvent::Signal(offer))
                .map_err(|_| ReplicationError::Peer("event channel closed".to_string()))?;
        }

        let channel = InMemoryPeerChannel {
            hub: self.hub.clone(),
            local: local.clone(),
            remote: remote.clone(),
            events: tx,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };
        Ok((Box::new(channel), rx))
    }
}

/// One side of an in-memory peer connection
pub struct InMemoryPeerChannel {
    hub: InMemoryMeshHub,
    local: SessionId,
    remote: SessionId,
    events: mpsc::UnboundedSender<PeerEvent>,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl InMemoryPeerChannel {
    fn mark_connected(&self) {
        if !self.connected.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(PeerEvent::Connect);
        }
    }
}

#[async_trait::async_trait]
impl IPeerChannel for InMemoryPeerChannel {
    async fn signal(&self, payload: Value) -> Result<(), ReplicationError> {
        match payload.get("type").and_then(Value::as_str) {
            Some("offer") => {
                // Non-initiating side: answer through the signaling channel,
                // then consider the pair connected.
                let answer = json!({"type": "answer", "from": self.local.as_str()});
                self.events
                    .send(PeerEvent::Signal(answer))
                    .map_err(|_| ReplicationError::Peer("event channel closed".to_string()))?;
                self.mark_connected();
                Ok(())
            }
            Some("answer") => {
                self.mark_connected();
                Ok(())
            }
            other => Err(ReplicationError::Peer(format!(
                "unexpected handshake payload: {other:?}"
            ))),
        }
    }

    async fn send(&self, text: &str) -> Result<(), ReplicationError> {
        if !self.hub.send_to(
            &self.local,
            &self.remote,
            PeerEvent::Data(text.to_string()),
        ) {
            return Err(ReplicationError::Peer(format!(
                "no endpoint for {}",
                self.remote
            )));
        }
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.hub.send_to(&self.local, &self.remote, PeerEvent::Closed);
        let _ = self.events.send(PeerEvent::Closed);
        self.hub.deregister(&self.local, &self.remote);
    }
}
