//! Peersync Signal - file-based signaling and peer mesh
//!
//! Bootstraps a WebRTC mesh over a shared `signaling/` folder: peers
//! announce themselves with presence beacons, exchange opaque handshake
//! payloads as small JSON files, and once connected push `RESYNC` pings so
//! remote writes are noticed in seconds rather than at the next poll.
//!
//! ## Flow
//!
//! ```text
//! signaling/ ──list──→ poll loop ──dispatch──→ peer mesh ──data──→ resync events
//!     ↑                                            │
//!     └────────────── handshake payloads ──────────┘
//! ```
//!
//! The poll loop paces itself with the adaptive ladder in [`backoff`];
//! data-channel activity and external wake events drop it back to fast
//! polling.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use peersync_core::config::SignalingOptions;
use peersync_core::domain::{DriveStructure, ReplicationError, SessionId, SignalMessage};
use peersync_core::ports::object_store::{IObjectStore, ListOrder, ListQuery};
use peersync_core::ports::peer_transport::{IPeerChannel, IPeerConnector};

pub mod backoff;
mod gc;
mod mesh;

pub use mesh::{NEW_PEER_MESSAGE, RESYNC_MESSAGE};

use backoff::PollBackoff;

/// One live peer connection tracked by the mesh
pub(crate) struct PeerHandle {
    /// The data/handshake channel
    channel: Arc<dyn IPeerChannel>,
    /// Set once the data channel opened
    connected: Arc<AtomicBool>,
    /// The peer's event-loop task
    task: JoinHandle<()>,
}

/// State shared between the poll loop, the GC loop and the peer tasks
pub(crate) struct Shared {
    pub(crate) store: Arc<dyn IObjectStore>,
    pub(crate) structure: DriveStructure,
    pub(crate) session_id: SessionId,
    pub(crate) connector: Arc<dyn IPeerConnector>,
    pub(crate) options: SignalingOptions,
    /// Live peers, keyed by remote session ID
    pub(crate) peers: Mutex<HashMap<SessionId, PeerHandle>>,
    /// Message IDs already consumed (own echoes included)
    pub(crate) processed: Mutex<HashSet<String>>,
    /// Nudges the orchestrator to re-pull
    pub(crate) resync_tx: mpsc::UnboundedSender<()>,
    /// Drops the poll loop back to fast polling
    pub(crate) wake: Notify,
    /// Stops every loop and peer task
    pub(crate) cancel: CancellationToken,
}

/// The signaling component of one peer
///
/// Owns the poll loop, the cleanup loop and the peer mesh. Created by the
/// orchestrator when the replication runs live; closed on cancel.
pub struct Signaling {
    shared: Arc<Shared>,
}

impl Signaling {
    /// Starts signaling: sends the presence beacon, runs one cleanup pass
    /// and spawns the poll and cleanup loops
    ///
    /// Returns the component and the stream of resync nudges.
    pub async fn start(
        store: Arc<dyn IObjectStore>,
        structure: DriveStructure,
        session_id: SessionId,
        connector: Arc<dyn IPeerConnector>,
        options: SignalingOptions,
    ) -> Result<(Self, mpsc::UnboundedReceiver<()>), ReplicationError> {
        let (resync_tx, resync_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            store,
            structure,
            session_id: session_id.clone(),
            connector,
            options,
            peers: Mutex::new(HashMap::new()),
            processed: Mutex::new(HashSet::new()),
            resync_tx,
            wake: Notify::new(),
            cancel: CancellationToken::new(),
        });

        gc::run_cleanup(&shared).await;
        mesh::send_message(&shared, &SignalMessage::beacon_body()).await?;
        info!(session = %session_id, "Signaling started");

        tokio::spawn(poll_loop(shared.clone()));
        tokio::spawn(cleanup_loop(shared.clone()));

        Ok((Self { shared }, resync_rx))
    }

    /// This peer's session ID
    pub fn session_id(&self) -> &SessionId {
        &self.shared.session_id
    }

    /// Resets the poll backoff to fast polling
    ///
    /// The host calls this from whatever platform connectivity events it
    /// has (the browser `online` and `visibilitychange` events, a network
    /// monitor on native).
    pub fn wake(&self) {
        self.shared.wake.notify_one();
    }

    /// Sends `RESYNC` over every connected data channel
    pub async fn broadcast_resync(&self) {
        mesh::broadcast(&self.shared, RESYNC_MESSAGE).await;
    }

    /// Number of currently tracked peers
    pub async fn peer_count(&self) -> usize {
        self.shared.peers.lock().await.len()
    }

    /// Number of peers whose data channel is open
    pub async fn connected_peer_count(&self) -> usize {
        self.shared
            .peers
            .lock()
            .await
            .values()
            .filter(|handle| handle.connected.load(std::sync::atomic::Ordering::SeqCst))
            .count()
    }

    /// Stops the loops and destroys every peer; idempotent
    pub async fn close(&self) {
        if self.shared.cancel.is_cancelled() {
            return;
        }
        self.shared.cancel.cancel();

        let mut peers = self.shared.peers.lock().await;
        for (remote, handle) in peers.drain() {
            handle.channel.close().await;
            handle.task.abort();
            debug!(peer = %remote, "Destroyed peer");
        }
        info!(session = %self.shared.session_id, "Signaling closed");
    }
}

/// The adaptive poll loop
///
/// The step counter climbs on empty polls and resets on a non-empty batch
/// or an external wake; it never resets just because time passed.
async fn poll_loop(shared: Arc<Shared>) {
    let mut backoff = PollBackoff::new();

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = shared.wake.notified() => {
                backoff.reset();
                continue;
            }
            _ = tokio::time::sleep(backoff.current_delay()) => {}
        }

        match poll_once(&shared).await {
            Ok(fresh) if fresh > 0 => backoff.reset(),
            Ok(_) => backoff.advance(),
            Err(err) => {
                warn!(error = %err, "Signaling poll failed");
                backoff.advance();
            }
        }
    }
    debug!("Poll loop stopped");
}

/// Lists the signaling folder and dispatches unseen messages oldest-first
///
/// Returns the number of freshly dispatched messages.
async fn poll_once(shared: &Arc<Shared>) -> Result<usize, ReplicationError> {
    let listed = shared
        .store
        .list_folder(
            &shared.structure.signaling_folder_id,
            &ListQuery::any(),
            ListOrder::CreatedDesc,
            Some(shared.options.poll_limit),
        )
        .await?;

    let mut fresh = 0;
    for meta in listed.into_iter().rev() {
        let Some(message) = SignalMessage::parse_file_name(&meta.name) else {
            continue;
        };

        {
            let mut processed = shared.processed.lock().await;
            if !processed.insert(message.message_id.clone()) {
                continue;
            }
        }
        if message.sender == shared.session_id {
            // Own echo
            continue;
        }

        let body = match shared.store.download_json(&meta.id).await {
            Ok(body) => body,
            Err(err) => {
                warn!(file = %meta.name, error = %err, "Failed to download signal message");
                continue;
            }
        };

        fresh += 1;
        if let Err(err) = dispatch(shared, message.sender, body).await {
            warn!(error = %err, "Failed to dispatch signal message");
        }
    }
    Ok(fresh)
}

/// Routes one message body to the peer mesh
async fn dispatch(
    shared: &Arc<Shared>,
    sender: SessionId,
    body: serde_json::Value,
) -> Result<(), ReplicationError> {
    if SignalMessage::is_beacon(&body) {
        mesh::ensure_peer(shared, sender).await?;
        return Ok(());
    }

    match SignalMessage::payload_receiver(&body) {
        Some(receiver) if receiver == shared.session_id => {
            let channel = mesh::ensure_peer(shared, sender).await?;
            if let Some(signal) = SignalMessage::payload_signal(&body) {
                channel.signal(signal.clone()).await?;
            }
            Ok(())
        }
        Some(_) => Ok(()), // addressed to another peer
        None => {
            debug!(sender = %sender, "Ignoring message without receiver");
            Ok(())
        }
    }
}

/// Periodic signal-file cleanup
async fn cleanup_loop(shared: Arc<Shared>) {
    let mut interval = tokio::time::interval(shared.options.cleanup_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; startup already cleaned.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = interval.tick() => gc::run_cleanup(&shared).await,
        }
    }
}
