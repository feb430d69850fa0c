//! Peer mesh lifecycle
//!
//! Peers are created lazily on the first message from an unknown sender.
//! The initiator tiebreak is deterministic: the side whose session ID is
//! lexicographically smaller initiates, so exactly one side of every pair
//! produces the offer. Each peer gets its own event-loop task that feeds
//! handshake payloads back into the signaling folder and dispatches data
//! frames.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use peersync_core::domain::{ReplicationError, SessionId, SignalMessage};
use peersync_core::ports::peer_transport::{IPeerChannel, PeerEvent};

use crate::{PeerHandle, Shared};

/// Data frame instructing peers to trigger a pull
pub const RESYNC_MESSAGE: &str = "RESYNC";

/// Data frame announcing a newly observed peer
pub const NEW_PEER_MESSAGE: &str = "NEW_PEER";

/// Writes a message file into the signaling folder
pub(crate) async fn send_message(shared: &Shared, body: &Value) -> Result<(), ReplicationError> {
    let name = SignalMessage::new(shared.session_id.clone()).file_name();
    shared
        .store
        .upload_multipart(&shared.structure.signaling_folder_id, &name, body)
        .await?;
    Ok(())
}

/// Returns the channel towards `remote`, creating the peer if unknown
///
/// Creating a peer also broadcasts `NEW_PEER` over every existing data
/// channel so the rest of the mesh drops back to fast polling.
pub(crate) async fn ensure_peer(
    shared: &Arc<Shared>,
    remote: SessionId,
) -> Result<Arc<dyn IPeerChannel>, ReplicationError> {
    let mut peers = shared.peers.lock().await;
    if let Some(handle) = peers.get(&remote) {
        return Ok(handle.channel.clone());
    }

    let initiator = remote.as_str() > shared.session_id.as_str();
    info!(peer = %remote, initiator, "Creating peer");

    broadcast_locked(&peers, NEW_PEER_MESSAGE).await;

    let (channel, events) = shared
        .connector
        .connect(&shared.session_id, &remote, initiator)
        .await?;
    let channel: Arc<dyn IPeerChannel> = Arc::from(channel);
    let connected = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let handle = PeerHandle {
        channel: channel.clone(),
        connected: connected.clone(),
        task: spawn_peer_task(shared.clone(), remote.clone(), events, connected),
    };
    peers.insert(remote, handle);
    Ok(channel)
}

/// Sends a data frame to every connected peer
pub(crate) async fn broadcast(shared: &Shared, text: &str) {
    let peers = shared.peers.lock().await;
    broadcast_locked(&peers, text).await;
}

async fn broadcast_locked(
    peers: &std::collections::HashMap<SessionId, PeerHandle>,
    text: &str,
) {
    for (remote, handle) in peers.iter() {
        if !handle.connected.load(Ordering::SeqCst) {
            continue;
        }
        if let Err(err) = handle.channel.send(text).await {
            warn!(peer = %remote, error = %err, message = text, "Broadcast send failed");
        }
    }
}

/// Event loop of one peer connection
fn spawn_peer_task(
    shared: Arc<Shared>,
    remote: SessionId,
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
    connected: Arc<std::sync::atomic::AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shared.cancel.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        PeerEvent::Signal(payload) => {
                            let body = SignalMessage::payload_body(&remote, payload);
                            if let Err(err) = send_message(&shared, &body).await {
                                warn!(peer = %remote, error = %err, "Failed to forward handshake payload");
                            }
                        }
                        PeerEvent::Connect => {
                            debug!(peer = %remote, "Peer connected");
                            connected.store(true, Ordering::SeqCst);
                            let _ = shared.resync_tx.send(());
                        }
                        PeerEvent::Data(text) => match text.as_str() {
                            RESYNC_MESSAGE => {
                                debug!(peer = %remote, "Resync requested");
                                let _ = shared.resync_tx.send(());
                            }
                            NEW_PEER_MESSAGE => {
                                debug!(peer = %remote, "New peer announced, resetting poll");
                                shared.wake.notify_one();
                            }
                            other => {
                                debug!(peer = %remote, message = other, "Ignoring unknown data frame");
                            }
                        },
                        PeerEvent::Error(err) => {
                            warn!(peer = %remote, error = %err, "Peer transport error");
                            let _ = shared.resync_tx.send(());
                        }
                        PeerEvent::Closed => {
                            debug!(peer = %remote, "Peer closed, evicting");
                            let _ = shared.resync_tx.send(());
                            shared.peers.lock().await.remove(&remote);
                            break;
                        }
                    }
                }
            }
        }
    })
}
