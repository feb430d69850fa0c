//! Peer transport port - the WebRTC capability seam
//!
//! WebRTC is treated as a capability provided by configuration, not a hard
//! import: browsers inject their native implementation, native hosts a
//! binding crate, tests the in-memory mesh from [`crate::memory`]. The
//! signaling component only sees these traits.

use serde_json::Value;
use tokio::sync::mpsc;

use crate::domain::errors::ReplicationError;
use crate::domain::newtypes::SessionId;

/// Events emitted by one peer connection
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// An opaque handshake payload that must reach the remote peer through
    /// the signaling channel
    Signal(Value),
    /// The data channel is open
    Connect,
    /// A text frame arrived on the data channel
    Data(String),
    /// The connection failed
    Error(String),
    /// The connection closed (locally or remotely)
    Closed,
}

/// Factory for peer connections
#[async_trait::async_trait]
pub trait IPeerConnector: Send + Sync {
    /// Creates a connection towards `remote`
    ///
    /// `initiator` decides which side produces the offer; callers derive it
    /// from the deterministic session-ID tiebreak. Events (including the
    /// offer, when initiating) arrive on the returned receiver.
    async fn connect(
        &self,
        local: &SessionId,
        remote: &SessionId,
        initiator: bool,
    ) -> Result<(Box<dyn IPeerChannel>, mpsc::UnboundedReceiver<PeerEvent>), ReplicationError>;
}

/// One live peer connection
#[async_trait::async_trait]
pub trait IPeerChannel: Send + Sync {
    /// Feeds a handshake payload received from the remote side
    async fn signal(&self, payload: Value) -> Result<(), ReplicationError>;

    /// Sends a text frame over the data channel
    async fn send(&self, text: &str) -> Result<(), ReplicationError>;

    /// Closes the connection; emits [`PeerEvent::Closed`] to both sides
    async fn close(&self);
}
