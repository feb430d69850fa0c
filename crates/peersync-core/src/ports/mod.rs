//! Port definitions (traits for adapters)
//!
//! The replication core talks to the outside world through two ports: the
//! object store holding the shared folder, and the peer transport carrying
//! the WebRTC data channels. Adapters implement these; the core never
//! imports an adapter.

pub mod object_store;
pub mod peer_transport;

pub use object_store::{CreatedFile, FileMeta, IObjectStore, ListOrder, ListQuery};
pub use peer_transport::{IPeerChannel, IPeerConnector, PeerEvent};
