//! Domain layer - entities and value objects
//!
//! Contains the core replication entities and their invariants. Everything
//! in this module is plain data: no I/O, no async.

pub mod checkpoint;
pub mod document;
pub mod errors;
pub mod newtypes;
pub mod signal;
pub mod structure;
pub mod wal;

pub use checkpoint::ReplicationCheckpoint;
pub use document::{DocumentState, WriteRow};
pub use errors::ReplicationError;
pub use newtypes::{Etag, FileId, FolderId, ReplicationIdentifier, SessionId};
pub use signal::SignalMessage;
pub use structure::DriveStructure;
pub use wal::WalContents;
