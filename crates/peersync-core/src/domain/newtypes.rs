//! Domain newtypes
//!
//! Strongly-typed wrappers for the opaque identifiers handed out by the
//! object store, plus the per-process session token and the stable
//! replication identifier.

use std::fmt::{self, Display, Formatter};

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Length of the per-process session token
const SESSION_ID_LEN: usize = 12;

// ============================================================================
// Opaque store identifiers
// ============================================================================

/// Opaque identifier for a file in the object store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    /// Wraps a store-assigned file ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FileId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier for a folder in the object store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FolderId(String);

impl FolderId {
    /// Wraps a store-assigned folder ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The store's root folder alias
    pub fn root() -> Self {
        Self("root".to_string())
    }

    /// Returns the inner ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FolderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned entity tag used for conditional writes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Etag(String);

impl Etag {
    /// Wraps a server-assigned etag
    pub fn new(etag: impl Into<String>) -> Self {
        Self(etag.into())
    }

    /// Returns the inner etag string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Etag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// SessionId
// ============================================================================

/// Random token identifying a peer for the lifetime of its process
///
/// Session IDs are compared lexicographically to pick the WebRTC initiator
/// deterministically, so ordering is part of the contract.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh random 12-character alphanumeric token
    pub fn random() -> Self {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SESSION_ID_LEN)
            .map(char::from)
            .collect();
        Self(token)
    }

    /// Wraps an existing token (e.g. parsed from a signal filename)
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the inner token string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ReplicationIdentifier
// ============================================================================

/// Stable identifier for one replication, derived from the folder path and
/// the primary-key field
///
/// The identifier survives process restarts, so caches keyed by it (the
/// drive structure, checkpoints held by the host) stay valid as long as the
/// configuration does not change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicationIdentifier(String);

impl ReplicationIdentifier {
    /// Derives the identifier from the folder path and primary-key field
    ///
    /// Uses FNV-1a over `"<folder_path>|<primary_key_field>"`, hex-encoded.
    pub fn derive(folder_path: &str, primary_key_field: &str) -> Self {
        const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const FNV_PRIME: u64 = 0x1000_0000_01b3;

        let mut hash = FNV_OFFSET;
        for byte in folder_path
            .as_bytes()
            .iter()
            .chain(b"|")
            .chain(primary_key_field.as_bytes())
        {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        Self(format!("{hash:016x}"))
    }

    /// Wraps a caller-provided identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner identifier string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ReplicationIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
