//! Replication error types
//!
//! This module defines the typed errors surfaced by the replication core.
//! Transient kinds (rate limiting, etag races, peer failures) are absorbed
//! internally; durable kinds (path rejection, staging misuse, unclassified
//! HTTP failures) propagate to the host.

use thiserror::Error;

/// Errors that can occur during replication
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// The configured folder path is empty or points at the drive root
    #[error("Invalid replication folder path: {0:?}")]
    InvalidRoot(String),

    /// HTTP 429/5xx survived every retry attempt
    #[error("Rate limited after {attempts} attempts (last status {status})")]
    RateLimited {
        /// Last HTTP status observed
        status: u16,
        /// Number of attempts made before giving up
        attempts: u32,
    },

    /// A conditional write lost the compare-and-set race on the stored etag
    ///
    /// This is a normal signal inside the transaction protocol and is never
    /// surfaced to the replication caller.
    #[error("Conditional write failed: stored etag no longer matches")]
    EtagMismatch,

    /// An attempt was made to stage rows into a WAL that still holds rows
    ///
    /// The WAL must be drained before staging; hitting this indicates a
    /// programming error in the caller.
    #[error("Write-ahead log is not drained")]
    WalNotDrained,

    /// Non-2xx HTTP response with no retry classification
    #[error("Request failed with status {status}: {body}")]
    Fetch {
        /// HTTP status code
        status: u16,
        /// Response body, as returned by the server
        body: String,
    },

    /// A contender found the current lease expired
    ///
    /// Handled silently by the takeover path; never surfaced.
    #[error("Transaction lease held by another peer has timed out")]
    TransactionTimedOut,

    /// An upstream row's document lacks the configured primary-key field
    #[error("Document is missing the primary key field {0:?}")]
    MissingPrimaryKey(String),

    /// WebRTC transport failure; the peer is evicted and polling resumes
    #[error("Peer transport error: {0}")]
    Peer(String),

    /// A payload could not be serialized or parsed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport-level HTTP error (connection, DNS, timeout)
    #[error("HTTP transport error: {0}")]
    Http(String),
}

impl ReplicationError {
    /// Returns true for errors that are absorbed inside the core and retried
    /// or recovered from without involving the host.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::EtagMismatch
                | Self::TransactionTimedOut
                | Self::Peer(_)
        )
    }
}
