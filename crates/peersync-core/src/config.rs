//! Configuration for one replication
//!
//! Typed options mirroring what a host application passes when starting
//! the replication: the drive folder and credentials, the signaling knobs,
//! and the replication behavior flags. Validation happens once, up front;
//! everything downstream can rely on a well-formed configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::errors::ReplicationError;
use crate::domain::newtypes::ReplicationIdentifier;

/// Default API endpoint for the Google Drive REST surface
pub const DEFAULT_API_ENDPOINT: &str = "https://www.googleapis.com";

/// Default lease timeout for the file-based transaction
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Default maximum age of signal files before garbage collection
pub const DEFAULT_SIGNAL_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Default interval between signal-file cleanup passes
pub const DEFAULT_SIGNAL_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default listing limit for one signaling poll
pub const DEFAULT_SIGNAL_POLL_LIMIT: u32 = 1000;

/// Default bounded concurrency for document downloads and WAL applies
pub const DEFAULT_APPLY_CONCURRENCY: usize = 5;

/// Drive connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveOptions {
    /// OAuth client ID of the host application (token refresh is handled
    /// by the host; the core only consumes the resulting bearer token)
    pub oauth_client_id: String,
    /// Bearer token used for every API request
    pub auth_token: String,
    /// Folder path under the drive root, e.g. `/apps/notes`
    pub folder_path: String,
    /// API endpoint override, used by tests to point at a mock server
    pub api_endpoint: String,
    /// Lease timeout of the file-based transaction
    pub transaction_timeout: Duration,
}

impl DriveOptions {
    /// Creates drive options with the production endpoint and default timeout
    pub fn new(
        oauth_client_id: impl Into<String>,
        auth_token: impl Into<String>,
        folder_path: impl Into<String>,
    ) -> Self {
        Self {
            oauth_client_id: oauth_client_id.into(),
            auth_token: auth_token.into(),
            folder_path: folder_path.into(),
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
        }
    }
}

/// Signaling behavior settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingOptions {
    /// Maximum number of signal files fetched per poll
    pub poll_limit: u32,
    /// Signal files older than this are garbage collected
    pub max_message_age: Duration,
    /// Interval between cleanup passes
    pub cleanup_interval: Duration,
}

impl Default for SignalingOptions {
    fn default() -> Self {
        Self {
            poll_limit: DEFAULT_SIGNAL_POLL_LIMIT,
            max_message_age: DEFAULT_SIGNAL_MAX_AGE,
            cleanup_interval: DEFAULT_SIGNAL_CLEANUP_INTERVAL,
        }
    }
}

/// Top-level options for one replication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Stable replication identifier; derived from the folder path and
    /// primary-key field when absent
    pub replication_identifier: Option<ReplicationIdentifier>,
    /// Field of the document payload holding the primary key
    pub primary_key_field: String,
    /// Drive connection settings
    pub drive: DriveOptions,
    /// Signaling knobs
    pub signaling: SignalingOptions,
    /// Whether to keep replicating after the initial pass (live mode)
    pub live: bool,
    /// Whether a pull handler is configured; live signaling only runs when
    /// it is
    pub pull_enabled: bool,
    /// Whether a push handler is configured
    pub push_enabled: bool,
    /// Delay before the host retries after a surfaced error
    pub retry_time: Duration,
    /// Whether replication starts immediately
    pub auto_start: bool,
    /// Whether the host should gate startup on its leader-election
    /// primitive (one tab per browser profile runs the replication);
    /// consumed by the host, passed through untouched
    pub wait_for_leadership: bool,
    /// Page size for downstream pulls
    pub pull_batch_size: usize,
    /// Batch size for upstream pushes
    pub push_batch_size: usize,
    /// Bounded concurrency for document downloads and WAL applies
    pub apply_concurrency: usize,
}

impl SyncOptions {
    /// Creates options with the common defaults for the given drive settings
    pub fn new(primary_key_field: impl Into<String>, drive: DriveOptions) -> Self {
        Self {
            replication_identifier: None,
            primary_key_field: primary_key_field.into(),
            drive,
            signaling: SignalingOptions::default(),
            live: true,
            pull_enabled: true,
            push_enabled: true,
            retry_time: Duration::from_secs(5),
            auto_start: true,
            wait_for_leadership: true,
            pull_batch_size: 60,
            push_batch_size: 60,
            apply_concurrency: DEFAULT_APPLY_CONCURRENCY,
        }
    }

    /// Validates the options
    ///
    /// The folder path must point below the drive root: replicating into
    /// the root itself would make the layout files collide with user data
    /// and is refused.
    pub fn validate(&self) -> Result<(), ReplicationError> {
        let path = self.drive.folder_path.trim();
        if path.is_empty() || path == "/" || path == "root" {
            return Err(ReplicationError::InvalidRoot(
                self.drive.folder_path.clone(),
            ));
        }
        if self.primary_key_field.is_empty() {
            return Err(ReplicationError::InvalidRoot(
                "primary key field must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the configured or derived replication identifier
    pub fn replication_identifier(&self) -> ReplicationIdentifier {
        self.replication_identifier.clone().unwrap_or_else(|| {
            ReplicationIdentifier::derive(&self.drive.folder_path, &self.primary_key_field)
        })
    }

    /// Splits the folder path into its non-empty segments
    pub fn folder_segments(&self) -> Vec<&str> {
        self.drive
            .folder_path
            .split('/')
            .filter(|s| !s.is_empty())
            .collect()
    }
}
