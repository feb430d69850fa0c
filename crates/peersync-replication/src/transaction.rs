//! File-based distributed mutex
//!
//! A single-writer lease built from two opaque files. The *transaction*
//! file carries the lease: its content names the holder, its
//! server-assigned modified-time is the lease start, and its etag guards
//! every transition through the store's per-file compare-and-set. The
//! *blocker* file announces a waiting contender.
//!
//! ## Protocol
//!
//! - **Acquire (try-once)**: read the transaction file; if it is blank or
//!   its lease is older than the timeout, conditionally overwrite it. A
//!   lost etag race means a contender won.
//! - **Acquire (blocking)**: write the blocker, try once, wait out the
//!   current lease, retry.
//! - **Commit**: conditionally blank the file. A lost race means the lease
//!   already expired and was reclaimed; the commit is silently a no-op and
//!   the next holder's apply phase finishes any staged WAL.
//!
//! At most one peer observes itself as holder at any instant; the store's
//! compare-and-set is the sole arbiter.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use peersync_core::domain::{DriveStructure, Etag, ReplicationError, SessionId};
use peersync_core::ports::object_store::IObjectStore;

use crate::upstream::UpstreamHandler;

/// Extra slack added when waiting out a foreign lease, covering clock
/// skew between the store and this peer
const TAKEOVER_SLACK: Duration = Duration::from_millis(25);

/// Floor for the contention wait so losers never busy-loop
const MIN_WAIT: Duration = Duration::from_millis(10);

/// Proof of holding the lock
///
/// Carries the etag written at acquisition; commit succeeds only while
/// that etag is still current.
#[derive(Debug, Clone)]
pub struct TransactionHandle {
    /// Etag of this holder's lease write
    pub etag: Etag,
    /// Local acquisition time
    pub acquired_at: DateTime<Utc>,
}

/// Result of a non-blocking acquisition attempt
#[derive(Debug)]
pub enum TryLockOutcome {
    /// The caller holds the lock
    Acquired(TransactionHandle),
    /// Another peer holds an unexpired lease
    Blocked {
        /// Server-assigned start of the current lease
        lease_started_at: DateTime<Utc>,
    },
}

/// The file-based mutex of one replication
pub struct Transaction {
    store: Arc<dyn IObjectStore>,
    structure: DriveStructure,
    session_id: SessionId,
    timeout: Duration,
}

impl Transaction {
    /// Creates the mutex over an initialized drive structure
    pub fn new(
        store: Arc<dyn IObjectStore>,
        structure: DriveStructure,
        session_id: SessionId,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            structure,
            session_id,
            timeout,
        }
    }

    fn timeout_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.timeout).unwrap_or_else(|_| chrono::Duration::seconds(60))
    }

    /// Attempts to acquire the lock without waiting
    pub async fn try_acquire(&self) -> Result<TryLockOutcome, ReplicationError> {
        let tx = &self.structure.transaction_file_id;
        let meta = self.store.file_meta(tx).await?;
        let content = self.store.download_json(tx).await?;

        let free = content.is_null();
        let lease_age = Utc::now().signed_duration_since(meta.modified_time);
        let expired = !free && lease_age > self.timeout_chrono();

        if !free && !expired {
            return Ok(TryLockOutcome::Blocked {
                lease_started_at: meta.modified_time,
            });
        }
        if expired {
            // The previous holder is dead or stalled; whoever wins the
            // conditional write below takes over.
            info!(
                session = %self.session_id,
                lease_age_ms = lease_age.num_milliseconds(),
                "Found expired lease, attempting takeover"
            );
        }

        let lease = json!({
            "holder": self.session_id.as_str(),
            "startedAt": Utc::now().to_rfc3339(),
        });
        match self
            .store
            .conditional_fill_if_etag(tx, &meta.etag, &lease)
            .await
        {
            Ok(etag) => {
                debug!(session = %self.session_id, "Acquired transaction");
                Ok(TryLockOutcome::Acquired(TransactionHandle {
                    etag,
                    acquired_at: Utc::now(),
                }))
            }
            Err(ReplicationError::EtagMismatch) => {
                // A contender raced and won; its lease starts about now.
                debug!(session = %self.session_id, "Lost acquisition race");
                Ok(TryLockOutcome::Blocked {
                    lease_started_at: Utc::now(),
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Writes the blocker file to announce a waiting contender
    ///
    /// A fresh blocker makes the current holder skip its early `RESYNC`
    /// and forces other contenders to re-read state before acting.
    async fn announce_intent(&self) -> Result<(), ReplicationError> {
        let body = json!({
            "requestedBy": self.session_id.as_str(),
            "at": Utc::now().to_rfc3339(),
        });
        self.store
            .patch_media(&self.structure.blocker_file_id, &body)
            .await
    }

    /// Acquires the lock, waiting out foreign leases
    pub async fn acquire(&self) -> Result<TransactionHandle, ReplicationError> {
        loop {
            self.announce_intent().await?;
            match self.try_acquire().await? {
                TryLockOutcome::Acquired(handle) => return Ok(handle),
                TryLockOutcome::Blocked { lease_started_at } => {
                    let expires_at = lease_started_at + self.timeout_chrono();
                    let wait = expires_at
                        .signed_duration_since(Utc::now())
                        .to_std()
                        .unwrap_or(Duration::ZERO)
                        .max(MIN_WAIT)
                        + TAKEOVER_SLACK;
                    debug!(
                        session = %self.session_id,
                        wait_ms = wait.as_millis() as u64,
                        "Blocked, waiting for lease expiry"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Releases the lock by conditionally blanking the transaction file
    ///
    /// When this holder's lease expired and another peer took over, the
    /// etag no longer matches and the commit is silently a no-op; the new
    /// holder's apply phase finishes whatever this holder staged.
    pub async fn commit(&self, handle: TransactionHandle) -> Result<(), ReplicationError> {
        match self
            .store
            .conditional_fill_if_etag(
                &self.structure.transaction_file_id,
                &handle.etag,
                &Value::Null,
            )
            .await
        {
            Ok(_) => {
                debug!(session = %self.session_id, "Committed transaction");
                Ok(())
            }
            Err(ReplicationError::EtagMismatch) => {
                warn!(
                    session = %self.session_id,
                    "Lease was reclaimed before commit; another peer holds the lock"
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Runs `body` inside the lock
    ///
    /// Acquires, drains any WAL a crashed holder left behind, runs the
    /// body, drains the WAL the body may have staged, commits. A body
    /// error still commits (the staged WAL then belongs to the next
    /// holder) and propagates afterwards.
    pub async fn run<T, F, Fut>(
        &self,
        wal: &UpstreamHandler,
        body: F,
    ) -> Result<T, ReplicationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ReplicationError>>,
    {
        let handle = self.acquire().await?;

        if let Err(err) = wal.process_wal_file().await {
            self.commit(handle).await?;
            return Err(err);
        }

        match body().await {
            Ok(value) => {
                if let Err(err) = wal.process_wal_file().await {
                    self.commit(handle).await?;
                    return Err(err);
                }
                self.commit(handle).await?;
                Ok(value)
            }
            Err(err) => {
                self.commit(handle).await?;
                Err(err)
            }
        }
    }

    /// Session ID of this peer
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Configured lease timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
