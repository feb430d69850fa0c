//! Replication orchestrator
//!
//! Assembles the pull and push primitives for the host replication engine,
//! owns the signaling lifecycle in live mode and forwards `RESYNC` nudges
//! into re-pulls. The orchestrator holds the [`DriveStructure`] for the
//! replication's lifetime; every component receives it by value.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use peersync_core::config::SyncOptions;
use peersync_core::domain::{
    DriveStructure, ReplicationCheckpoint, ReplicationError, SessionId, WriteRow,
};
use peersync_core::ports::object_store::IObjectStore;
use peersync_core::ports::peer_transport::IPeerConnector;
use peersync_drive::{init_drive_structure, DriveClient};
use peersync_signal::Signaling;

use crate::downstream::{DownstreamHandler, PullResult};
use crate::transaction::Transaction;
use crate::upstream::UpstreamHandler;

/// Capacity of the host-facing broadcast channels
const BROADCAST_CAPACITY: usize = 64;

/// One running replication
///
/// Created with [`DriveReplication::start`] (injected store, used by tests
/// and embedders) or [`DriveReplication::connect`] (builds a
/// [`DriveClient`] from the options).
pub struct DriveReplication {
    options: SyncOptions,
    store: Arc<dyn IObjectStore>,
    session_id: SessionId,
    structure: DriveStructure,
    transaction: Transaction,
    upstream: UpstreamHandler,
    downstream: DownstreamHandler,
    /// Cursor of the live re-pull loop
    checkpoint: Mutex<Option<ReplicationCheckpoint>>,
    /// Host-facing stream of pulled document batches
    pulled_tx: broadcast::Sender<PullResult>,
    /// Host-facing stream of durable errors
    error_tx: broadcast::Sender<Arc<ReplicationError>>,
    /// Live-mode signaling; absent in one-shot mode
    signaling: Mutex<Option<Signaling>>,
    initial_done_tx: watch::Sender<bool>,
    initial_done_rx: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl DriveReplication {
    /// Starts a replication over an injected object store
    pub async fn start(
        options: SyncOptions,
        store: Arc<dyn IObjectStore>,
        connector: Option<Arc<dyn IPeerConnector>>,
    ) -> Result<Arc<Self>, ReplicationError> {
        options.validate()?;
        let structure = init_drive_structure(store.as_ref(), &options).await?;
        let session_id = SessionId::random();

        let transaction = Transaction::new(
            store.clone(),
            structure.clone(),
            session_id.clone(),
            options.drive.transaction_timeout,
        );
        let upstream = UpstreamHandler::new(
            store.clone(),
            structure.clone(),
            options.primary_key_field.clone(),
            options.apply_concurrency,
        );
        let downstream =
            DownstreamHandler::new(store.clone(), structure.clone(), options.apply_concurrency);

        let (pulled_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (error_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (initial_done_tx, initial_done_rx) = watch::channel(false);

        let this = Arc::new(Self {
            store,
            session_id: session_id.clone(),
            structure,
            transaction,
            upstream,
            downstream,
            checkpoint: Mutex::new(None),
            pulled_tx,
            error_tx,
            signaling: Mutex::new(None),
            initial_done_tx,
            initial_done_rx,
            cancel: CancellationToken::new(),
            options,
        });

        if this.options.live && this.options.pull_enabled {
            if let Some(connector) = connector {
                let (signaling, resync_rx) = Signaling::start(
                    this.store.clone(),
                    this.structure.clone(),
                    session_id,
                    connector,
                    this.options.signaling.clone(),
                )
                .await?;
                *this.signaling.lock().await = Some(signaling);
                tokio::spawn(live_loop(this.clone(), resync_rx));
            }
        }

        if this.options.pull_enabled {
            let replication = this.clone();
            tokio::spawn(async move {
                replication.re_pull_until_drained().await;
                let _ = replication.initial_done_tx.send(true);
                debug!("Initial replication finished");
            });
        } else {
            let _ = this.initial_done_tx.send(true);
        }

        info!(
            replication = %this.structure.replication_identifier,
            session = %this.session_id,
            live = this.options.live,
            "Replication started"
        );
        Ok(this)
    }

    /// Starts a replication against the real Drive API
    pub async fn connect(
        options: SyncOptions,
        connector: Option<Arc<dyn IPeerConnector>>,
    ) -> Result<Arc<Self>, ReplicationError> {
        let client = DriveClient::with_api_endpoint(
            options.drive.auth_token.clone(),
            options.drive.api_endpoint.clone(),
        );
        Self::start(options, Arc::new(client), connector).await
    }

    /// The resolved folder layout
    pub fn structure(&self) -> &DriveStructure {
        &self.structure
    }

    /// This peer's session ID
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Pull handler: one checkpointed page inside the transaction
    ///
    /// Advances the internal cursor and publishes non-empty batches on the
    /// pulled-documents stream.
    pub async fn pull(&self) -> Result<PullResult, ReplicationError> {
        // The host engine single-flights its pulls; holding the cursor for
        // the whole page gives the internal re-pull loops the same
        // guarantee, so the checkpoint never moves backwards.
        let mut cursor = self.checkpoint.lock().await;
        let current = cursor.clone();
        let batch_size = self.options.pull_batch_size;
        let result = self
            .transaction
            .run(&self.upstream, || async {
                self.downstream
                    .fetch_changes(current.as_ref(), batch_size)
                    .await
            })
            .await?;

        if result.checkpoint.is_some() {
            *cursor = result.checkpoint.clone();
        }
        drop(cursor);

        if !result.documents.is_empty() {
            let _ = self.pulled_tx.send(result.clone());
        }
        Ok(result)
    }

    /// Push handler: conflict detection and WAL staging inside the
    /// transaction, `RESYNC` to the mesh after commit
    ///
    /// Returns the conflicting rows for the host's conflict resolver.
    pub async fn push(&self, rows: Vec<WriteRow>) -> Result<Vec<WriteRow>, ReplicationError> {
        let upstream = &self.upstream;
        let conflicts = self
            .transaction
            .run(upstream, move || async move {
                upstream.handle_upstream_batch(rows).await
            })
            .await?;

        // Outside the lock: nudge peers, unless a contender is already
        // waiting - it will observe the new state itself, and its own
        // commit will ping the mesh.
        if self.contender_waiting().await {
            debug!("Skipping RESYNC, a contender holds the blocker");
        } else {
            self.notify_peers().await;
        }

        // The push observed the folder at a point where foreign writes may
        // have landed since the last pull; fold them in right away.
        if self.options.live && self.options.pull_enabled {
            self.re_pull_until_drained().await;
        }
        Ok(conflicts)
    }

    /// Checks whether another peer wrote the blocker file within the
    /// transaction timeout
    async fn contender_waiting(&self) -> bool {
        let blocker = &self.structure.blocker_file_id;
        let meta = match self.store.file_meta(blocker).await {
            Ok(meta) => meta,
            Err(_) => return false,
        };
        let age = chrono::Utc::now().signed_duration_since(meta.modified_time);
        let timeout = chrono::Duration::from_std(self.options.drive.transaction_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        if age > timeout {
            return false;
        }

        match self.store.download_json(blocker).await {
            Ok(body) => {
                let requested_by = body.get("requestedBy").and_then(|v| v.as_str());
                requested_by.is_some() && requested_by != Some(self.session_id.as_str())
            }
            Err(_) => false,
        }
    }

    /// Sends a manual `RESYNC` to every connected peer
    pub async fn notify_peers(&self) {
        if let Some(signaling) = self.signaling.lock().await.as_ref() {
            signaling.broadcast_resync().await;
        }
    }

    /// Number of peers with an open data channel
    pub async fn connected_peers(&self) -> usize {
        match self.signaling.lock().await.as_ref() {
            Some(signaling) => signaling.connected_peer_count().await,
            None => 0,
        }
    }

    /// Pulls until a page comes back empty
    ///
    /// Transient errors are absorbed and retried on the configured retry
    /// cadence; durable errors surface on the error stream and end the
    /// pass.
    pub async fn re_pull_until_drained(&self) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            match self.pull().await {
                Ok(result) if result.documents.is_empty() => return,
                Ok(_) => continue,
                Err(err) if err.is_transient() => {
                    warn!(error = %err, "Transient pull failure, retrying");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(self.options.retry_time) => {}
                    }
                }
                Err(err) => {
                    warn!(error = %err, "Durable pull failure");
                    let _ = self.error_tx.send(Arc::new(err));
                    return;
                }
            }
        }
    }

    /// Stream of pulled document batches
    pub fn pulled_batches(&self) -> broadcast::Receiver<PullResult> {
        self.pulled_tx.subscribe()
    }

    /// Stream of durable errors
    pub fn errors(&self) -> broadcast::Receiver<Arc<ReplicationError>> {
        self.error_tx.subscribe()
    }

    /// Resolves once the first pull pass has drained
    pub async fn await_initial_replication(&self) {
        let mut rx = self.initial_done_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Stops the live machinery
    ///
    /// Closes signaling (destroying every peer and stopping the poll
    /// loop) and stops the re-pull loop. An in-flight transaction is not
    /// aborted; it either completes or its lease expires and another peer
    /// takes over.
    pub async fn cancel(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        if let Some(signaling) = self.signaling.lock().await.take() {
            signaling.close().await;
        }
        info!(session = %self.session_id, "Replication cancelled");
    }
}

/// Forwards resync nudges from the mesh into re-pulls
async fn live_loop(replication: Arc<DriveReplication>, mut resync_rx: mpsc::UnboundedReceiver<()>) {
    loop {
        tokio::select! {
            _ = replication.cancel.cancelled() => break,
            event = resync_rx.recv() => {
                if event.is_none() {
                    break;
                }
                // Coalesce bursts of nudges into one pull pass
                while resync_rx.try_recv().is_ok() {}
                replication.re_pull_until_drained().await;
            }
        }
    }
    debug!("Live loop stopped");
}
