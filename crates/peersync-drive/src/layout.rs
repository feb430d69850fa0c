//! Drive layout initialization
//!
//! Materializes the fixed folder hierarchy of one replication and caches
//! the opaque IDs in a [`DriveStructure`]. Initialization is idempotent
//! under concurrent peers: every ensure operation resolves creation races
//! to one winner, so two parallel invocations return byte-identical
//! structures.

use tracing::info;

use peersync_core::config::SyncOptions;
use peersync_core::domain::structure::{
    BLOCKER_FILE, DOCS_FOLDER, SIGNALING_FOLDER, TRANSACTION_FILE, WAL_FILE,
};
use peersync_core::domain::{DriveStructure, FolderId, ReplicationError};
use peersync_core::ports::object_store::IObjectStore;

/// Ensures the replication folder layout exists and returns its IDs
///
/// Layout under `folder_path/`:
/// - `docs/` and `signaling/` subfolders
/// - `transaction`, `blocker` and `wal` files (zero-byte or JSON)
///
/// Generic over the store port so the same initialization runs against
/// the real Drive client and the in-memory store.
pub async fn init_drive_structure(
    store: &(dyn IObjectStore),
    options: &SyncOptions,
) -> Result<DriveStructure, ReplicationError> {
    options.validate()?;

    let mut current = FolderId::root();
    for segment in options.folder_segments() {
        current = store.ensure_folder(&current, segment).await?;
    }
    let root_folder_id = current;

    let docs_folder_id = store.ensure_folder(&root_folder_id, DOCS_FOLDER).await?;
    let signaling_folder_id = store
        .ensure_folder(&root_folder_id, SIGNALING_FOLDER)
        .await?;

    let transaction = store
        .create_empty_file(&root_folder_id, TRANSACTION_FILE)
        .await?;
    let blocker = store.create_empty_file(&root_folder_id, BLOCKER_FILE).await?;
    let wal = store.create_empty_file(&root_folder_id, WAL_FILE).await?;

    let structure = DriveStructure {
        replication_identifier: options.replication_identifier(),
        root_folder_id,
        docs_folder_id,
        signaling_folder_id,
        transaction_file_id: transaction.id,
        blocker_file_id: blocker.id,
        wal_file_id: wal.id,
    };

    info!(
        replication = %structure.replication_identifier,
        root = %structure.root_folder_id,
        "Drive structure initialized"
    );
    Ok(structure)
}
