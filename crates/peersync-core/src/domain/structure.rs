//! Drive structure - the cached folder layout of one replication
//!
//! The layout under the configured folder is fixed: `docs/` and
//! `signaling/` subfolders plus three files (`transaction`, `blocker`,
//! `wal`). The structure is resolved once at startup and then passed by
//! value; components never re-resolve or cache their own copy.

use serde::{Deserialize, Serialize};

use super::newtypes::{FileId, FolderId, ReplicationIdentifier};

/// Name of the transaction (lock holder) file
pub const TRANSACTION_FILE: &str = "transaction";

/// Name of the blocker (lock intent) file
pub const BLOCKER_FILE: &str = "blocker";

/// Name of the write-ahead log file
pub const WAL_FILE: &str = "wal";

/// Name of the document subfolder
pub const DOCS_FOLDER: &str = "docs";

/// Name of the signaling subfolder
pub const SIGNALING_FOLDER: &str = "signaling";

/// Immutable record of the opaque IDs making up one replication's layout
///
/// Two peers that initialize the same folder path concurrently must end up
/// holding byte-identical `DriveStructure` values; the ensure operations of
/// the object store guarantee this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveStructure {
    /// Stable identifier for this replication
    pub replication_identifier: ReplicationIdentifier,
    /// The configured folder itself
    pub root_folder_id: FolderId,
    /// `docs/` subfolder holding one JSON file per document
    pub docs_folder_id: FolderId,
    /// `signaling/` subfolder holding the signal message log
    pub signaling_folder_id: FolderId,
    /// Lock holder file
    pub transaction_file_id: FileId,
    /// Lock intent file
    pub blocker_file_id: FileId,
    /// Write-ahead log file
    pub wal_file_id: FileId,
}
