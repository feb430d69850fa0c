//! Write-ahead log file contents
//!
//! The WAL is a single JSON file with three states:
//! - *empty* - no `rows` field (or a JSON `null` body)
//! - *staged* - `rows` present, not yet applied to document files
//! - *drained* - reset to empty after apply
//!
//! The staged → drained transition is idempotent and restartable: a crash
//! between staging and draining leaves the rows in place for the next
//! transaction holder to replay.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::document::WriteRow;

/// Contents of the write-ahead log file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WalContents {
    /// Staged rows; absent when the WAL is empty or drained
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<WriteRow>>,
}

impl WalContents {
    /// Parses the WAL file body
    ///
    /// A zero-byte file downloads as JSON `null`, which is the empty state.
    pub fn from_file_value(value: Value) -> Result<Self, serde_json::Error> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value)
    }

    /// Builds a staged WAL from a batch of rows
    pub fn staged(rows: Vec<WriteRow>) -> Self {
        Self { rows: Some(rows) }
    }

    /// Returns true when no rows are staged
    pub fn is_empty(&self) -> bool {
        self.rows.as_ref().map_or(true, Vec::is_empty)
    }
}
