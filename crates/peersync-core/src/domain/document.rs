//! Document state and upstream write rows
//!
//! A document is materialized as exactly one JSON file under `docs/`,
//! named `<primaryKey>.json`. The payload always carries a tombstone
//! marker (`_deleted`) and an attachments map (`_attachments`), both
//! present even when empty.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tombstone marker field
pub const DELETED_FIELD: &str = "_deleted";

/// Attachments map field
pub const ATTACHMENTS_FIELD: &str = "_attachments";

/// Fields excluded from conflict comparison
///
/// Attachments and per-database bookkeeping are host-managed and must not
/// produce false conflicts. The tombstone marker stays: a deletion is real
/// document state.
const NON_CANONICAL_FIELDS: [&str; 3] = [ATTACHMENTS_FIELD, "_meta", "_rev"];

/// File extension of every document file
const DOC_EXT: &str = ".json";

/// Builds the document filename for a primary key
///
/// The mapping must stay invertible so checkpoint entries (which store
/// primary keys) keep matching listed filenames; no characters are
/// rewritten.
pub fn doc_file_name(primary_key: &str) -> String {
    format!("{primary_key}{DOC_EXT}")
}

/// Recovers the primary key from a document filename
pub fn primary_key_of_file(name: &str) -> Option<&str> {
    name.strip_suffix(DOC_EXT).filter(|pk| !pk.is_empty())
}

// ============================================================================
// DocumentState
// ============================================================================

/// The JSON payload of one document file
///
/// Wraps a `serde_json` object map. `serde_json`'s map is ordered by key,
/// so two semantically equal payloads serialize identically regardless of
/// the insertion order on the writing peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct DocumentState(pub Map<String, Value>);

impl DocumentState {
    /// Builds a document state from a JSON value
    ///
    /// Returns `None` if the value is not an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Returns the value of the primary-key field as a string
    pub fn primary_key(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Returns true if the tombstone marker is set
    pub fn is_deleted(&self) -> bool {
        self.0
            .get(DELETED_FIELD)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Returns the payload as it is written to the document file
    ///
    /// Ensures `_deleted` and `_attachments` are present even when the
    /// caller omitted them.
    pub fn to_file_value(&self) -> Value {
        let mut map = self.0.clone();
        map.entry(DELETED_FIELD.to_string())
            .or_insert(Value::Bool(false));
        map.entry(ATTACHMENTS_FIELD.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        Value::Object(map)
    }

    /// Canonical form used for conflict comparison
    ///
    /// Strips attachment and bookkeeping fields and normalizes an explicit
    /// `_deleted: false` to the marker's absence; a live document compares
    /// equal whether or not the writer spelled the tombstone out.
    fn canonical(&self) -> Map<String, Value> {
        let mut map = self.0.clone();
        for field in NON_CANONICAL_FIELDS {
            map.remove(field);
        }
        if map.get(DELETED_FIELD) == Some(&Value::Bool(false)) {
            map.remove(DELETED_FIELD);
        }
        map
    }

    /// Deep equality modulo attachments and bookkeeping fields
    pub fn canonical_eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

// ============================================================================
// WriteRow
// ============================================================================

/// One upstream write: the new document state plus the master state the
/// writer assumed when it produced the write
///
/// A row without an `assumed_master_state` claims the document is new on
/// the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteRow {
    /// The state this write wants to establish
    pub new_document_state: DocumentState,
    /// The master state the writer last saw (absent for inserts)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assumed_master_state: Option<DocumentState>,
}

impl WriteRow {
    /// Convenience constructor for an insert row
    pub fn insert(new_document_state: DocumentState) -> Self {
        Self {
            new_document_state,
            assumed_master_state: None,
        }
    }

    /// Convenience constructor for an update row
    pub fn update(new_document_state: DocumentState, assumed: DocumentState) -> Self {
        Self {
            new_document_state,
            assumed_master_state: Some(assumed),
        }
    }
}
