//! Signal messages - the file-based signaling wire format
//!
//! The `signaling/` folder is an append-only log of small JSON files named
//! `<sessionId>_<timestampMillis>_<messageId>.json`. A message body is
//! either the presence beacon `{"i":"exist"}` or a targeted WebRTC
//! signaling payload `{"to": <sessionId>, "signal": <opaque>}`.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use super::newtypes::SessionId;

/// File extension of every signal message
const SIGNAL_EXT: &str = ".json";

/// A parsed signal message filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalMessage {
    /// Session token of the sending peer
    pub sender: SessionId,
    /// Client-side creation time embedded in the filename
    pub sent_at: DateTime<Utc>,
    /// Unique message ID, used for de-duplication
    pub message_id: String,
}

impl SignalMessage {
    /// Creates a fresh message envelope for the given sender
    pub fn new(sender: SessionId) -> Self {
        Self {
            sender,
            sent_at: Utc::now(),
            message_id: Uuid::new_v4().simple().to_string(),
        }
    }

    /// Formats the message filename
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}{}",
            self.sender.as_str(),
            self.sent_at.timestamp_millis(),
            self.message_id,
            SIGNAL_EXT
        )
    }

    /// Parses a signal filename back into its parts
    ///
    /// Returns `None` for files that do not follow the naming scheme;
    /// callers skip those rather than fail the poll.
    pub fn parse_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(SIGNAL_EXT)?;
        let mut parts = stem.splitn(3, '_');
        let sender = parts.next()?;
        let millis: i64 = parts.next()?.parse().ok()?;
        let message_id = parts.next()?;
        if sender.is_empty() || message_id.is_empty() {
            return None;
        }
        let sent_at = Utc.timestamp_millis_opt(millis).single()?;
        Some(Self {
            sender: SessionId::new(sender),
            sent_at,
            message_id: message_id.to_string(),
        })
    }

    /// The presence beacon body, sent once at startup
    pub fn beacon_body() -> Value {
        json!({"i": "exist"})
    }

    /// Returns true if the body is the presence beacon
    pub fn is_beacon(body: &Value) -> bool {
        body.get("i").and_then(Value::as_str) == Some("exist")
    }

    /// Wraps an opaque WebRTC payload addressed to one receiver
    pub fn payload_body(to: &SessionId, signal: Value) -> Value {
        json!({"to": to.as_str(), "signal": signal})
    }

    /// Extracts the receiver of a payload body, if any
    pub fn payload_receiver(body: &Value) -> Option<SessionId> {
        body.get("to").and_then(Value::as_str).map(SessionId::new)
    }

    /// Extracts the opaque payload of a payload body
    pub fn payload_signal(body: &Value) -> Option<&Value> {
        body.get("signal")
    }
}
