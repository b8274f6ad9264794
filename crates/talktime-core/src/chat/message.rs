//! Display-ready chat messages
//!
//! A [`Message`] is derived from a log entry on every reconciliation pass
//! and never stored on its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::log::EntryHash;

/// Text shown in place of an entry whose payload is not a chat message.
pub const UNSUPPORTED_TEXT: &str = "*message unsupported";

/// Text shown for a message without a timestamp.
pub const UNKNOWN_TIME: &str = "unknown time";

/// Payload format version written by [`OutgoingMessage`].
pub const PAYLOAD_VERSION: u32 = 0;

/// Whether an entry could be read as a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Payload had a string `message` field
    Message,
    /// Anything else; rendered as a placeholder
    Unsupported,
}

/// A chat message ready for display.
///
/// # Example
///
/// ```ignore
/// let message = Message {
///     id: entry.hash,
///     kind: MessageKind::Message,
///     text: "hi".to_string(),
///     timestamp: Some(1705123456789),
///     is_mine: true,
///     removable: true,
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Hash of the entry this message was derived from
    pub id: EntryHash,
    /// Message or placeholder
    pub kind: MessageKind,
    /// Message text, or [`UNSUPPORTED_TEXT`]
    pub text: String,
    /// Unix timestamp in milliseconds, if the payload carried one
    pub timestamp: Option<i64>,
    /// Whether the local identity authored the entry
    pub is_mine: bool,
    /// Whether `ChatSession::remove(&id)` is available for this message
    pub removable: bool,
}

impl Message {
    /// Whether this message could be read.
    pub fn is_supported(&self) -> bool {
        self.kind == MessageKind::Message
    }

    /// Timestamp as `YYYY-MM-DD HH:MM` in UTC, or [`UNKNOWN_TIME`].
    pub fn display_time(&self) -> String {
        self.timestamp
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| UNKNOWN_TIME.to_string())
    }

    /// Format the timestamp relative to now.
    ///
    /// Returns strings like "Just now", "5m ago", "2h ago", "Yesterday".
    pub fn relative_time(&self) -> String {
        let Some(timestamp) = self.timestamp else {
            return UNKNOWN_TIME.to_string();
        };
        let now = Utc::now().timestamp_millis();
        let diff_secs = (now - timestamp) / 1000;

        if diff_secs < 60 {
            "Just now".to_string()
        } else if diff_secs < 3600 {
            format!("{}m ago", diff_secs / 60)
        } else if diff_secs < 86400 {
            format!("{}h ago", diff_secs / 3600)
        } else if diff_secs < 172800 {
            "Yesterday".to_string()
        } else {
            format!("{}d ago", diff_secs / 86400)
        }
    }
}

/// Payload appended for an outgoing chat message.
///
/// Serializes as `{"type":"message","message":..,"timestamp":..,"version":0}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Always `"message"`
    #[serde(rename = "type")]
    pub kind: String,
    /// Message text
    pub message: String,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    /// Payload format version
    pub version: u32,
}

impl OutgoingMessage {
    /// A message stamped with the current time.
    pub fn now(text: &str) -> Self {
        Self::at(text, Utc::now().timestamp_millis())
    }

    /// A message with an explicit timestamp.
    pub fn at(text: &str, timestamp: i64) -> Self {
        Self {
            kind: "message".to_string(),
            message: text.to_string(),
            timestamp,
            version: PAYLOAD_VERSION,
        }
    }

    /// JSON value to append to the log.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "type": self.kind,
            "message": self.message,
            "timestamp": self.timestamp,
            "version": self.version,
        })
    }
}
