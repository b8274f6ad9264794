//! Pure derivation of messages from log entries
//!
//! `reconcile` is total and referentially transparent: the same entries,
//! identity and removal capability always produce the same messages. It is
//! re-run from scratch on every log mutation.

use std::collections::HashSet;

use super::message::{Message, MessageKind, UNSUPPORTED_TEXT};
use crate::identity::Did;
use crate::log::LogEntry;

/// Turn a single entry into a message.
///
/// Returns `None` for tombstones. A payload that is not a JSON object with
/// a string `message` field yields an [`MessageKind::Unsupported`] message
/// rather than an error. `is_mine` comes from the signed entry author only;
/// nothing in the payload can influence it.
pub fn entry_to_message(entry: &LogEntry, me: &Did, removable: bool) -> Option<Message> {
    let raw = entry.value()?;
    let payload: Option<serde_json::Value> = serde_json::from_str(raw).ok();
    let object = payload.as_ref().and_then(|v| v.as_object());

    let text = object
        .and_then(|o| o.get("message"))
        .and_then(|m| m.as_str());
    let timestamp = object
        .and_then(|o| o.get("timestamp"))
        .and_then(numeric_timestamp);

    let (kind, text) = match text {
        Some(text) => (MessageKind::Message, text.to_string()),
        None => (MessageKind::Unsupported, UNSUPPORTED_TEXT.to_string()),
    };

    Some(Message {
        id: entry.hash,
        kind,
        text,
        timestamp,
        is_mine: &entry.author == me,
        removable,
    })
}

/// Integers are taken as-is; finite floats are truncated toward zero.
fn numeric_timestamp(value: &serde_json::Value) -> Option<i64> {
    if let Some(ms) = value.as_i64() {
        return Some(ms);
    }
    value
        .as_f64()
        .filter(|ms| ms.is_finite() && *ms >= i64::MIN as f64 && *ms <= i64::MAX as f64)
        .map(|ms| ms as i64)
}

/// Derive the message sequence for `entries`, viewed by `me`.
///
/// Order follows `entries` (the log's linearization, oldest first). Entries
/// with an already seen hash are collapsed into the first occurrence.
pub fn reconcile(entries: &[LogEntry], me: &Did, removable: bool) -> Vec<Message> {
    let mut seen = HashSet::with_capacity(entries.len());
    entries
        .iter()
        .filter(|entry| seen.insert(entry.hash))
        .filter_map(|entry| entry_to_message(entry, me, removable))
        .collect()
}
