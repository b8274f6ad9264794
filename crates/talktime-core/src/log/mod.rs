//! Replicated append-only logs
//!
//! A conversation lives in one log shared by exactly two writers. Each
//! replica holds the entries it knows about in a [`LogIndex`]; the
//! replicator exchanges entries with the peer's replica over a
//! [`Transport`](crate::sync::Transport) until both hold the same set.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  LogSession (one per conversation)                              │
//! │  ├── open(name, writers, kind, meta) ─▶ LogHandle               │
//! │  ├── append / remove ─▶ signed LogEntry ─▶ index + storage      │
//! │  ├── collect(since) ─▶ entries in linear order                  │
//! │  └── subscribe / on_mutation ─▶ LogEvent stream                 │
//! │                                                                 │
//! │  Replicator task                                                │
//! │  ├── announces heads periodically                               │
//! │  ├── answers sync requests with entry batches                   │
//! │  └── verifies and merges remote entries                         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod address;
mod entry;
mod index;
mod replicator;
mod session;

pub use address::{LogAddress, LogKind, WriterSet};
pub use entry::{EntryHash, LogEntry, Operation};
pub use index::{InsertOutcome, LogIndex};
pub use session::{LogSession, MutationListener};

use serde::{Deserialize, Serialize};

/// Description of an opened log, also persisted as its manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogHandle {
    /// Deterministic address derived from name, kind and writers
    pub address: LogAddress,
    /// Log name
    pub name: String,
    /// Log kind
    pub kind: LogKind,
    /// Authorized writers
    pub writers: WriterSet,
    /// Free-form metadata; not part of the address
    pub meta: serde_json::Value,
}

impl LogHandle {
    /// Describe a log, deriving its address.
    pub fn new(name: &str, kind: LogKind, writers: WriterSet, meta: serde_json::Value) -> Self {
        Self {
            address: LogAddress::derive(name, kind, &writers),
            name: name.to_string(),
            kind,
            writers,
            meta,
        }
    }
}
