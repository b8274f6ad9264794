//! Mutation events emitted by a log session
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │  LogEvent                                          │
//! │  ├── Write: the local node appended an entry       │
//! │  ├── Replicated: entries arrived from a peer       │
//! │  └── Lagged: a listener missed some events         │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! Events are delivered through a `tokio::sync::broadcast` channel. A slow
//! consumer may see `RecvError::Lagged`; since every event only means "the
//! log changed, re-read it", lagging is handled like any other mutation.

use crate::log::EntryHash;

/// A change to a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// The local node appended an entry
    Write {
        /// Hash of the appended entry
        hash: EntryHash,
    },
    /// Entries written by a peer were merged into the local replica
    Replicated {
        /// Hashes of the newly merged entries
        hashes: Vec<EntryHash>,
    },
    /// Synthesized for a listener that fell behind the channel; some
    /// changes happened but their details were dropped
    Lagged {
        /// Number of events skipped
        missed: u64,
    },
}

impl LogEvent {
    /// Hashes of the entries this event is about
    pub fn hashes(&self) -> Vec<EntryHash> {
        match self {
            LogEvent::Write { hash } => vec![*hash],
            LogEvent::Replicated { hashes } => hashes.clone(),
            LogEvent::Lagged { .. } => Vec::new(),
        }
    }

    /// Whether the change originated on this node
    pub fn is_local(&self) -> bool {
        matches!(self, LogEvent::Write { .. })
    }
}
