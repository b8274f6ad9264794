//! Log addressing: writer sets, log kinds and deterministic addresses
//!
//! Both participants must land on the same log without negotiating. The
//! address is therefore a pure function of `(name, kind, writers)` with the
//! writers sorted first:
//!
//! ```text
//! configure(A, B) ─┐
//!                  ├─▶ WriterSet [min(A,B), max(A,B)] ─▶ BLAKE3(name, kind, writers)
//! configure(B, A) ─┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ChatResult};
use crate::identity::Did;

/// Domain separator mixed into every address hash.
const ADDRESS_DOMAIN: &[u8] = b"talktime/log/v1";

/// The kind of log backing a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// Append-only feed whose entries can be hidden again with a tombstone
    #[default]
    Feed,
    /// Plain event log; history is permanent
    EventLog,
}

impl LogKind {
    /// Whether this kind has a removal primitive.
    pub fn supports_removal(&self) -> bool {
        matches!(self, LogKind::Feed)
    }

    fn tag(&self) -> &'static str {
        match self {
            LogKind::Feed => "feed",
            LogKind::EventLog => "eventlog",
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// The two identities authorized to append to a log, in canonical order.
///
/// Invariant: exactly two distinct DIDs, sorted lexicographically.
/// Serialized as a plain list; deserializing goes through [`WriterSet::from_list`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<Did>", into = "Vec<Did>")]
pub struct WriterSet {
    writers: [Did; 2],
}

impl WriterSet {
    /// Build the canonical writer set for a pair of participants.
    ///
    /// Argument order does not matter: `new(a, b) == new(b, a)`.
    pub fn new(a: Did, b: Did) -> ChatResult<Self> {
        if a == b {
            return Err(ChatError::InvalidWriterSet(format!(
                "both writers are {}",
                a
            )));
        }
        let writers = if a < b { [a, b] } else { [b, a] };
        Ok(Self { writers })
    }

    /// Build a writer set from an arbitrary list, which must hold exactly
    /// two distinct identities.
    pub fn from_list(writers: Vec<Did>) -> ChatResult<Self> {
        let count = writers.len();
        let mut iter = writers.into_iter();
        match (iter.next(), iter.next(), iter.next()) {
            (Some(a), Some(b), None) => Self::new(a, b),
            _ => Err(ChatError::InvalidWriterSet(format!(
                "expected 2 writers, got {}",
                count
            ))),
        }
    }

    /// Writers in canonical order.
    pub fn as_slice(&self) -> &[Did] {
        &self.writers
    }

    /// Whether `did` may append to the log.
    pub fn contains(&self, did: &Did) -> bool {
        self.writers.iter().any(|w| w == did)
    }

    /// The writer that is not `did`, if `did` is a member.
    pub fn other(&self, did: &Did) -> Option<&Did> {
        match &self.writers {
            [a, b] if a == did => Some(b),
            [a, b] if b == did => Some(a),
            _ => None,
        }
    }
}

impl TryFrom<Vec<Did>> for WriterSet {
    type Error = ChatError;

    fn try_from(writers: Vec<Did>) -> ChatResult<Self> {
        Self::from_list(writers)
    }
}

impl From<WriterSet> for Vec<Did> {
    fn from(set: WriterSet) -> Self {
        set.writers.into()
    }
}

/// Deterministic, content-derived address of a log.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogAddress([u8; 32]);

impl LogAddress {
    /// Derive the address for `(name, kind, writers)`.
    pub fn derive(name: &str, kind: LogKind, writers: &WriterSet) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(ADDRESS_DOMAIN);
        update_len_prefixed(&mut hasher, name.as_bytes());
        update_len_prefixed(&mut hasher, kind.tag().as_bytes());
        for writer in writers.as_slice() {
            update_len_prefixed(&mut hasher, writer.as_str().as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw address bytes (also used as the gossip topic id)
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Base58 representation, used as the storage key prefix
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }
}

fn update_len_prefixed(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u32).to_le_bytes());
    hasher.update(bytes);
}

impl fmt::Display for LogAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/talktime/{}", self.to_base58())
    }
}

impl fmt::Debug for LogAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogAddress({})", self.to_base58())
    }
}
