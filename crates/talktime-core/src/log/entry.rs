//! Signed log entries
//!
//! An entry is content-addressed: its hash is the BLAKE3 digest of the
//! postcard encoding of every field except the hash and signature. The
//! author signs the hash with their Ed25519 key, so any peer can check that
//! an entry came from the writer it claims to come from.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ address │ author │ author_key │ clock │ next │ payload │ ──BLAKE3──▶ hash ──Ed25519──▶ signature
//! └──────────────────────────────────────────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::address::LogAddress;
use crate::error::{ChatError, ChatResult};
use crate::identity::{verify_signature, Did, LocalIdentity};

/// Content hash identifying a log entry.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryHash([u8; 32]);

impl EntryHash {
    /// Wrap raw hash bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw hash bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from 64 hex characters.
    pub fn from_hex(s: &str) -> ChatResult<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| ChatError::Serialization(format!("invalid entry hash {:?}: {}", s, e)))?;
        Ok(Self(bytes))
    }

    /// First 8 hex characters, for logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for EntryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for EntryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryHash({})", self.short())
    }
}

// Hex in human-readable formats (JSON handed to the UI), raw bytes on the wire.
impl Serialize for EntryHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for EntryHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            EntryHash::from_hex(&s).map_err(serde::de::Error::custom)
        } else {
            <[u8; 32]>::deserialize(deserializer).map(EntryHash)
        }
    }
}

/// What an entry does to the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Append a value. The value is kept as JSON text so that entries from
    /// newer peers with unknown shapes still hash and verify.
    Add { value: String },
    /// Tombstone: hide the target entry from collections (feeds only)
    Del { target: EntryHash },
}

/// A signed, content-addressed entry of a replicated log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Content hash, see module docs
    pub hash: EntryHash,
    /// Log this entry belongs to
    pub address: LogAddress,
    /// DID of the writer
    pub author: Did,
    /// Writer's Ed25519 public key; must hash to `author`
    pub author_key: [u8; 32],
    /// Lamport clock, one past the highest clock the author had seen
    pub clock: u64,
    /// Heads of the log at the time of writing
    pub next: Vec<EntryHash>,
    /// The operation itself
    pub payload: Operation,
    /// Author's signature over `hash`
    pub signature: Vec<u8>,
}

/// Borrowed view of the hashed fields.
#[derive(Serialize)]
struct HashedFields<'a> {
    address: &'a LogAddress,
    author: &'a Did,
    author_key: &'a [u8; 32],
    clock: u64,
    next: &'a [EntryHash],
    payload: &'a Operation,
}

fn content_hash(fields: &HashedFields<'_>) -> ChatResult<EntryHash> {
    let bytes = postcard::to_allocvec(fields)?;
    Ok(EntryHash(*blake3::hash(&bytes).as_bytes()))
}

impl LogEntry {
    /// Create and sign a new entry authored by `identity`.
    pub fn create(
        identity: &LocalIdentity,
        address: LogAddress,
        clock: u64,
        next: Vec<EntryHash>,
        payload: Operation,
    ) -> ChatResult<Self> {
        let author = identity.did().clone();
        let author_key = identity.public_key();
        let hash = content_hash(&HashedFields {
            address: &address,
            author: &author,
            author_key: &author_key,
            clock,
            next: &next,
            payload: &payload,
        })?;
        let signature = identity.sign(hash.as_bytes());

        Ok(Self {
            hash,
            address,
            author,
            author_key,
            clock,
            next,
            payload,
            signature,
        })
    }

    /// Recompute the content hash from the entry's fields.
    pub fn compute_hash(&self) -> ChatResult<EntryHash> {
        content_hash(&HashedFields {
            address: &self.address,
            author: &self.author,
            author_key: &self.author_key,
            clock: self.clock,
            next: &self.next,
            payload: &self.payload,
        })
    }

    /// Check the entry is self-consistent: hash matches content, the key
    /// belongs to the claimed author, and the signature is valid.
    ///
    /// Writer-set membership is checked by the log, not here.
    pub fn verify(&self) -> ChatResult<()> {
        if self.compute_hash()? != self.hash {
            return Err(ChatError::WriteRejected(format!(
                "entry {} hash does not match its content",
                self.hash.short()
            )));
        }
        if Did::from_key_bytes(&self.author_key) != self.author {
            return Err(ChatError::WriteRejected(format!(
                "entry {} key does not belong to {}",
                self.hash.short(),
                self.author
            )));
        }
        if !verify_signature(&self.author_key, self.hash.as_bytes(), &self.signature) {
            return Err(ChatError::WriteRejected(format!(
                "entry {} has an invalid signature",
                self.hash.short()
            )));
        }
        Ok(())
    }

    /// The appended JSON text, if this is an `Add`.
    pub fn value(&self) -> Option<&str> {
        match &self.payload {
            Operation::Add { value } => Some(value),
            Operation::Del { .. } => None,
        }
    }

    /// Whether this entry is a tombstone.
    pub fn is_removal(&self) -> bool {
        matches!(self.payload, Operation::Del { .. })
    }

    /// Serialize for storage
    pub fn encode(&self) -> ChatResult<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Deserialize from storage
    pub fn decode(bytes: &[u8]) -> ChatResult<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{LogKind, WriterSet};

    fn address_for(a: &LocalIdentity, b: &LocalIdentity) -> LogAddress {
        let writers = WriterSet::new(a.did().clone(), b.did().clone()).unwrap();
        LogAddress::derive("talktime", LogKind::Feed, &writers)
    }

    fn add(value: &str) -> Operation {
        Operation::Add {
            value: value.to_string(),
        }
    }

    #[test]
    fn test_created_entry_verifies() {
        let alice = LocalIdentity::generate();
        let bob = LocalIdentity::generate();
        let entry = LogEntry::create(&alice, address_for(&alice, &bob), 1, vec![], add("{}")).unwrap();

        assert!(entry.verify().is_ok());
        assert_eq!(&entry.author, alice.did());
        assert_eq!(entry.value(), Some("{}"));
        assert!(!entry.is_removal());
    }

    #[test]
    fn test_tampered_payload_fails_verification() {
        let alice = LocalIdentity::generate();
        let bob = LocalIdentity::generate();
        let mut entry =
            LogEntry::create(&alice, address_for(&alice, &bob), 1, vec![], add("\"hi\"")).unwrap();

        entry.payload = add("\"bye\"");
        assert!(matches!(entry.verify(), Err(ChatError::WriteRejected(_))));
    }

    #[test]
    fn test_forged_author_fails_verification() {
        let alice = LocalIdentity::generate();
        let bob = LocalIdentity::generate();
        let mut entry =
            LogEntry::create(&alice, address_for(&alice, &bob), 1, vec![], add("1")).unwrap();

        // Claim Bob wrote it and fix up the hash
        entry.author = bob.did().clone();
        entry.hash = entry.compute_hash().unwrap();
        assert!(entry.verify().is_err());
    }

    #[test]
    fn test_resigned_by_other_key_fails_verification() {
        let alice = LocalIdentity::generate();
        let bob = LocalIdentity::generate();
        let mut entry =
            LogEntry::create(&alice, address_for(&alice, &bob), 1, vec![], add("1")).unwrap();

        entry.signature = bob.sign(entry.hash.as_bytes());
        assert!(entry.verify().is_err());
    }

    #[test]
    fn test_hash_depends_on_clock_and_parents() {
        let alice = LocalIdentity::generate();
        let bob = LocalIdentity::generate();
        let address = address_for(&alice, &bob);

        let first = LogEntry::create(&alice, address, 1, vec![], add("1")).unwrap();
        let later = LogEntry::create(&alice, address, 2, vec![], add("1")).unwrap();
        let child = LogEntry::create(&alice, address, 1, vec![first.hash], add("1")).unwrap();

        assert_ne!(first.hash, later.hash);
        assert_ne!(first.hash, child.hash);
    }

    #[test]
    fn test_encode_decode() {
        let alice = LocalIdentity::generate();
        let bob = LocalIdentity::generate();
        let first = LogEntry::create(&alice, address_for(&alice, &bob), 1, vec![], add("1")).unwrap();
        let del = LogEntry::create(
            &bob,
            address_for(&alice, &bob),
            2,
            vec![first.hash],
            Operation::Del { target: first.hash },
        )
        .unwrap();

        let decoded = LogEntry::decode(&del.encode().unwrap()).unwrap();
        assert_eq!(decoded, del);
        assert!(decoded.verify().is_ok());
        assert!(decoded.is_removal());
        assert_eq!(decoded.value(), None);
    }

    #[test]
    fn test_entry_hash_hex() {
        let hash = EntryHash::from_bytes([0xab; 32]);
        assert_eq!(hash.to_hex(), "ab".repeat(32));
        assert_eq!(EntryHash::from_hex(&hash.to_hex()).unwrap(), hash);
        assert_eq!(hash.short(), "abababab");
        assert!(EntryHash::from_hex("xyz").is_err());
    }

    #[test]
    fn test_entry_hash_json_is_hex_string() {
        let hash = EntryHash::from_bytes([0x01; 32]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(32)));
        let back: EntryHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
