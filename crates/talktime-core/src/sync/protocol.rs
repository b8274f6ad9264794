//! Replication protocol for conversation logs
//!
//! Messages are serialized with postcard and broadcast on the log's topic.
//!
//! ## Protocol Overview
//!
//! 1. **Heads**: Nodes announce their log heads on join and periodically
//! 2. **SyncRequest**: A node that sees unknown heads asks for the log
//! 3. **Entries**: Entries sent in reply to a request, or pushed right after
//!    a local append
//!
//! ## Message Flow
//!
//! ```text
//! Node A                               Node B
//!   |                                    |
//!   |--- Heads {heads: [a3]} ----------->|
//!   |<-- Heads {heads: [b1], reply} -----|   (heads differ)
//!   |                                    |
//!   |--- SyncRequest ------------------->|   (b1 unknown to A)
//!   |<-- SyncRequest --------------------|   (a3 unknown to B)
//!   |<-- Entries {b1} -------------------|
//!   |--- Entries {a1, a2, a3} ---------->|
//!   |                                    |
//!   |<-- Entries {b2} -------------------|   (B appends)
//! ```

use serde::{Deserialize, Serialize};

use crate::log::{EntryHash, LogAddress, LogEntry};

/// Messages exchanged between replicas of a log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReplicationMessage {
    /// Announce the current heads.
    ///
    /// `reply` is set when answering another node's announcement, so two
    /// nodes with different heads do not answer each other forever.
    Heads {
        /// The log this announcement is for
        address: LogAddress,
        /// Current heads of the sender
        heads: Vec<EntryHash>,
        /// Whether this is an answer to another announcement
        reply: bool,
    },

    /// Ask peers to send every entry they hold.
    SyncRequest {
        /// The log to sync
        address: LogAddress,
    },

    /// A batch of entries.
    Entries {
        /// The log these entries belong to
        address: LogAddress,
        /// Signed entries, in any order
        entries: Vec<LogEntry>,
    },
}

impl ReplicationMessage {
    /// Encode message to bytes using postcard
    pub fn encode(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Decode message from bytes using postcard
    pub fn decode(data: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(data)
    }

    /// Get the log address this message relates to
    pub fn address(&self) -> &LogAddress {
        match self {
            ReplicationMessage::Heads { address, .. } => address,
            ReplicationMessage::SyncRequest { address } => address,
            ReplicationMessage::Entries { address, .. } => address,
        }
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ReplicationMessage::Heads { .. } => "heads",
            ReplicationMessage::SyncRequest { .. } => "sync_request",
            ReplicationMessage::Entries { .. } => "entries",
        }
    }
}

/// Versioned envelope for replication messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireMessage {
    /// Protocol version 1
    V1(ReplicationMessage),
}

impl WireMessage {
    /// Wrap a replication message in the current version
    pub fn new(msg: ReplicationMessage) -> Self {
        WireMessage::V1(msg)
    }

    /// Encode wire message to bytes using postcard
    pub fn encode(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Decode wire message from bytes using postcard
    pub fn decode(data: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(data)
    }

    /// Unwrap the inner message
    pub fn into_inner(self) -> ReplicationMessage {
        match self {
            WireMessage::V1(msg) => msg,
        }
    }

    /// Get the protocol version
    pub fn version(&self) -> u8 {
        match self {
            WireMessage::V1(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::LocalIdentity;
    use crate::log::{LogKind, Operation, WriterSet};

    fn address() -> (LocalIdentity, LogAddress) {
        let alice = LocalIdentity::generate();
        let bob = LocalIdentity::generate();
        let writers = WriterSet::new(alice.did().clone(), bob.did().clone()).unwrap();
        (alice, LogAddress::derive("talktime", LogKind::Feed, &writers))
    }

    #[test]
    fn test_wire_message_versioning() {
        let (_, address) = address();
        let wire = WireMessage::new(ReplicationMessage::SyncRequest { address });

        assert_eq!(wire.version(), 1);

        let decoded = WireMessage::decode(&wire.encode().unwrap()).unwrap();
        assert_eq!(decoded.version(), 1);
        match decoded.into_inner() {
            ReplicationMessage::SyncRequest { address: a } => assert_eq!(a, address),
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_entries_survive_the_wire() {
        let (alice, address) = address();
        let entry = LogEntry::create(
            &alice,
            address,
            1,
            vec![],
            Operation::Add {
                value: r#"{"type":"message","message":"hi"}"#.to_string(),
            },
        )
        .unwrap();

        let msg = ReplicationMessage::Entries {
            address,
            entries: vec![entry.clone()],
        };
        let decoded = ReplicationMessage::decode(&msg.encode().unwrap()).unwrap();

        match decoded {
            ReplicationMessage::Entries { entries, .. } => {
                assert_eq!(entries, vec![entry]);
                assert!(entries[0].verify().is_ok());
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_heads_reply_flag() {
        let (_, address) = address();
        let heads = vec![EntryHash::from_bytes([1; 32]), EntryHash::from_bytes([2; 32])];
        let msg = ReplicationMessage::Heads {
            address,
            heads: heads.clone(),
            reply: true,
        };

        match ReplicationMessage::decode(&msg.encode().unwrap()).unwrap() {
            ReplicationMessage::Heads { heads: h, reply, .. } => {
                assert_eq!(h, heads);
                assert!(reply);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_address_accessor_and_kind() {
        let (_, address) = address();
        let msg = ReplicationMessage::Heads {
            address,
            heads: vec![],
            reply: false,
        };
        assert_eq!(msg.address(), &address);
        assert_eq!(msg.kind(), "heads");
        assert_eq!(ReplicationMessage::SyncRequest { address }.kind(), "sync_request");
    }

    #[test]
    fn test_garbage_does_not_decode() {
        assert!(WireMessage::decode(&[0xff, 0xff, 0xff]).is_err());
    }
}
