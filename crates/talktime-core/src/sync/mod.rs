//! Replication networking
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Transport (trait)                                              │
//! │  ├── GossipTransport: iroh endpoint + gossip, topic = address   │
//! │  └── MemoryTransport: in-process hub for tests and demos        │
//! │                                                                 │
//! │  TransportLink (per-log connection)                             │
//! │  ├── outbound: frames to broadcast                              │
//! │  └── inbound: frames from peers                                 │
//! │                                                                 │
//! │  ReplicationMessage (postcard, wrapped in WireMessage::V1)      │
//! │  ├── Heads: announce current heads                              │
//! │  ├── SyncRequest: ask for the full log                          │
//! │  └── Entries: signed entries                                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod events;
pub mod gossip;
pub mod memory;
pub mod protocol;
pub mod transport;

pub use events::LogEvent;
pub use gossip::GossipTransport;
pub use memory::{MemoryNetwork, MemoryTransport};
pub use protocol::{ReplicationMessage, WireMessage};
pub use transport::{Transport, TransportLink};
