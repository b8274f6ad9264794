//! TalkTime Core Library
//!
//! Two-party chat over a peer-replicated, append-only log.
//!
//! ## Overview
//!
//! Every conversation is a log whose writer set is exactly the two
//! participants, sorted so both sides derive the same log address without
//! talking to each other first. Entries are signed, content-addressed and
//! replicated peer to peer; each node turns its local copy into an ordered,
//! deduplicated message list and publishes it to the display layer.
//!
//! ## Core Principles
//!
//! - **No central server**: the log replicates over iroh-gossip topics
//! - **Authorship from signatures**: "is this mine" comes from the signed
//!   entry author, never from the payload
//! - **Re-derive, don't patch**: the message list is recomputed from the
//!   whole log on every change, so identical logs render identically
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use talktime_core::{derive_identity, EngineConfig, MemoryNetwork, SessionCoordinator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let network = MemoryNetwork::new();
//!     let coordinator = SessionCoordinator::new(EngineConfig::default(), Arc::new(network.transport()));
//!
//!     let me = Arc::new(derive_identity(MY_SECRET)?);
//!     let chat = coordinator.configure(me.clone(), &peer_did).await?;
//!
//!     let _sub = chat.subscribe(|state| {
//!         for message in &state.messages {
//!             println!("{} {}", message.display_time(), message.text);
//!         }
//!     });
//!     chat.send("hi").await?;
//!
//!     coordinator.sign_out(me.did()).await;
//!     Ok(())
//! }
//! ```

pub mod chat;
pub mod config;
pub mod error;
pub mod identity;
pub mod log;
pub mod logging;
pub mod session;
pub mod state;
pub mod storage;
pub mod sync;

// Re-exports
pub use chat::{reconcile, ChatView, ConversationReconciler, Message, MessageKind, SessionState};
pub use config::{EngineConfig, GossipConfig, ReplicationConfig};
pub use error::{ChatError, ChatResult};
pub use identity::{derive_identity, Did, LocalIdentity};
pub use log::{EntryHash, LogAddress, LogEntry, LogHandle, LogKind, LogSession, WriterSet};
pub use session::{ChatSession, SessionCoordinator};
pub use state::{StateContainer, Subscription};
pub use storage::Storage;
pub use sync::{GossipTransport, LogEvent, MemoryNetwork, MemoryTransport, Transport};
