//! In-process transport
//!
//! [`MemoryNetwork`] is a hub shared by any number of [`MemoryTransport`]s,
//! one per simulated node. Frames broadcast on a topic are copied to every
//! other member of that topic. Each node can be made unreachable (joins
//! fail) or partitioned (frames to and from it are dropped), which lets
//! tests exercise convergence after a partition heals.
//!
//! Delivery uses `try_send`: a member whose inbox is full misses the frame,
//! the same way a lagging gossip subscriber would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace};

use super::transport::{Transport, TransportLink, LINK_CAPACITY};
use crate::error::{ChatError, ChatResult};
use crate::log::LogAddress;

struct Member {
    id: u64,
    node: u64,
    inbox: mpsc::Sender<Vec<u8>>,
    partitioned: Arc<AtomicBool>,
}

#[derive(Default)]
struct Hub {
    topics: HashMap<LogAddress, Vec<Member>>,
}

/// Shared in-memory network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryNetwork {
    /// Create an empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport for a new node on this network.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
            node: self.next_id.fetch_add(1, Ordering::Relaxed),
            reachable: Arc::new(AtomicBool::new(true)),
            partitioned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of live members subscribed to `address`.
    pub fn member_count(&self, address: &LogAddress) -> usize {
        self.hub
            .lock()
            .topics
            .get(address)
            .map(|members| members.iter().filter(|m| !m.inbox.is_closed()).count())
            .unwrap_or(0)
    }

    fn deliver(&self, address: &LogAddress, from_member: u64, frame: &[u8]) {
        let mut hub = self.hub.lock();
        let Some(members) = hub.topics.get_mut(address) else {
            return;
        };

        members.retain(|member| {
            if member.id == from_member {
                return true;
            }
            if member.partitioned.load(Ordering::Relaxed) {
                trace!(member = member.id, "Dropping frame for partitioned member");
                return true;
            }
            match member.inbox.try_send(frame.to_vec()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    debug!(member = member.id, "Inbox full, frame dropped");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
    }

    fn leave(&self, address: &LogAddress, member_id: u64) {
        let mut hub = self.hub.lock();
        if let Some(members) = hub.topics.get_mut(address) {
            members.retain(|m| m.id != member_id);
            if members.is_empty() {
                hub.topics.remove(address);
            }
        }
    }
}

/// One node's view of a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    node: u64,
    reachable: Arc<AtomicBool>,
    partitioned: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// When false, `join` fails with `TransportUnavailable`.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Relaxed);
    }

    /// When true, frames sent by or addressed to this node are dropped.
    pub fn set_partitioned(&self, partitioned: bool) {
        self.partitioned.store(partitioned, Ordering::Relaxed);
    }

    /// Identifier of this node on the network
    pub fn node_id(&self) -> u64 {
        self.node
    }

    async fn join_topic(&self, address: LogAddress) -> ChatResult<TransportLink> {
        if !self.reachable.load(Ordering::Relaxed) {
            return Err(ChatError::TransportUnavailable(format!(
                "node {} is offline",
                self.node
            )));
        }

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Vec<u8>>(LINK_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<Vec<u8>>(LINK_CAPACITY);
        let member_id = self.network.next_id.fetch_add(1, Ordering::Relaxed);

        self.network
            .hub
            .lock()
            .topics
            .entry(address)
            .or_default()
            .push(Member {
                id: member_id,
                node: self.node,
                inbox: inbound_tx,
                partitioned: self.partitioned.clone(),
            });
        debug!(node = self.node, member = member_id, %address, "Joined memory topic");

        let network = self.network.clone();
        let partitioned = self.partitioned.clone();
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if partitioned.load(Ordering::Relaxed) {
                    trace!(member = member_id, "Partitioned, frame dropped");
                    continue;
                }
                network.deliver(&address, member_id, &frame);
            }
            network.leave(&address, member_id);
            debug!(member = member_id, %address, "Left memory topic");
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

impl Transport for MemoryTransport {
    fn join(&self, address: LogAddress) -> BoxFuture<'_, ChatResult<TransportLink>> {
        self.join_topic(address).boxed()
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("node", &self.node)
            .field("reachable", &self.reachable.load(Ordering::Relaxed))
            .field("partitioned", &self.partitioned.load(Ordering::Relaxed))
            .finish()
    }
}

impl std::fmt::Debug for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Member")
            .field("id", &self.id)
            .field("node", &self.node)
            .finish()
    }
}
