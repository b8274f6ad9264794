//! Transport abstraction for log replication
//!
//! A transport turns a [`LogAddress`] into a pair of byte channels: frames
//! written to `outbound` reach every other replica subscribed to the same
//! address, and frames from those replicas arrive on `inbound`. Delivery is
//! best-effort and unordered; the replication protocol heals gaps.
//!
//! Dropping both halves of a [`TransportLink`] leaves the topic.

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::ChatResult;
use crate::log::LogAddress;

/// Capacity of the per-link frame channels.
pub const LINK_CAPACITY: usize = 1024;

/// Byte channels connected to one log topic.
#[derive(Debug)]
pub struct TransportLink {
    /// Frames to broadcast to the other replicas
    pub outbound: mpsc::Sender<Vec<u8>>,
    /// Frames received from the other replicas
    pub inbound: mpsc::Receiver<Vec<u8>>,
}

/// Something that can connect a log to its peers.
pub trait Transport: Send + Sync + 'static {
    /// Join the topic for `address`.
    ///
    /// Fails with `ChatError::TransportUnavailable` if the network cannot be
    /// reached.
    fn join(&self, address: LogAddress) -> BoxFuture<'_, ChatResult<TransportLink>>;
}
