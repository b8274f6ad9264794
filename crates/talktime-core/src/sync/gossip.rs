//! Gossip-based P2P transport using iroh-gossip
//!
//! Each log address is used directly as a gossip [`TopicId`]. Joining a log
//! subscribes to its topic and bridges the gossip sender/receiver pair onto
//! the channel-based [`TransportLink`] the replicator consumes.
//!
//! ```text
//!   replicator ──outbound──▶ pump task ──broadcast──▶ gossip topic
//!   replicator ◀──inbound─── pump task ◀──Received──── gossip topic
//! ```

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use iroh::discovery::static_provider::StaticProvider;
use iroh::protocol::Router;
use iroh::{Endpoint, EndpointAddr, EndpointId, SecretKey};
use iroh_gossip::api::{Event, GossipReceiver, GossipSender};
use iroh_gossip::net::{Gossip, GOSSIP_ALPN};
use iroh_gossip::proto::TopicId;
use n0_future::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::transport::{Transport, TransportLink, LINK_CAPACITY};
use crate::config::GossipConfig;
use crate::error::{ChatError, ChatResult};
use crate::log::LogAddress;

/// Transport backed by an iroh endpoint with gossip protocol support.
#[derive(Debug)]
pub struct GossipTransport {
    endpoint: Endpoint,
    gossip: Gossip,
    router: Router,
    /// Static discovery provider for out-of-band peer addresses
    static_provider: StaticProvider,
    bootstrap: Vec<EndpointId>,
}

impl GossipTransport {
    /// Bind a new endpoint with a random key.
    pub async fn bind(config: &GossipConfig) -> ChatResult<Self> {
        Self::with_secret_key(SecretKey::generate(&mut rand::rng()), config).await
    }

    /// Bind a new endpoint with a specific secret key
    ///
    /// Useful for a stable node id across restarts.
    pub async fn with_secret_key(secret_key: SecretKey, config: &GossipConfig) -> ChatResult<Self> {
        let bootstrap = config
            .bootstrap
            .iter()
            .map(|peer| {
                peer.parse::<EndpointId>()
                    .map_err(|e| ChatError::Gossip(format!("invalid bootstrap peer {:?}: {}", peer, e)))
            })
            .collect::<ChatResult<Vec<_>>>()?;

        let static_provider = StaticProvider::new();

        let endpoint = Endpoint::builder()
            .secret_key(secret_key)
            .alpns(vec![GOSSIP_ALPN.to_vec()])
            .discovery(static_provider.clone())
            .bind()
            .await
            .map_err(|e| ChatError::TransportUnavailable(format!("Failed to bind endpoint: {}", e)))?;

        let endpoint_id = endpoint.id();
        info!(%endpoint_id, "Endpoint bound");

        let gossip = Gossip::builder()
            .max_message_size(config.max_message_size)
            .spawn(endpoint.clone());
        info!(max_message_size = config.max_message_size, "Gossip spawned");

        let router = Router::builder(endpoint.clone())
            .accept(GOSSIP_ALPN, gossip.clone())
            .spawn();

        Ok(Self {
            endpoint,
            gossip,
            router,
            static_provider,
            bootstrap,
        })
    }

    /// This node's endpoint ID, which peers list as a bootstrap node
    pub fn endpoint_id(&self) -> EndpointId {
        self.endpoint.id()
    }

    /// This node's current addressing information
    pub fn endpoint_addr(&self) -> EndpointAddr {
        self.endpoint.addr()
    }

    /// Make a peer's address known without relying on DNS discovery, and
    /// use it as a bootstrap node for subsequent joins.
    pub fn add_peer_addr(&mut self, endpoint_addr: EndpointAddr) {
        info!(
            peer = %endpoint_addr.id,
            addrs = endpoint_addr.addrs.len(),
            "Adding peer address to static discovery"
        );
        if !self.bootstrap.contains(&endpoint_addr.id) {
            self.bootstrap.push(endpoint_addr.id);
        }
        self.static_provider.add_endpoint_info(endpoint_addr);
    }

    async fn join_topic(&self, address: LogAddress) -> ChatResult<TransportLink> {
        let topic_id = TopicId::from_bytes(*address.as_bytes());
        info!(
            %address,
            peer_count = self.bootstrap.len(),
            "Subscribing to log topic"
        );

        let topic = self
            .gossip
            .subscribe(topic_id, self.bootstrap.clone())
            .await
            .map_err(|e| ChatError::TransportUnavailable(format!("Failed to subscribe: {}", e)))?;
        let (sender, receiver) = topic.split();

        let (outbound_tx, outbound_rx) = mpsc::channel(LINK_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(LINK_CAPACITY);

        tokio::spawn(pump_outbound(topic_id, sender, outbound_rx));
        tokio::spawn(pump_inbound(topic_id, receiver, inbound_tx));

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }

    /// Gracefully shut down the endpoint
    pub async fn shutdown(self) -> ChatResult<()> {
        info!("Shutting down gossip transport");

        if let Err(e) = self.router.shutdown().await {
            warn!(error = ?e, "Failed to shutdown router cleanly");
        }
        self.endpoint.close().await;

        info!("Gossip transport shutdown complete");
        Ok(())
    }
}

impl Transport for GossipTransport {
    fn join(&self, address: LogAddress) -> BoxFuture<'_, ChatResult<TransportLink>> {
        self.join_topic(address).boxed()
    }
}

async fn pump_outbound(topic_id: TopicId, sender: GossipSender, mut frames: mpsc::Receiver<Vec<u8>>) {
    while let Some(frame) = frames.recv().await {
        debug!(topic = ?topic_id, len = frame.len(), "Broadcasting frame");
        if let Err(e) = sender.broadcast(Bytes::from(frame)).await {
            warn!(topic = ?topic_id, error = %e, "Failed to broadcast");
        }
    }
    debug!(topic = ?topic_id, "Outbound link closed");
}

async fn pump_inbound(topic_id: TopicId, mut receiver: GossipReceiver, frames: mpsc::Sender<Vec<u8>>) {
    loop {
        let next = tokio::select! {
            _ = frames.closed() => break,
            next = receiver.try_next() => next,
        };

        match next {
            Ok(Some(Event::Received(msg))) => {
                debug!(topic = ?topic_id, from = ?msg.delivered_from, "Received frame");
                if frames.send(msg.content.to_vec()).await.is_err() {
                    break;
                }
            }
            Ok(Some(Event::NeighborUp(peer))) => {
                info!(topic = ?topic_id, ?peer, "Neighbor joined");
            }
            Ok(Some(Event::NeighborDown(peer))) => {
                info!(topic = ?topic_id, ?peer, "Neighbor left");
            }
            Ok(Some(Event::Lagged)) => {
                warn!(topic = ?topic_id, "Lagged behind on topic");
            }
            Ok(None) => {
                debug!(topic = ?topic_id, "Topic subscription closed");
                break;
            }
            Err(e) => {
                warn!(topic = ?topic_id, error = ?e, "Error receiving from topic");
                break;
            }
        }
    }
}
