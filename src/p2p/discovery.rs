use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use libp2p::{futures::future::join_all, PeerId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::NodeConfig;
use super::peer::PeerInfo;

/// What the discovery service needs from the overlay network: connection
/// attempts plus DHT advertisement and lookup under a namespace.
#[async_trait]
pub trait Overlay {
    fn local_peer_id(&self) -> PeerId;

    /// Connect to a peer whose addresses are already known.
    async fn connect(&self, peer: &PeerInfo) -> Result<()>;

    /// Connect to a peer by identity alone, using addresses learned via the DHT.
    async fn connect_peer(&self, peer_id: PeerId) -> Result<()>;

    /// Kick off a DHT routing table refresh.
    async fn refresh_routing_table(&self) -> Result<()>;

    /// Register this node as reachable under `namespace`.
    async fn advertise(&self, namespace: &str) -> Result<()>;

    /// Other nodes currently advertised under `namespace`.
    async fn find_advertisers(&self, namespace: &str) -> Result<Vec<PeerId>>;
}

/// Makes the node reachable without prior knowledge of the topology.
///
/// Runs through three phases: bootstrap against the seed set, advertise
/// under the topic namespace, then search until a single outbound
/// connection succeeds. The service stops there: it guarantees at least one
/// well-connected peer, not a fully connected mesh.
pub struct DiscoveryService<O> {
    overlay: O,
    seeds: Vec<PeerInfo>,
    namespace: String,
    search_interval: Duration,
    cancel: CancellationToken,
}

impl<O: Overlay> DiscoveryService<O> {
    pub fn new(overlay: O, config: &NodeConfig, cancel: CancellationToken) -> Self {
        Self {
            overlay,
            seeds: config.bootstrap_seeds.clone(),
            namespace: config.topic.clone(),
            search_interval: config.search_interval,
            cancel,
        }
    }

    pub async fn run(self) -> Result<()> {
        self.bootstrap().await;
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        self.overlay.advertise(&self.namespace).await?;
        debug!(namespace = %self.namespace, "advertised in the DHT");
        self.search().await
    }

    /// Connects to every seed concurrently and waits for all attempts to
    /// finish, success or failure, before returning.
    async fn bootstrap(&self) {
        info!(seed_count = self.seeds.len(), "bootstrapping against seed peers");
        let attempts = self.seeds.iter().map(|seed| async move {
            if let Err(e) = self.overlay.connect(seed).await {
                warn!(peer = %seed.peer_id, error = %e, "bootstrap connection failed");
            }
        });
        join_all(attempts).await;

        if let Err(e) = self.overlay.refresh_routing_table().await {
            warn!(error = %e, "routing table refresh failed");
        }
    }

    /// Scans the namespace until one outbound connection succeeds, then
    /// exits permanently.
    async fn search(&self) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            info!("searching for peers");
            let candidates = self.overlay.find_advertisers(&self.namespace).await?;
            for candidate in candidates {
                if candidate == self.overlay.local_peer_id() {
                    continue;
                }
                if self.cancel.is_cancelled() {
                    return Ok(());
                }
                // Individual failures are expected while records are stale;
                // keep scanning the batch.
                if self.overlay.connect_peer(candidate).await.is_ok() {
                    info!(peer = %candidate, "connected, peer discovery complete");
                    return Ok(());
                }
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.search_interval) => {}
            }
        }
    }
}
