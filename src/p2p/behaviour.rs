use std::time::Duration;

use anyhow::{anyhow, Result};
use libp2p::{
    autonat,
    gossipsub::{self, Behaviour as GossipsubBehaviour, MessageAuthenticity, ValidationMode},
    identify, identity::Keypair, kad, ping, relay,
    swarm::NetworkBehaviour,
    PeerId,
};

/// Protocol string exchanged over identify.
pub const PROTOCOL_VERSION: &str = "/pricemesh/1.0.0";

/// Combined network behaviour for the overlay node:
/// - Gossipsub: topic broadcast mesh
/// - Kademlia: DHT used purely for peer discovery/advertisement
/// - Identify: peer address exchange so Kademlia learns dialable addresses
/// - Ping: peer health checks
/// - Relay client: traffic relayed through intermediate peers
/// - AutoNAT: NAT mapping negotiation
#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "FeedEvent")]
pub struct FeedBehaviour {
    pub gossipsub: GossipsubBehaviour,
    pub kademlia: kad::Behaviour<kad::store::MemoryStore>,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
    pub relay_client: relay::client::Behaviour,
    pub autonat: autonat::Behaviour,
}

/// Events emitted by the combined behaviour
#[derive(Debug)]
pub enum FeedEvent {
    Gossipsub(gossipsub::Event),
    Kademlia(kad::Event),
    Identify(identify::Event),
    Ping(ping::Event),
    RelayClient(relay::client::Event),
    Autonat(autonat::Event),
}

impl From<gossipsub::Event> for FeedEvent {
    fn from(event: gossipsub::Event) -> Self {
        FeedEvent::Gossipsub(event)
    }
}

impl From<kad::Event> for FeedEvent {
    fn from(event: kad::Event) -> Self {
        FeedEvent::Kademlia(event)
    }
}

impl From<identify::Event> for FeedEvent {
    fn from(event: identify::Event) -> Self {
        FeedEvent::Identify(event)
    }
}

impl From<ping::Event> for FeedEvent {
    fn from(event: ping::Event) -> Self {
        FeedEvent::Ping(event)
    }
}

impl From<relay::client::Event> for FeedEvent {
    fn from(event: relay::client::Event) -> Self {
        FeedEvent::RelayClient(event)
    }
}

impl From<autonat::Event> for FeedEvent {
    fn from(event: autonat::Event) -> Self {
        FeedEvent::Autonat(event)
    }
}

impl FeedBehaviour {
    pub fn new(
        key: &Keypair,
        relay_client: relay::client::Behaviour,
        health_check_interval: Duration,
    ) -> Result<Self> {
        let local_peer_id = PeerId::from(key.public());

        let gossipsub_config = gossipsub::ConfigBuilder::default()
            .heartbeat_interval(Duration::from_secs(1))
            .validation_mode(ValidationMode::Strict)
            .mesh_n_low(2)
            .mesh_n(4)
            .mesh_n_high(8)
            .flood_publish(true)
            .build()
            .map_err(|e| anyhow!("failed to build gossipsub config: {e}"))?;

        let gossipsub = GossipsubBehaviour::new(
            MessageAuthenticity::Signed(key.clone()),
            gossipsub_config,
        )
        .map_err(|e| anyhow!("failed to create gossipsub behaviour: {e}"))?;

        let store = kad::store::MemoryStore::new(local_peer_id);
        let mut kad_config = kad::Config::default();
        kad_config.set_query_timeout(Duration::from_secs(30));
        let mut kademlia = kad::Behaviour::with_config(local_peer_id, store, kad_config);
        // Always answer queries and store provider records, even before any
        // external address is confirmed.
        kademlia.set_mode(Some(kad::Mode::Server));

        let identify = identify::Behaviour::new(identify::Config::new(
            PROTOCOL_VERSION.to_string(),
            key.public(),
        ));

        let ping = ping::Behaviour::new(
            ping::Config::new().with_interval(health_check_interval),
        );

        let autonat = autonat::Behaviour::new(local_peer_id, autonat::Config::default());

        Ok(Self {
            gossipsub,
            kademlia,
            identify,
            ping,
            relay_client,
            autonat,
        })
    }
}
