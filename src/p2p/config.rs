use std::net::Ipv4Addr;
use std::time::Duration;

use libp2p::{multiaddr::Protocol, Multiaddr};

use super::peer::PeerInfo;

/// The shared broadcast channel every participant joins.
pub const DEFAULT_TOPIC: &str = "crypto-usd-price";

/// Well-known seed peers used only to join the DHT.
pub const DEFAULT_BOOTSTRAP_SEEDS: &[&str] = &[
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmNnooDu7bfjPFoTZYxMNLWUQJyrVwtbZg5gBMjTezGAJN",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmQCU2EcMqAqQPR2i9bChDtGNJchTbq5TbXJJ16u19uLTa",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmbLHAnMoJPWSCR5Zhtx6BHJX9KiKNN6tpvbUcqanj75Nb",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmcZf59bWwK5XFi76CZX8cbJ4BhTzzA3gU1ZjYZcYW3dwt",
];

/// Configuration for the P2P node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// The node's listen address
    pub listen_address: Multiaddr,
    /// Name of the gossip topic, also used as the DHT advertisement namespace
    pub topic: String,
    /// Seed peers used to join the DHT
    pub bootstrap_seeds: Vec<PeerInfo>,
    /// Pause between DHT search batches while looking for peers
    pub search_interval: Duration,
    /// Ping interval for peer health checks
    pub health_check_interval: Duration,
}

impl NodeConfig {
    /// The hardwired seed set, skipping any entry that fails to parse.
    pub fn default_seeds() -> Vec<PeerInfo> {
        DEFAULT_BOOTSTRAP_SEEDS
            .iter()
            .filter_map(|s| s.parse::<Multiaddr>().ok())
            .filter_map(|addr| PeerInfo::from_multiaddr(addr).ok())
            .collect()
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_address: Multiaddr::from(Ipv4Addr::UNSPECIFIED).with(Protocol::Tcp(0)),
            topic: DEFAULT_TOPIC.to_string(),
            bootstrap_seeds: Self::default_seeds(),
            search_interval: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_default_seed_parses() {
        assert_eq!(
            NodeConfig::default_seeds().len(),
            DEFAULT_BOOTSTRAP_SEEDS.len()
        );
    }

    #[test]
    fn default_config_listens_on_any_tcp_port() {
        let config = NodeConfig::default();
        assert_eq!(config.listen_address.to_string(), "/ip4/0.0.0.0/tcp/0");
        assert_eq!(config.topic, DEFAULT_TOPIC);
    }
}
