use anyhow::{anyhow, Result};
use libp2p::{multiaddr::Protocol, Multiaddr, PeerId};

/// How to reach a peer: its identity plus the addresses it can be dialed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub addrs: Vec<Multiaddr>,
}

impl PeerInfo {
    pub fn new(peer_id: PeerId, addrs: Vec<Multiaddr>) -> Self {
        Self { peer_id, addrs }
    }

    /// Parses a `/.../p2p/<peer-id>` multiaddr into a PeerInfo.
    ///
    /// The trailing `/p2p/` component becomes the peer identity and the
    /// remainder becomes the dial address.
    pub fn from_multiaddr(addr: Multiaddr) -> Result<Self> {
        let mut dial_addr = addr.clone();
        match dial_addr.pop() {
            Some(Protocol::P2p(peer_id)) => Ok(Self {
                peer_id,
                addrs: vec![dial_addr],
            }),
            _ => Err(anyhow!(
                "multiaddr {addr} is missing a trailing /p2p/<peer-id> component"
            )),
        }
    }

    /// The address in the human-shareable `/.../p2p/<peer-id>` form.
    pub fn shareable_addr(&self) -> Option<Multiaddr> {
        self.addrs
            .first()
            .map(|addr| addr.clone().with(Protocol::P2p(self.peer_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_peer_info_from_full_multiaddr() {
        let peer_id = PeerId::random();
        let addr: Multiaddr = format!("/ip4/10.0.0.7/tcp/4001/p2p/{peer_id}")
            .parse()
            .unwrap();

        let info = PeerInfo::from_multiaddr(addr).unwrap();
        assert_eq!(info.peer_id, peer_id);
        assert_eq!(info.addrs, vec!["/ip4/10.0.0.7/tcp/4001".parse().unwrap()]);
    }

    #[test]
    fn rejects_multiaddr_without_peer_id() {
        let addr: Multiaddr = "/ip4/10.0.0.7/tcp/4001".parse().unwrap();
        assert!(PeerInfo::from_multiaddr(addr).is_err());
    }

    #[test]
    fn shareable_addr_round_trips() {
        let peer_id = PeerId::random();
        let addr: Multiaddr = format!("/ip4/10.0.0.7/tcp/4001/p2p/{peer_id}")
            .parse()
            .unwrap();

        let info = PeerInfo::from_multiaddr(addr.clone()).unwrap();
        assert_eq!(info.shareable_addr(), Some(addr));
    }
}
