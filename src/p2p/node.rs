use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use libp2p::{
    futures::StreamExt,
    gossipsub::{self, IdentTopic, PublishError},
    identify, identity::Keypair, kad, noise, ping,
    swarm::{dial_opts::DialOpts, Swarm, SwarmEvent},
    tcp, yamux, Multiaddr, PeerId, SwarmBuilder,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::behaviour::{FeedBehaviour, FeedEvent};
use super::config::NodeConfig;
use super::discovery::Overlay;
use super::message::FeedMessage;
use super::peer::PeerInfo;
use super::topic::TopicChannel;

const COMMAND_BUFFER: usize = 64;
const MESSAGE_BUFFER: usize = 256;

/// Requests sent from handles to the node event loop.
pub(crate) enum Command {
    Dial {
        peer: PeerInfo,
        reply: oneshot::Sender<Result<()>>,
    },
    DialPeer {
        peer_id: PeerId,
        reply: oneshot::Sender<Result<()>>,
    },
    RefreshRoutingTable,
    StartProviding {
        namespace: String,
        reply: oneshot::Sender<Result<()>>,
    },
    FindProviders {
        namespace: String,
        reply: oneshot::Sender<Result<Vec<PeerId>>>,
    },
    JoinTopic {
        name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Publish {
        topic: String,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    ListenAddrs {
        reply: oneshot::Sender<Vec<Multiaddr>>,
    },
    ConnectedPeers {
        reply: oneshot::Sender<Vec<PeerId>>,
    },
}

/// An in-flight DHT provider lookup.
struct ProviderQuery {
    seen: HashSet<PeerId>,
    found: Vec<PeerId>,
    reply: oneshot::Sender<Result<Vec<PeerId>>>,
}

/// The overlay node. Owns the libp2p swarm and all of the process's network
/// sockets; every other component talks to it through a [`NodeHandle`].
pub struct Node {
    swarm: Swarm<FeedBehaviour>,
    local_peer_id: PeerId,
    cmd_rx: mpsc::Receiver<Command>,
    msg_tx: broadcast::Sender<FeedMessage>,
    pending_dials: HashMap<PeerId, Vec<oneshot::Sender<Result<()>>>>,
    provider_queries: HashMap<kad::QueryId, ProviderQuery>,
    advertise_queries: HashMap<kad::QueryId, oneshot::Sender<Result<()>>>,
}

/// Cloneable handle to a running [`Node`].
#[derive(Clone)]
pub struct NodeHandle {
    peer_id: PeerId,
    cmd_tx: mpsc::Sender<Command>,
    msg_tx: broadcast::Sender<FeedMessage>,
}

impl Node {
    /// Creates a node with a fresh identity, binds the listen address and
    /// returns the node together with a handle to it.
    ///
    /// Any failure here is unrecoverable for the caller: without a working
    /// node nothing else can proceed.
    pub async fn new(config: &NodeConfig) -> Result<(Self, NodeHandle)> {
        let id_keys = Keypair::generate_ed25519();
        let local_peer_id = PeerId::from(id_keys.public());
        info!(peer_id = %local_peer_id, "created node identity");

        let health_check_interval = config.health_check_interval;
        let mut swarm = SwarmBuilder::with_existing_identity(id_keys)
            .with_tokio()
            .with_tcp(
                tcp::Config::default().nodelay(true),
                noise::Config::new,
                yamux::Config::default,
            )?
            .with_dns()?
            .with_relay_client(noise::Config::new, yamux::Config::default)?
            .with_behaviour(|key, relay_client| {
                FeedBehaviour::new(key, relay_client, health_check_interval)
                    .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { e.into() })
            })?
            .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(60)))
            .build();

        swarm.listen_on(config.listen_address.clone())?;

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (msg_tx, _) = broadcast::channel(MESSAGE_BUFFER);

        let node = Self {
            swarm,
            local_peer_id,
            cmd_rx,
            msg_tx: msg_tx.clone(),
            pending_dials: HashMap::new(),
            provider_queries: HashMap::new(),
            advertise_queries: HashMap::new(),
        };
        let handle = NodeHandle {
            peer_id: local_peer_id,
            cmd_tx,
            msg_tx,
        };

        Ok((node, handle))
    }

    /// Drives the swarm until every handle has been dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.cmd_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("all node handles dropped, shutting down");
                        break;
                    }
                },
                event = self.swarm.select_next_some() => self.handle_swarm_event(event),
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Dial { peer, reply } => {
                if self.swarm.is_connected(&peer.peer_id) {
                    let _ = reply.send(Ok(()));
                    return;
                }
                for addr in &peer.addrs {
                    self.swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&peer.peer_id, addr.clone());
                }
                let opts = DialOpts::peer_id(peer.peer_id)
                    .addresses(peer.addrs.clone())
                    .build();
                self.dial_with_reply(peer.peer_id, opts, reply);
            }
            Command::DialPeer { peer_id, reply } => {
                if self.swarm.is_connected(&peer_id) {
                    let _ = reply.send(Ok(()));
                    return;
                }
                // Addresses come from whatever Kademlia learned about the peer.
                let opts = DialOpts::peer_id(peer_id).build();
                self.dial_with_reply(peer_id, opts, reply);
            }
            Command::RefreshRoutingTable => {
                if let Err(e) = self.swarm.behaviour_mut().kademlia.bootstrap() {
                    debug!(error = %e, "routing table refresh skipped");
                }
            }
            Command::StartProviding { namespace, reply } => {
                let key = kad::RecordKey::new(&namespace);
                match self.swarm.behaviour_mut().kademlia.start_providing(key) {
                    Ok(query_id) => {
                        self.advertise_queries.insert(query_id, reply);
                    }
                    Err(e) => {
                        let _ = reply.send(Err(anyhow!("failed to advertise: {e}")));
                    }
                }
            }
            Command::FindProviders { namespace, reply } => {
                let key = kad::RecordKey::new(&namespace);
                let query_id = self.swarm.behaviour_mut().kademlia.get_providers(key);
                self.provider_queries.insert(
                    query_id,
                    ProviderQuery {
                        seen: HashSet::new(),
                        found: Vec::new(),
                        reply,
                    },
                );
            }
            Command::JoinTopic { name, reply } => {
                let topic = IdentTopic::new(&name);
                let result = self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .subscribe(&topic)
                    .map(|_| ())
                    .map_err(|e| anyhow!("failed to join topic {name}: {e}"));
                let _ = reply.send(result);
            }
            Command::Publish { topic, data, reply } => {
                let topic = IdentTopic::new(&topic);
                let outcome = match self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .publish(topic.clone(), data.clone())
                {
                    Ok(_) => Ok(()),
                    // The mesh no-ops until peers attach; not an error for
                    // the publisher.
                    Err(PublishError::InsufficientPeers) => {
                        debug!("no mesh peers yet, message not relayed");
                        Ok(())
                    }
                    Err(e) => Err(anyhow!("publish failed: {e}")),
                };
                if outcome.is_ok() {
                    // The channel delivers to all members including the
                    // sender; gossipsub does not loop back locally, so do it
                    // here. Receivers filter their own messages themselves.
                    let _ = self.msg_tx.send(FeedMessage {
                        sender: self.local_peer_id,
                        topic: topic.hash(),
                        data,
                    });
                }
                let _ = reply.send(outcome);
            }
            Command::ListenAddrs { reply } => {
                let _ = reply.send(self.swarm.listeners().cloned().collect());
            }
            Command::ConnectedPeers { reply } => {
                let _ = reply.send(self.swarm.connected_peers().cloned().collect());
            }
        }
    }

    fn dial_with_reply(
        &mut self,
        peer_id: PeerId,
        opts: DialOpts,
        reply: oneshot::Sender<Result<()>>,
    ) {
        match self.swarm.dial(opts) {
            Ok(()) => {
                self.pending_dials.entry(peer_id).or_default().push(reply);
            }
            Err(e) => {
                let _ = reply.send(Err(anyhow!("dial to {peer_id} failed: {e}")));
            }
        }
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<FeedEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(%address, "listening");
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                info!(peer = %peer_id, "connected");
                if let Some(waiters) = self.pending_dials.remove(&peer_id) {
                    for waiter in waiters {
                        let _ = waiter.send(Ok(()));
                    }
                }
            }
            SwarmEvent::OutgoingConnectionError {
                peer_id: Some(peer_id),
                error,
                ..
            } => {
                debug!(peer = %peer_id, error = %error, "outgoing connection failed");
                if let Some(waiters) = self.pending_dials.remove(&peer_id) {
                    let message = error.to_string();
                    for waiter in waiters {
                        let _ =
                            waiter.send(Err(anyhow!("connection to {peer_id} failed: {message}")));
                    }
                }
            }
            SwarmEvent::ConnectionClosed { peer_id, .. } => {
                debug!(peer = %peer_id, "connection closed");
            }
            SwarmEvent::Behaviour(event) => self.handle_behaviour_event(event),
            _ => {}
        }
    }

    fn handle_behaviour_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Gossipsub(gossipsub::Event::Message { message, .. }) => {
                // Anonymous messages carry no sender identity to filter on.
                let Some(source) = message.source else {
                    debug!("dropping message without a signed source");
                    return;
                };
                let _ = self.msg_tx.send(FeedMessage {
                    sender: source,
                    topic: message.topic,
                    data: message.data,
                });
            }
            FeedEvent::Kademlia(kad::Event::OutboundQueryProgressed {
                id, result, step, ..
            }) => match result {
                kad::QueryResult::GetProviders(result) => {
                    if let Ok(kad::GetProvidersOk::FoundProviders { providers, .. }) = result {
                        if let Some(query) = self.provider_queries.get_mut(&id) {
                            for provider in providers {
                                if query.seen.insert(provider) {
                                    query.found.push(provider);
                                }
                            }
                        }
                    }
                    if step.last {
                        if let Some(query) = self.provider_queries.remove(&id) {
                            let _ = query.reply.send(Ok(query.found));
                        }
                    }
                }
                kad::QueryResult::StartProviding(result) => {
                    if let Some(reply) = self.advertise_queries.remove(&id) {
                        let _ = reply.send(
                            result
                                .map(|_| ())
                                .map_err(|e| anyhow!("failed to advertise: {e}")),
                        );
                    }
                }
                kad::QueryResult::Bootstrap(result) => {
                    debug!(?result, "routing table refresh progressed");
                }
                _ => {}
            },
            FeedEvent::Identify(identify::Event::Received { peer_id, info, .. }) => {
                // Feed learned listen addresses into the DHT so later dials
                // by peer id can succeed.
                for addr in info.listen_addrs {
                    self.swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&peer_id, addr);
                }
            }
            FeedEvent::Ping(ping::Event { peer, result, .. }) => match result {
                Ok(rtt) => debug!(peer = %peer, ?rtt, "ping"),
                Err(error) => warn!(peer = %peer, %error, "ping failure"),
            },
            _ => {}
        }
    }
}

impl NodeHandle {
    /// The local peer identity, fixed for the process lifetime.
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Addresses the node is currently listening on.
    pub async fn listen_addrs(&self) -> Result<Vec<Multiaddr>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ListenAddrs { reply }).await?;
        rx.await.map_err(|_| anyhow!("node event loop stopped"))
    }

    /// Peers with at least one open connection.
    pub async fn connected_peers(&self) -> Result<Vec<PeerId>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ConnectedPeers { reply }).await?;
        rx.await.map_err(|_| anyhow!("node event loop stopped"))
    }

    /// Joins a named gossip topic. Failure here means the gossip mesh is
    /// unusable and the caller should give up.
    pub async fn join_topic(&self, name: &str) -> Result<TopicChannel> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::JoinTopic {
            name: name.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| anyhow!("node event loop stopped"))??;
        Ok(TopicChannel::new(
            name.to_string(),
            self.cmd_tx.clone(),
            self.msg_tx.clone(),
        ))
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| anyhow!("node event loop stopped"))
    }

    async fn request<T>(
        &self,
        command: Command,
        rx: oneshot::Receiver<Result<T>>,
    ) -> Result<T> {
        self.send(command).await?;
        rx.await.map_err(|_| anyhow!("node event loop stopped"))?
    }
}

#[async_trait]
impl Overlay for NodeHandle {
    fn local_peer_id(&self) -> PeerId {
        self.peer_id
    }

    async fn connect(&self, peer: &PeerInfo) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(
            Command::Dial {
                peer: peer.clone(),
                reply,
            },
            rx,
        )
        .await
    }

    async fn connect_peer(&self, peer_id: PeerId) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::DialPeer { peer_id, reply }, rx).await
    }

    async fn refresh_routing_table(&self) -> Result<()> {
        self.send(Command::RefreshRoutingTable).await
    }

    async fn advertise(&self, namespace: &str) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(
            Command::StartProviding {
                namespace: namespace.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    async fn find_advertisers(&self, namespace: &str) -> Result<Vec<PeerId>> {
        let (reply, rx) = oneshot::channel();
        self.request(
            Command::FindProviders {
                namespace: namespace.to_string(),
                reply,
            },
            rx,
        )
        .await
    }
}
