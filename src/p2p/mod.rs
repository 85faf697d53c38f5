mod behaviour;
mod config;
mod discovery;
mod message;
mod node;
mod peer;
mod topic;

pub use config::{NodeConfig, DEFAULT_BOOTSTRAP_SEEDS, DEFAULT_TOPIC};
pub use discovery::{DiscoveryService, Overlay};
pub use message::FeedMessage;
pub use node::{Node, NodeHandle};
pub use peer::PeerInfo;
pub use topic::{Subscription, TopicChannel};
