use libp2p::{gossipsub::TopicHash, PeerId};

/// A payload delivered to every subscriber of a topic, including the
/// publisher itself. Receivers compare `sender` against their own peer id
/// to suppress self-delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMessage {
    /// Identity of the original publisher.
    pub sender: PeerId,
    /// The topic this message was published on.
    pub topic: TopicHash,
    /// Raw message bytes.
    pub data: Vec<u8>,
}
