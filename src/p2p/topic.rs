use anyhow::{anyhow, Result};
use libp2p::gossipsub::{IdentTopic, TopicHash};
use tokio::sync::{broadcast, broadcast::error::RecvError, mpsc, oneshot};

use super::message::FeedMessage;
use super::node::Command;

/// Publish/subscribe access to one named gossip topic.
///
/// Handles are cheap to clone; all of them talk to the same node event loop.
#[derive(Clone)]
pub struct TopicChannel {
    name: String,
    hash: TopicHash,
    cmd_tx: mpsc::Sender<Command>,
    msg_tx: broadcast::Sender<FeedMessage>,
}

impl TopicChannel {
    pub(crate) fn new(
        name: String,
        cmd_tx: mpsc::Sender<Command>,
        msg_tx: broadcast::Sender<FeedMessage>,
    ) -> Self {
        let hash = IdentTopic::new(&name).hash();
        Self {
            name,
            hash,
            cmd_tx,
            msg_tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Best-effort broadcast to the mesh. No retry; the caller decides what
    /// to do with a failure.
    pub async fn publish(&self, data: Vec<u8>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Publish {
                topic: self.name.clone(),
                data,
                reply,
            })
            .await
            .map_err(|_| anyhow!("node event loop stopped"))?;
        rx.await.map_err(|_| anyhow!("node event loop stopped"))?
    }

    /// A lazy, unbounded sequence of messages published to this topic by any
    /// member, the local node included.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.msg_tx.subscribe(),
            topic: self.hash.clone(),
        }
    }
}

/// A non-restartable stream of messages on one topic.
pub struct Subscription {
    rx: broadcast::Receiver<FeedMessage>,
    topic: TopicHash,
}

impl Subscription {
    /// The next message, `Some(Err(_))` if the receiver fell behind, or
    /// `None` once the node has shut down and the sequence is over.
    pub async fn next(&mut self) -> Option<Result<FeedMessage>> {
        loop {
            match self.rx.recv().await {
                Ok(message) if message.topic == self.topic => return Some(Ok(message)),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    return Some(Err(anyhow!(
                        "subscription lagged behind, {skipped} messages dropped"
                    )))
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
