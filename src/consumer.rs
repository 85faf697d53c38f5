use libp2p::PeerId;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::p2p::{FeedMessage, Subscription};

/// Renders a received message, or `None` for the node's own messages.
///
/// The channel delivers to every member including the publisher, so
/// self-suppression happens here, not in the channel.
pub fn render(message: &FeedMessage, local_peer: &PeerId) -> Option<String> {
    if message.sender == *local_peer {
        return None;
    }
    Some(format!(
        "Received message from {}: {}",
        message.sender,
        String::from_utf8_lossy(&message.data)
    ))
}

/// Pulls messages from a topic subscription and renders them until
/// cancelled or the subscription ends.
pub struct Consumer {
    subscription: Subscription,
    local_peer: PeerId,
    cancel: CancellationToken,
}

impl Consumer {
    pub fn new(subscription: Subscription, local_peer: PeerId, cancel: CancellationToken) -> Self {
        Self {
            subscription,
            local_peer,
            cancel,
        }
    }

    pub async fn run(mut self) {
        info!("listening for messages");
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("consumer stopped");
                    return;
                }
                next = self.subscription.next() => next,
            };
            match next {
                None => {
                    warn!("subscription ended");
                    return;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "error getting message");
                    continue;
                }
                Some(Ok(message)) => {
                    if let Some(line) = render(&message, &self.local_peer) {
                        info!("{line}");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libp2p::gossipsub::IdentTopic;

    fn message(sender: PeerId, data: &[u8]) -> FeedMessage {
        FeedMessage {
            sender,
            topic: IdentTopic::new("crypto-usd-price").hash(),
            data: data.to_vec(),
        }
    }

    #[test]
    fn own_messages_are_suppressed() {
        let local = PeerId::random();
        assert_eq!(render(&message(local, b"BTC: $42.00"), &local), None);
    }

    #[test]
    fn messages_from_other_peers_are_rendered() {
        let local = PeerId::random();
        let sender = PeerId::random();
        let line = render(&message(sender, b"ETH: $3123.46"), &local).unwrap();
        assert_eq!(line, format!("Received message from {sender}: ETH: $3123.46"));
    }

    #[test]
    fn non_utf8_payloads_render_lossily() {
        let local = PeerId::random();
        let sender = PeerId::random();
        let line = render(&message(sender, &[0xff, 0xfe]), &local).unwrap();
        assert!(line.starts_with(&format!("Received message from {sender}: ")));
    }
}
