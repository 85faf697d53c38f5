use std::time::Duration;

use anyhow::{anyhow, Result};
use pricemesh::p2p::{Node, NodeConfig, NodeHandle, PeerInfo};
use tracing::info;

pub const TEST_TOPIC: &str = "pricemesh-test";

/// Starts a node on a random localhost port and waits until it is
/// listening. Returns the handle plus the node's dialable PeerInfo.
pub async fn start_test_node(
    bootstrap_seeds: Vec<PeerInfo>,
) -> Result<(NodeHandle, PeerInfo, NodeConfig)> {
    let config = NodeConfig {
        listen_address: "/ip4/127.0.0.1/tcp/0".parse()?,
        topic: TEST_TOPIC.to_string(),
        bootstrap_seeds,
        search_interval: Duration::from_millis(500),
        health_check_interval: Duration::from_secs(1),
    };

    let (node, handle) = Node::new(&config).await?;
    tokio::spawn(node.run());

    let mut listen_addrs = Vec::new();
    for _ in 0..50 {
        listen_addrs = handle.listen_addrs().await?;
        if !listen_addrs.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    if listen_addrs.is_empty() {
        return Err(anyhow!("timeout waiting for the test node to start listening"));
    }

    let info = PeerInfo::new(handle.peer_id(), listen_addrs);
    info!(peer = %info.peer_id, addr = %info.addrs[0], "test node ready");
    Ok((handle, info, config))
}

/// Polls `condition` until it holds or `timeout_secs` elapse.
pub async fn wait_for_condition<F, Fut>(mut condition: F, timeout_secs: u64) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);

    loop {
        if condition().await {
            return true;
        }
        if start.elapsed() > timeout {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
