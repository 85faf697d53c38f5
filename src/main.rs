use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use libp2p::{multiaddr::Protocol, Multiaddr};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use pricemesh::config::Settings;
use pricemesh::consumer::Consumer;
use pricemesh::logging;
use pricemesh::p2p::{DiscoveryService, Node, NodeConfig, NodeHandle};
use pricemesh::producer::Producer;
use pricemesh::quote::CmcClient;

#[derive(Parser)]
#[command(
    name = "pricemesh",
    version,
    about = "Peer-to-peer crypto price feed over a gossip mesh"
)]
struct Cli {
    /// Settings file (default: $HOME/.pricemesh.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Listen to crypto price updates
    Listen,
    /// Produce crypto price feed
    Produce {
        /// Crypto price symbol
        #[arg(short, long, default_value = "BTC")]
        symbol: String,
        /// Time in secs between quote refreshes
        #[arg(short = 'q', long, default_value_t = 30)]
        quote_refresh: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    let node_config = NodeConfig::default();
    let (node, handle) = Node::new(&node_config).await?;
    tokio::spawn(node.run());

    let listen_addr = wait_for_listen_addr(&handle).await?;
    println!(
        "node address: {}",
        listen_addr.with(Protocol::P2p(handle.peer_id()))
    );

    let discovery = DiscoveryService::new(handle.clone(), &node_config, cancel.child_token());
    tokio::spawn(async move {
        if let Err(e) = discovery.run().await {
            error!(error = %e, "peer discovery failed");
        }
    });

    let topic = handle.join_topic(&node_config.topic).await?;

    match cli.command {
        CliCommand::Listen => {
            Consumer::new(topic.subscribe(), handle.peer_id(), cancel.clone())
                .run()
                .await;
        }
        CliCommand::Produce {
            symbol,
            quote_refresh,
        } => {
            let quotes = CmcClient::new(&settings)?;
            Producer::new(
                symbol,
                Duration::from_secs(quote_refresh),
                quotes,
                topic,
                cancel.clone(),
            )
            .run()
            .await;
        }
    }

    Ok(())
}

async fn wait_for_listen_addr(handle: &NodeHandle) -> Result<Multiaddr> {
    for _ in 0..50 {
        if let Some(addr) = handle.listen_addrs().await?.into_iter().next() {
            return Ok(addr);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Err(anyhow!("timed out waiting for the node to bind a listen address"))
}
