//! ivy CLI
//!
//! Runs a local-network overlay node: finds peers by multicast and connects
//! to them over authenticated, encrypted sessions.

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use ivy_core::{Candidate, CandidateSource, Identity, Node, NodeEvent, PeerId};
use ivy_discovery::LanDiscovery;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use config::Config;

/// ivy - encrypted peer-to-peer messaging on the local network
#[derive(Parser)]
#[command(name = "ivy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a node and connect to peers found on the network
    Run {
        /// Listen address (overrides the config file)
        #[arg(short, long)]
        listen: Option<String>,

        /// Do not announce or scan
        #[arg(long)]
        no_discovery: bool,

        /// Text sent to each peer once connected
        #[arg(short, long)]
        greet: Option<String>,
    },

    /// Print a freshly generated peer ID
    Id,

    /// Start a node and connect to one address
    Dial {
        /// Peer address
        #[arg(required = true)]
        addr: SocketAddr,

        /// Listen address (overrides the config file)
        #[arg(short, long)]
        listen: Option<String>,

        /// Text sent to the peer once connected
        #[arg(short, long)]
        greet: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(cli.config.as_deref())?;

    // Initialize logging
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level)))
        .init();

    match cli.command {
        Commands::Run {
            listen,
            no_discovery,
            greet,
        } => {
            if let Some(listen) = listen {
                config.node.listen_addr = listen;
            }
            if no_discovery {
                config.discovery.enabled = false;
            }
            config.validate()?;
            run_node(&config, None, greet).await?;
        }
        Commands::Id => {
            println!("{}", Identity::generate().peer_id());
        }
        Commands::Dial {
            addr,
            listen,
            greet,
        } => {
            if let Some(listen) = listen {
                config.node.listen_addr = listen;
            }
            config.discovery.enabled = false;
            config.validate()?;
            run_node(&config, Some(addr), greet).await?;
        }
    }

    Ok(())
}

/// Run a node until Ctrl-C
async fn run_node(
    config: &Config,
    dial: Option<SocketAddr>,
    greet: Option<String>,
) -> anyhow::Result<()> {
    let node = Node::new_random(config.node_config()?)?;
    let addr = node.serve().await?;

    println!("ivy node");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Peer ID: {}", node.peer_id());
    println!("Listen: {addr}");

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let display = node.clone();
    tasks.push(tokio::spawn(async move { display.peer_display_loop().await }));
    tasks.push(tokio::spawn(print_events(node.clone(), greet)));

    // Held until shutdown; dropping it stops the multicast listener
    let mut discovery = None;

    if config.discovery.enabled {
        let lan_config = config.discovery_config()?;
        let period = lan_config.scan_period;
        let lan = Arc::new(
            LanDiscovery::bind(lan_config, node.peer_id().to_string(), addr.port()).await?,
        );
        tasks.push(lan.spawn_announcer());

        let mut source = LanSource {
            discovery: Arc::clone(&lan),
        };
        let scanner = node.clone();
        tasks.push(tokio::spawn(async move {
            scanner.run_discovery(&mut source, period).await;
        }));
        discovery = Some(lan);
    }

    if let Some(target) = dial {
        node.connect(target).await?;
    }

    println!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");

    for task in tasks {
        task.abort();
    }
    drop(discovery);
    node.shutdown().await;

    Ok(())
}

/// Print node events as they happen, greeting new peers
async fn print_events(node: Node, greet: Option<String>) {
    let mut events = node.subscribe();
    loop {
        match events.recv().await {
            Ok(NodeEvent::PeerConnected {
                peer_id,
                addr,
                role,
            }) => {
                println!("+ {peer_id} ({addr}, {role})");
                if let Some(text) = &greet {
                    if let Err(e) = node.send_text(&peer_id, text.clone()).await {
                        tracing::warn!(peer = %peer_id, error = %e, "greeting failed");
                    }
                }
            }
            Ok(NodeEvent::Message { peer_id, text }) => println!("{peer_id}: {text}"),
            Ok(NodeEvent::PeerDisconnected { peer_id }) => println!("- {peer_id}"),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event output fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Multicast discovery as a node candidate source
struct LanSource {
    discovery: Arc<LanDiscovery>,
}

#[async_trait]
impl CandidateSource for LanSource {
    async fn scan(&mut self) -> ivy_core::Result<Vec<Candidate>> {
        let found = self
            .discovery
            .scan()
            .await
            .map_err(|e| ivy_core::Error::Io(std::io::Error::other(e)))?;

        let mut candidates = Vec::with_capacity(found.len());
        for peer in found {
            match PeerId::parse(&peer.peer_id) {
                Ok(peer_id) => candidates.push(Candidate {
                    peer_id,
                    addr: peer.addr,
                }),
                Err(e) => {
                    tracing::debug!(addr = %peer.addr, error = %e, "ignoring malformed peer ID");
                }
            }
        }
        Ok(candidates)
    }
}
