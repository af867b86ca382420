use clap::{Parser, Subcommand};
use log::error;
use p2p_share::core::{Config, Node, PeerProber, PeerRegistry, PeerStatus, TransferOutcome};
use p2p_share::transfer::TransferTracker;
use p2p_share::utils::{P2PError, Result, format_file_size, setup_logging, setup_logging_at};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "p2p-share")]
#[command(about = "Share a directory with peers over a small JSON protocol")]
#[command(version)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a node and serve the shared directory
    Start {
        /// Address to listen on
        #[arg(short, long, default_value = "0.0.0.0:8000")]
        listen: SocketAddr,
        /// Directory to share files from
        #[arg(short, long, default_value = "./shared_files")]
        dir: PathBuf,
        /// Node name for identification
        #[arg(short, long)]
        name: Option<String>,
        /// Peer to register at startup (ip:port), repeatable
        #[arg(short, long)]
        peer: Vec<String>,
        /// Bytes per bulk transfer chunk
        #[arg(long, default_value_t = 8192)]
        chunk_size: usize,
        /// Maximum simultaneous inbound connections
        #[arg(long)]
        max_connections: Option<usize>,
    },
    /// Check whether a peer is reachable
    Ping {
        /// Peer address (host:port)
        #[arg(short, long)]
        peer: String,
    },
    /// List the files a peer shares
    List {
        /// Peer address (host:port)
        #[arg(short, long)]
        peer: String,
    },
    /// Download a file from a peer
    Download {
        /// Peer address (host:port)
        #[arg(short, long)]
        peer: String,
        /// Name of the file in the peer's catalog
        #[arg(short, long)]
        file: String,
        /// Output file path, defaults to the file name
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Upload a local file to a peer
    Upload {
        /// Peer address (host:port)
        #[arg(short, long)]
        peer: String,
        /// Local file to send
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if cli.verbose {
        setup_logging_at("debug");
    } else {
        setup_logging();
    }

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Start {
            listen,
            dir,
            name,
            peer,
            chunk_size,
            max_connections,
        } => {
            let config = Config {
                listen_addr: listen,
                shared_dir: dir,
                node_name: name.unwrap_or_else(|| format!("Node-{}", listen.port())),
                chunk_size,
                max_connections,
                bootstrap_peers: peer,
                ..Config::default()
            };

            let mut node = Node::new(config).await?;
            node.run().await?;
        }
        Commands::Ping { peer } => {
            let (prober, id) = one_shot(&peer).await?;
            match prober.probe(&id).await? {
                PeerStatus::Online => println!("{} is online", id),
                status => {
                    println!("{} is {:?}", id, status);
                    std::process::exit(2);
                }
            }
        }
        Commands::List { peer } => {
            let (prober, id) = one_shot(&peer).await?;
            let files = prober.fetch_catalog(&id).await?;

            println!("Files shared by {}:", id);
            for file in &files {
                println!(
                    "  {:<40} {:>10}  {}",
                    file.name,
                    format_file_size(file.size_bytes),
                    file.modified_human
                );
            }
            println!("{} file(s)", files.len());
        }
        Commands::Download { peer, file, output } => {
            let (prober, id) = one_shot(&peer).await?;
            let dest = output.unwrap_or_else(|| PathBuf::from(&file));
            report(prober.pull(&id, &file, &dest).await)?;
            println!("Saved to {:?}", dest);
        }
        Commands::Upload { peer, file } => {
            let remote_name = file
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| P2PError::InvalidFilename(file.display().to_string()))?
                .to_string();

            let (prober, id) = one_shot(&peer).await?;
            report(prober.push(&id, &file, &remote_name).await)?;
        }
    }

    Ok(())
}

/// A prober over a registry holding only `peer`. Nothing is probed automatically.
async fn one_shot(peer: &str) -> Result<(Arc<PeerProber>, String)> {
    let addr = tokio::net::lookup_host(peer)
        .await
        .map_err(|e| P2PError::InvalidAddress(format!("{}: {}", peer, e)))?
        .next()
        .ok_or_else(|| P2PError::InvalidAddress(peer.to_string()))?;

    let config = Config::default();
    let registry = PeerRegistry::new(config.staleness_window);
    let id = registry.add(addr.ip(), addr.port(), None).await;
    let prober = Arc::new(PeerProber::new(registry, TransferTracker::new(), &config));
    Ok((prober, id))
}

fn report(outcome: TransferOutcome) -> Result<()> {
    if outcome.success {
        println!("{} ({})", outcome.message, format_file_size(outcome.bytes));
        Ok(())
    } else {
        Err(P2PError::ApplicationError(outcome.message))
    }
}
