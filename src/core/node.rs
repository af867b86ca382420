use log::{info, warn};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::{Config, Peer, PeerProber, PeerRegistry, TransferOutcome};
use crate::network::{ConnectionHandler, ListenerHandle, ProtocolListener};
use crate::storage::{FileManager, FileMetadata, LocalCatalog};
use crate::transfer::{Downloader, TransferInfo, TransferTracker, Uploader};
use crate::utils::{P2PError, Result, format_file_size};

#[derive(Debug, Clone, Serialize)]
pub struct NodeStats {
    pub total_files: usize,
    pub total_file_size: u64,
    pub total_file_size_human: String,
    pub total_peers: usize,
    pub active_peers: usize,
    pub active_transfers: usize,
    pub server_status: &'static str,
}

/// One participant: its shared catalog, the peers it knows, and its listener.
pub struct Node {
    pub config: Config,
    catalog: Arc<dyn LocalCatalog>,
    registry: PeerRegistry,
    prober: Arc<PeerProber>,
    tracker: TransferTracker,
    listener: Option<ListenerHandle>,
    probe_queue: JoinHandle<()>,
}

impl Node {
    /// Shares `config.shared_dir` through a [`FileManager`].
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let catalog = Arc::new(FileManager::new(config.shared_dir.clone()).await?);
        Self::with_catalog(config, catalog).await
    }

    /// Starts the probe queue task, so it has to run inside a tokio runtime.
    pub async fn with_catalog(config: Config, catalog: Arc<dyn LocalCatalog>) -> Result<Self> {
        config.validate()?;

        let tracker = TransferTracker::new();
        let (probe_tx, probe_rx) = mpsc::unbounded_channel();
        let registry = PeerRegistry::new(config.staleness_window).with_probe_queue(probe_tx);
        let prober = Arc::new(PeerProber::new(registry.clone(), tracker.clone(), &config));
        let probe_queue = prober.start_probe_queue(probe_rx);

        Ok(Self {
            config,
            catalog,
            registry,
            prober,
            tracker,
            listener: None,
            probe_queue,
        })
    }

    /// Binds the listener and registers the bootstrap peers. Returns the bound address.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if let Some(listener) = &self.listener {
            return Ok(listener.local_addr());
        }

        let handler = Arc::new(ConnectionHandler::new(
            self.catalog.clone(),
            Uploader::new(self.tracker.clone(), self.config.chunk_size),
            Downloader::new(self.tracker.clone(), self.config.chunk_size),
            self.config.max_command_size,
        ));
        let listener = ProtocolListener::bind(
            self.config.listen_addr,
            self.config.backlog,
            handler,
            self.config.max_connections,
        )
        .await?
        .spawn();
        let local_addr = listener.local_addr();
        self.listener = Some(listener);

        info!(
            "Node {} serving {:?} on {}",
            self.config.node_name, self.config.shared_dir, local_addr
        );

        for entry in self.config.bootstrap_peers.clone() {
            match entry.parse::<SocketAddr>() {
                Ok(addr) => {
                    self.registry.add(addr.ip(), addr.port(), None).await;
                }
                Err(e) => warn!("Ignoring bootstrap peer {}: {}", entry, e),
            }
        }

        Ok(local_addr)
    }

    /// Runs until Ctrl+C.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        tokio::signal::ctrl_c().await?;
        info!("Ctrl+C received, shutting down");

        self.shutdown().await;
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.stop().await;
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(ListenerHandle::local_addr)
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub async fn add_peer(&self, ip: &str, port: u16, name: Option<String>) -> Result<String> {
        let ip: IpAddr = ip
            .trim()
            .parse()
            .map_err(|e| P2PError::InvalidAddress(format!("{}: {}", ip, e)))?;
        if port == 0 {
            return Err(P2PError::InvalidAddress("port must be positive".into()));
        }
        Ok(self.registry.add(ip, port, name).await)
    }

    pub async fn remove_peer(&self, peer_id: &str) -> bool {
        self.registry.remove(peer_id).await
    }

    pub async fn peers(&self) -> Vec<Peer> {
        self.registry.list().await
    }

    pub async fn active_peers(&self) -> Vec<Peer> {
        self.registry.active_peers().await
    }

    /// Queues a liveness probe; poll the registry for its outcome.
    pub async fn test_peer(&self, peer_id: &str) -> Result<()> {
        if self.registry.get(peer_id).await.is_none() {
            return Err(P2PError::PeerNotFound(peer_id.to_string()));
        }
        self.prober.spawn_probe(peer_id.to_string());
        Ok(())
    }

    /// Probes every peer independently; there is no completion signal.
    pub async fn refresh_peers(&self) -> usize {
        self.prober.probe_all().await
    }

    pub async fn peer_files(&self, peer_id: &str) -> Result<Vec<FileMetadata>> {
        self.prober.fetch_catalog(peer_id).await
    }

    /// Pulls a file from a peer into this node's own catalog.
    pub async fn download_from_peer(&self, peer_id: &str, filename: &str) -> TransferOutcome {
        match self.catalog.resolve(filename) {
            Ok(dest) => self.prober.pull(peer_id, filename, &dest).await,
            Err(e) => TransferOutcome {
                success: false,
                message: e.to_string(),
                bytes: 0,
            },
        }
    }

    /// Offers one of this node's shared files to a peer.
    pub async fn upload_to_peer(&self, peer_id: &str, filename: &str) -> TransferOutcome {
        match self.catalog.resolve(filename) {
            Ok(path) => self.prober.push(peer_id, &path, filename).await,
            Err(e) => TransferOutcome {
                success: false,
                message: e.to_string(),
                bytes: 0,
            },
        }
    }

    pub async fn local_files(&self) -> Result<Vec<FileMetadata>> {
        self.catalog.list_files().await
    }

    pub async fn remove_local_file(&self, filename: &str) -> Result<()> {
        self.catalog.remove_file(filename).await
    }

    pub async fn active_transfers(&self) -> Vec<TransferInfo> {
        self.tracker.list().await
    }

    pub async fn stats(&self) -> Result<NodeStats> {
        let files = self.catalog.list_files().await?;
        let total_file_size: u64 = files.iter().map(|f| f.size_bytes).sum();

        Ok(NodeStats {
            total_files: files.len(),
            total_file_size,
            total_file_size_human: format_file_size(total_file_size),
            total_peers: self.registry.len().await,
            active_peers: self.registry.active_peers().await.len(),
            active_transfers: self.tracker.active_count().await,
            server_status: if self.listener.is_some() {
                "running"
            } else {
                "stopped"
            },
        })
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.probe_queue.abort();
    }
}
