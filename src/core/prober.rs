use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};

use crate::core::{Command, Config, Peer, PeerRegistry, PeerStatus, Response};
use crate::network::Transport;
use crate::storage::FileMetadata;
use crate::transfer::{Downloader, TransferTracker, Uploader, read_response};
use crate::utils::{P2PError, Result};

/// `(success, message)` result of a pull or push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferOutcome {
    pub success: bool,
    pub message: String,
    pub bytes: u64,
}

impl TransferOutcome {
    fn completed(message: &str, bytes: u64) -> Self {
        Self {
            success: true,
            message: message.to_string(),
            bytes,
        }
    }

    fn failed(err: &P2PError) -> Self {
        let message = match err {
            P2PError::ApplicationError(message) => message.clone(),
            P2PError::TransferIncomplete { .. } => "Incomplete file transfer".to_string(),
            other => other.to_string(),
        };
        Self {
            success: false,
            message,
            bytes: 0,
        }
    }
}

/// Client half of the protocol. Every operation uses its own short-lived connection.
pub struct PeerProber {
    registry: PeerRegistry,
    uploader: Uploader,
    downloader: Downloader,
    ping_timeout: Duration,
    catalog_timeout: Duration,
    pull_timeout: Duration,
    max_response_size: usize,
    probe_limit: Option<Arc<Semaphore>>,
}

impl PeerProber {
    pub fn new(registry: PeerRegistry, tracker: TransferTracker, config: &Config) -> Self {
        Self {
            registry,
            uploader: Uploader::new(tracker.clone(), config.chunk_size),
            downloader: Downloader::new(tracker, config.chunk_size),
            ping_timeout: config.ping_timeout,
            catalog_timeout: config.catalog_timeout,
            pull_timeout: config.pull_timeout,
            max_response_size: config.max_response_size,
            probe_limit: config
                .max_concurrent_probes
                .map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    async fn peer(&self, peer_id: &str) -> Result<Peer> {
        self.registry
            .get(peer_id)
            .await
            .ok_or_else(|| P2PError::PeerNotFound(peer_id.to_string()))
    }

    /// Pings the peer and records the outcome as its status.
    pub async fn probe(&self, peer_id: &str) -> Result<PeerStatus> {
        let peer = self.peer(peer_id).await?;

        let reply = self
            .exchange(peer.addr(), &Command::Ping, self.ping_timeout)
            .await
            .and_then(Response::into_result);

        let status = match reply {
            Ok(_) => {
                self.registry.mark_online(peer_id, Utc::now()).await;
                info!("Peer {} is online", peer_id);
                PeerStatus::Online
            }
            Err(e) if e.is_transport_failure() => {
                self.registry.set_status(peer_id, PeerStatus::Offline).await;
                warn!("Peer {} is offline: {}", peer_id, e);
                PeerStatus::Offline
            }
            Err(e) => {
                self.registry.set_status(peer_id, PeerStatus::Error).await;
                warn!("Peer {} responded with error: {}", peer_id, e);
                PeerStatus::Error
            }
        };
        Ok(status)
    }

    /// Fetches the peer's catalog into `known_files`. Failures leave the entry as it was.
    pub async fn fetch_catalog(&self, peer_id: &str) -> Result<Vec<FileMetadata>> {
        let peer = self.peer(peer_id).await?;

        let response = self
            .exchange(peer.addr(), &Command::ListFiles, self.catalog_timeout)
            .await
            .and_then(Response::into_result)
            .inspect_err(|e| error!("Error getting files from peer {}: {}", peer_id, e))?;

        let files = response.files.unwrap_or_default();
        self.registry
            .record_catalog(peer_id, files.clone(), Utc::now())
            .await;
        debug!("Peer {} offers {} files", peer_id, files.len());
        Ok(files)
    }

    /// Downloads `filename` from the peer into `dest`. Peer state is not touched.
    pub async fn pull(&self, peer_id: &str, filename: &str, dest: &Path) -> TransferOutcome {
        match self.try_pull(peer_id, filename, dest).await {
            Ok(bytes) => TransferOutcome::completed("File downloaded successfully", bytes),
            Err(e) => {
                error!("Error downloading {} from peer {}: {}", filename, peer_id, e);
                TransferOutcome::failed(&e)
            }
        }
    }

    async fn try_pull(&self, peer_id: &str, filename: &str, dest: &Path) -> Result<u64> {
        let peer = self.peer(peer_id).await?;
        let mut transport = Transport::connect(peer.addr(), self.pull_timeout).await?;

        let result = self
            .downloader
            .pull(
                &mut transport,
                filename,
                dest,
                peer_id,
                self.max_response_size,
                self.pull_timeout,
            )
            .await;
        transport.shutdown().await;
        result
    }

    /// Uploads a local file to the peer under `remote_name`.
    pub async fn push(
        &self,
        peer_id: &str,
        local_path: &Path,
        remote_name: &str,
    ) -> TransferOutcome {
        match self.try_push(peer_id, local_path, remote_name).await {
            Ok(bytes) => TransferOutcome::completed("File uploaded successfully", bytes),
            Err(e) => {
                error!("Error uploading {} to peer {}: {}", remote_name, peer_id, e);
                TransferOutcome::failed(&e)
            }
        }
    }

    async fn try_push(&self, peer_id: &str, local_path: &Path, remote_name: &str) -> Result<u64> {
        let peer = self.peer(peer_id).await?;
        let mut transport = Transport::connect(peer.addr(), self.pull_timeout).await?;

        let result = self
            .uploader
            .push(
                &mut transport,
                local_path,
                remote_name,
                peer_id,
                self.max_response_size,
                self.pull_timeout,
            )
            .await;
        transport.shutdown().await;
        result
    }

    /// One command, one response, bounded as a whole by `limit`.
    async fn exchange(
        &self,
        addr: SocketAddr,
        command: &Command,
        limit: Duration,
    ) -> Result<Response> {
        let attempt = async {
            let mut transport = Transport::connect(addr, limit).await?;
            transport.send_json(command).await?;
            let response = read_response(&mut transport, self.max_response_size, limit).await;
            transport.shutdown().await;
            response
        };

        timeout(limit, attempt)
            .await
            .map_err(|_| P2PError::Timeout(format!("{} to {}", command.kind(), addr)))?
    }

    /// Fire-and-forget probe.
    pub fn spawn_probe(self: &Arc<Self>, peer_id: String) -> JoinHandle<()> {
        let prober = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = match &prober.probe_limit {
                Some(limit) => match limit.clone().acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                None => None,
            };

            if let Err(e) = prober.probe(&peer_id).await {
                // Removed before the probe ran.
                debug!("Probe of {} skipped: {}", peer_id, e);
            }
        })
    }

    /// Starts one independent probe per known peer. Returns how many were started.
    pub async fn probe_all(self: &Arc<Self>) -> usize {
        let ids = self.registry.ids().await;
        for id in &ids {
            self.spawn_probe(id.clone());
        }
        ids.len()
    }

    /// Probes every id that arrives on the registry's probe queue.
    pub fn start_probe_queue(
        self: &Arc<Self>,
        mut probe_rx: mpsc::UnboundedReceiver<String>,
    ) -> JoinHandle<()> {
        let prober = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(peer_id) = probe_rx.recv().await {
                prober.spawn_probe(peer_id);
            }
            debug!("Probe queue closed");
        })
    }
}
