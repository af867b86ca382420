use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};

use crate::storage::FileMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    Unknown,
    Online,
    /// Unreachable: refused, reset or timed out.
    Offline,
    /// Reachable, but answered with an error response.
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Peer {
    pub id: String,
    pub ip: IpAddr,
    pub port: u16,
    pub name: String,
    pub last_seen: DateTime<Utc>,
    pub status: PeerStatus,
    pub known_files: Vec<FileMetadata>,
}

impl Peer {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn is_active(&self, now: DateTime<Utc>, staleness_window: Duration) -> bool {
        if self.status != PeerStatus::Online {
            return false;
        }
        // A last_seen in the future (clock adjustment) counts as fresh.
        now.signed_duration_since(self.last_seen)
            .to_std()
            .map(|age| age <= staleness_window)
            .unwrap_or(true)
    }
}

pub fn peer_id(ip: IpAddr, port: u16) -> String {
    SocketAddr::new(ip, port).to_string()
}

/// Known peers keyed by `ip:port`.
///
/// Cloning shares the same table. Readers only ever get copies.
#[derive(Clone)]
pub struct PeerRegistry {
    peers: Arc<RwLock<HashMap<String, Peer>>>,
    staleness_window: Duration,
    probe_tx: Option<mpsc::UnboundedSender<String>>,
}

impl PeerRegistry {
    pub fn new(staleness_window: Duration) -> Self {
        Self {
            peers: Arc::new(RwLock::new(HashMap::new())),
            staleness_window,
            probe_tx: None,
        }
    }

    /// Every added peer's id is queued here for a liveness probe.
    pub fn with_probe_queue(mut self, probe_tx: mpsc::UnboundedSender<String>) -> Self {
        self.probe_tx = Some(probe_tx);
        self
    }

    /// Inserts or replaces a peer and queues a probe. Returns its id.
    pub async fn add(&self, ip: IpAddr, port: u16, name: Option<String>) -> String {
        let id = peer_id(ip, port);
        let peer = Peer {
            id: id.clone(),
            ip,
            port,
            name: name.filter(|n| !n.trim().is_empty()).unwrap_or_else(|| id.clone()),
            last_seen: Utc::now(),
            status: PeerStatus::Unknown,
            known_files: Vec::new(),
        };

        self.peers.write().await.insert(id.clone(), peer);
        info!("Added peer: {}", id);

        if let Some(tx) = &self.probe_tx {
            if tx.send(id.clone()).is_err() {
                debug!("Probe queue closed, {} not probed", id);
            }
        }
        id
    }

    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.peers.write().await.remove(id).is_some();
        if removed {
            info!("Removed peer: {}", id);
        }
        removed
    }

    pub async fn get(&self, id: &str) -> Option<Peer> {
        self.peers.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<Peer> {
        let peers = self.peers.read().await;
        let mut snapshot: Vec<Peer> = peers.values().cloned().collect();
        snapshot.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot
    }

    pub async fn ids(&self) -> Vec<String> {
        self.peers.read().await.keys().cloned().collect()
    }

    pub async fn active_peers(&self) -> Vec<Peer> {
        self.active_peers_at(Utc::now()).await
    }

    pub async fn active_peers_at(&self, now: DateTime<Utc>) -> Vec<Peer> {
        self.list()
            .await
            .into_iter()
            .filter(|peer| peer.is_active(now, self.staleness_window))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Successful contact. Returns false if the peer was removed meanwhile.
    pub async fn mark_online(&self, id: &str, seen_at: DateTime<Utc>) -> bool {
        self.update(id, |peer| {
            peer.status = PeerStatus::Online;
            peer.last_seen = seen_at;
        })
        .await
    }

    pub async fn set_status(&self, id: &str, status: PeerStatus) -> bool {
        self.update(id, |peer| peer.status = status).await
    }

    pub async fn record_catalog(
        &self,
        id: &str,
        files: Vec<FileMetadata>,
        seen_at: DateTime<Utc>,
    ) -> bool {
        self.update(id, |peer| {
            peer.known_files = files;
            peer.last_seen = seen_at;
        })
        .await
    }

    async fn update<F>(&self, id: &str, apply: F) -> bool
    where
        F: FnOnce(&mut Peer),
    {
        match self.peers.write().await.get_mut(id) {
            Some(peer) => {
                apply(peer);
                true
            }
            None => false,
        }
    }
}
