use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sending,
    Receiving,
}

/// Point-in-time view of one transfer.
#[derive(Debug, Clone, Serialize)]
pub struct TransferInfo {
    pub id: Uuid,
    pub filename: String,
    pub direction: Direction,
    pub peer: String,
    pub total_bytes: u64,
    pub bytes_transferred: u64,
    pub started_at: DateTime<Utc>,
}

struct ActiveTransfer {
    filename: String,
    direction: Direction,
    peer: String,
    total_bytes: u64,
    progress: Arc<AtomicU64>,
    started_at: DateTime<Utc>,
}

/// Handle held by whoever moves the bytes.
#[derive(Debug, Clone)]
pub struct TransferTicket {
    pub id: Uuid,
    pub progress: Arc<AtomicU64>,
}

/// In-flight transfers across all connections and probes.
#[derive(Clone, Default)]
pub struct TransferTracker {
    transfers: Arc<RwLock<HashMap<Uuid, ActiveTransfer>>>,
}

impl TransferTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn begin(
        &self,
        filename: &str,
        direction: Direction,
        peer: &str,
        total_bytes: u64,
    ) -> TransferTicket {
        let id = Uuid::new_v4();
        let progress = Arc::new(AtomicU64::new(0));

        self.transfers.write().await.insert(
            id,
            ActiveTransfer {
                filename: filename.to_string(),
                direction,
                peer: peer.to_string(),
                total_bytes,
                progress: progress.clone(),
                started_at: Utc::now(),
            },
        );
        debug!("Transfer {} started: {:?} {} ({})", id, direction, filename, peer);

        TransferTicket { id, progress }
    }

    pub async fn finish(&self, id: &Uuid) -> bool {
        let removed = self.transfers.write().await.remove(id).is_some();
        if removed {
            debug!("Transfer {} ended", id);
        }
        removed
    }

    pub async fn list(&self) -> Vec<TransferInfo> {
        let transfers = self.transfers.read().await;
        transfers
            .iter()
            .map(|(id, t)| TransferInfo {
                id: *id,
                filename: t.filename.clone(),
                direction: t.direction,
                peer: t.peer.clone(),
                total_bytes: t.total_bytes,
                bytes_transferred: t.progress.load(Ordering::Relaxed),
                started_at: t.started_at,
            })
            .collect()
    }

    pub async fn active_count(&self) -> usize {
        self.transfers.read().await.len()
    }
}
