//! Bulk phase shared by all four transfer flows.
//!
//! Exactly the negotiated number of bytes crosses the wire, in pieces of at most
//! `chunk_size`. Receivers write into a hidden partial file and only rename it
//! onto the destination once every declared byte has arrived.

use log::{debug, warn};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{self as async_fs, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Duration, timeout};

use crate::network::Transport;
use crate::storage::partial_path;
use crate::utils::{P2PError, Result};

/// Size of the next read or write: never past the declared total.
pub fn chunk_len(chunk_size: usize, remaining: u64) -> usize {
    remaining.min(chunk_size as u64) as usize
}

pub async fn send_file<S>(
    transport: &mut Transport<S>,
    path: &Path,
    size: u64,
    chunk_size: usize,
    idle_timeout: Option<Duration>,
    progress: &AtomicU64,
) -> Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut file = File::open(path)
        .await
        .map_err(|e| P2PError::IoError(format!("Failed to open {:?}: {}", path, e)))?;

    let mut buffer = vec![0u8; chunk_size];
    let mut sent = 0u64;
    while sent < size {
        let want = chunk_len(chunk_size, size - sent);
        let n = file.read(&mut buffer[..want]).await?;
        if n == 0 {
            // Truncated on disk after the size was announced.
            return Err(P2PError::TransferIncomplete {
                expected: size,
                received: sent,
            });
        }
        let write = transport.send_raw(&buffer[..n]);
        match idle_timeout {
            Some(limit) => timeout(limit, write)
                .await
                .map_err(|_| P2PError::Timeout("Peer stopped accepting file data".into()))??,
            None => write.await?,
        }
        sent += n as u64;
        progress.fetch_add(n as u64, Ordering::Relaxed);
    }

    debug!("Sent {} bytes from {:?}", sent, path);
    Ok(sent)
}

/// Receives exactly `size` bytes into `dest`.
///
/// `idle_timeout` bounds each individual read. On any failure `dest` is left
/// untouched and the partial file is removed.
pub async fn receive_file<S>(
    transport: &mut Transport<S>,
    dest: &Path,
    size: u64,
    chunk_size: usize,
    idle_timeout: Option<Duration>,
    progress: &AtomicU64,
) -> Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let partial = partial_path(dest);
    match write_partial(transport, &partial, size, chunk_size, idle_timeout, progress).await {
        Ok(received) => {
            async_fs::rename(&partial, dest).await.map_err(|e| {
                P2PError::IoError(format!("Failed to move {:?} into place: {}", dest, e))
            })?;
            debug!("Received {} bytes into {:?}", received, dest);
            Ok(received)
        }
        Err(e) => {
            discard_partial(dest).await;
            Err(e)
        }
    }
}

async fn write_partial<S>(
    transport: &mut Transport<S>,
    partial: &Path,
    size: u64,
    chunk_size: usize,
    idle_timeout: Option<Duration>,
    progress: &AtomicU64,
) -> Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut file = File::create(partial)
        .await
        .map_err(|e| P2PError::IoError(format!("Failed to create {:?}: {}", partial, e)))?;

    let mut buffer = vec![0u8; chunk_size];
    let mut received = 0u64;
    while received < size {
        let want = chunk_len(chunk_size, size - received);
        let read = transport.read_chunk(&mut buffer[..want]);
        let n = match idle_timeout {
            Some(limit) => timeout(limit, read)
                .await
                .map_err(|_| P2PError::Timeout("Waiting for file data".into()))??,
            None => read.await?,
        };
        if n == 0 {
            break;
        }
        file.write_all(&buffer[..n]).await?;
        received += n as u64;
        progress.fetch_add(n as u64, Ordering::Relaxed);
    }
    file.flush().await?;

    if received != size {
        return Err(P2PError::TransferIncomplete {
            expected: size,
            received,
        });
    }
    Ok(received)
}

/// Removes whatever a failed or abandoned receive into `dest` left behind.
pub async fn discard_partial(dest: &Path) {
    let partial = partial_path(dest);
    match async_fs::remove_file(&partial).await {
        Ok(()) => debug!("Removed incomplete file {:?}", partial),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove incomplete file {:?}: {}", partial, e),
    }
}
