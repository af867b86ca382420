use log::{info, warn};
use std::path::Path;
use tokio::fs as async_fs;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{Duration, timeout};

use crate::core::{Command, READY_SIGNAL, Response};
use crate::network::Transport;
use crate::storage::LocalCatalog;
use crate::transfer::{Direction, TransferTracker, send_file};
use crate::utils::{P2PError, Result};

/// Moves file bytes from this node to a remote one.
pub struct Uploader {
    tracker: TransferTracker,
    chunk_size: usize,
}

impl Uploader {
    pub fn new(tracker: TransferTracker, chunk_size: usize) -> Self {
        Self {
            tracker,
            chunk_size,
        }
    }

    /// Answers a `download_file` command.
    ///
    /// Unknown or invalid names come back as errors for the caller to answer; in
    /// that case nothing has been written and no ready signal is awaited.
    pub async fn serve_download<S>(
        &self,
        transport: &mut Transport<S>,
        catalog: &dyn LocalCatalog,
        filename: &str,
        peer: &str,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let path = catalog.resolve(filename)?;
        let size = match async_fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Err(P2PError::FileNotFound(filename.to_string())),
        };

        transport
            .send_json(&Response::transfer_metadata(filename, size))
            .await?;

        if !transport.expect_signal(READY_SIGNAL).await? {
            warn!("{} did not send ready for {}", peer, filename);
            transport.send_json(&Response::error("Client not ready")).await?;
            return Ok(());
        }

        let ticket = self
            .tracker
            .begin(filename, Direction::Sending, peer, size)
            .await;
        let result = send_file(
            transport,
            &path,
            size,
            self.chunk_size,
            None,
            &ticket.progress,
        )
        .await;
        self.tracker.finish(&ticket.id).await;

        let sent = result?;
        info!("File {} sent to {} ({} bytes)", filename, peer, sent);
        Ok(())
    }

    /// Client side of `upload_file`: offers `local_path` to the peer as `remote_name`.
    pub async fn push<S>(
        &self,
        transport: &mut Transport<S>,
        local_path: &Path,
        remote_name: &str,
        peer: &str,
        max_response_size: usize,
        io_timeout: Duration,
    ) -> Result<u64>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let size = match async_fs::metadata(local_path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Err(P2PError::FileNotFound(local_path.display().to_string())),
        };

        transport
            .send_json(&Command::UploadFile {
                filename: remote_name.to_string(),
                size,
            })
            .await?;

        let ready = timeout(io_timeout, transport.expect_signal(READY_SIGNAL))
            .await
            .map_err(|_| P2PError::Timeout(format!("Waiting for {} to accept upload", peer)))??;
        if !ready {
            // The peer refused with a regular response instead.
            let refusal = read_response(transport, max_response_size, io_timeout).await?;
            refusal.into_result()?;
            return Err(P2PError::ProtocolViolation(
                "Expected ready signal".to_string(),
            ));
        }

        let ticket = self
            .tracker
            .begin(remote_name, Direction::Sending, peer, size)
            .await;
        let result = send_file(
            transport,
            local_path,
            size,
            self.chunk_size,
            Some(io_timeout),
            &ticket.progress,
        )
        .await;
        self.tracker.finish(&ticket.id).await;
        let sent = result?;

        read_response(transport, max_response_size, io_timeout)
            .await?
            .into_result()?;
        info!("Uploaded {} to {} ({} bytes)", remote_name, peer, sent);
        Ok(sent)
    }
}

/// Reads one control response, bounded in size and time.
pub async fn read_response<S>(
    transport: &mut Transport<S>,
    max_size: usize,
    io_timeout: Duration,
) -> Result<Response>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let value = timeout(io_timeout, transport.read_json(max_size))
        .await
        .map_err(|_| P2PError::Timeout("Waiting for response".into()))?
        .map_err(|e| match e {
            P2PError::MalformedCommand(reason) => P2PError::InvalidResponse(reason),
            other => other,
        })?
        .ok_or_else(|| P2PError::ConnectionFailed("Peer closed the connection".into()))?;

    Response::from_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileManager;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_serve_download_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FileManager::new(dir.path().to_path_buf()).await.unwrap();
        let uploader = Uploader::new(TransferTracker::new(), 8192);

        let (_client, server) = duplex(1024);
        let mut transport = Transport::new(server);

        let result = uploader
            .serve_download(&mut transport, &catalog, "ghost.txt", "test")
            .await;
        assert!(matches!(result, Err(P2PError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_serve_download_streams_exact_bytes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.bin"), vec![9u8; 20_000]).unwrap();
        let catalog = FileManager::new(dir.path().to_path_buf()).await.unwrap();
        let tracker = TransferTracker::new();
        let uploader = Uploader::new(tracker.clone(), 4096);

        let (client, server) = duplex(64 * 1024);
        let mut server = Transport::new(server);
        let mut client = Transport::new(client);

        client.send_raw(READY_SIGNAL).await.unwrap();
        uploader
            .serve_download(&mut server, &catalog, "data.bin", "test")
            .await
            .unwrap();
        drop(server);

        let meta = client.read_json(1024).await.unwrap().unwrap();
        assert_eq!(meta["size"], 20_000);

        let mut total = 0;
        let mut buffer = [0u8; 4096];
        loop {
            let n = client.read_chunk(&mut buffer).await.unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, 20_000);
        assert_eq!(tracker.active_count().await, 0);
    }
}
