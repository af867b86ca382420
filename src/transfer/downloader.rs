use log::{info, warn};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Duration;

use crate::core::{Command, READY_SIGNAL, Response};
use crate::network::Transport;
use crate::storage::LocalCatalog;
use crate::transfer::{Direction, TransferTracker, read_response, receive_file};
use crate::utils::{P2PError, Result};

/// Moves file bytes from a remote node onto this one.
pub struct Downloader {
    tracker: TransferTracker,
    chunk_size: usize,
}

impl Downloader {
    pub fn new(tracker: TransferTracker, chunk_size: usize) -> Self {
        Self {
            tracker,
            chunk_size,
        }
    }

    /// Answers an `upload_file` command by receiving the file into the catalog.
    ///
    /// An incomplete upload is answered here and then returned as an error, since
    /// the stream is no longer usable.
    pub async fn serve_upload<S>(
        &self,
        transport: &mut Transport<S>,
        catalog: &dyn LocalCatalog,
        filename: &str,
        size: u64,
        peer: &str,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let dest = catalog.resolve(filename)?;
        transport.send_raw(READY_SIGNAL).await?;

        let ticket = self
            .tracker
            .begin(filename, Direction::Receiving, peer, size)
            .await;
        let result = receive_file(
            transport,
            &dest,
            size,
            self.chunk_size,
            None,
            &ticket.progress,
        )
        .await;
        self.tracker.finish(&ticket.id).await;

        match result {
            Ok(received) => {
                info!("File {} received from {} ({} bytes)", filename, peer, received);
                transport
                    .send_json(&Response::success("File uploaded successfully"))
                    .await
            }
            Err(e @ P2PError::TransferIncomplete { .. }) => {
                warn!("Upload of {} from {} failed: {}", filename, peer, e);
                let _ = transport.send_json(&Response::from_error(&e)).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Client side of `download_file`: fetches `filename` from the peer into `dest`.
    ///
    /// `io_timeout` bounds the metadata exchange and every bulk read.
    pub async fn pull<S>(
        &self,
        transport: &mut Transport<S>,
        filename: &str,
        dest: &Path,
        peer: &str,
        max_response_size: usize,
        io_timeout: Duration,
    ) -> Result<u64>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        transport
            .send_json(&Command::DownloadFile {
                filename: filename.to_string(),
            })
            .await?;

        let metadata = read_response(transport, max_response_size, io_timeout)
            .await?
            .into_result()?;
        let size = metadata
            .size
            .ok_or_else(|| P2PError::InvalidResponse("Missing file size".into()))?;

        transport.send_raw(READY_SIGNAL).await?;

        let ticket = self
            .tracker
            .begin(filename, Direction::Receiving, peer, size)
            .await;
        let result = receive_file(
            transport,
            dest,
            size,
            self.chunk_size,
            Some(io_timeout),
            &ticket.progress,
        )
        .await;
        self.tracker.finish(&ticket.id).await;

        let received = result?;
        info!("Downloaded {} from {} ({} bytes)", filename, peer, received);
        Ok(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileManager;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_serve_upload_incomplete_is_not_listed() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FileManager::new(dir.path().to_path_buf()).await.unwrap();
        let downloader = Downloader::new(TransferTracker::new(), 1024);

        let (client, server) = duplex(64 * 1024);
        let mut server = Transport::new(server);
        let mut client = Transport::new(client);

        client.send_raw(&[1u8; 500]).await.unwrap();
        let serve = tokio::spawn(async move {
            let result = downloader
                .serve_upload(&mut server, &catalog, "half.bin", 2000, "test")
                .await;
            (result, catalog)
        });

        assert!(client.expect_signal(READY_SIGNAL).await.unwrap());
        drop(client);

        let (result, catalog) = serve.await.unwrap();
        assert!(matches!(result, Err(P2PError::TransferIncomplete { .. })));
        assert!(catalog.list_files().await.unwrap().is_empty());
        assert!(!dir.path().join("half.bin").exists());
    }

    #[tokio::test]
    async fn test_serve_upload_rejects_bad_name_before_ready() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FileManager::new(dir.path().to_path_buf()).await.unwrap();
        let downloader = Downloader::new(TransferTracker::new(), 1024);

        let (_client, server) = duplex(1024);
        let mut server = Transport::new(server);

        let result = downloader
            .serve_upload(&mut server, &catalog, "../escape.txt", 10, "test")
            .await;
        assert!(matches!(result, Err(P2PError::InvalidFilename(_))));
    }
}
