use log::{debug, error, warn};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::core::{Command, Response};
use crate::network::Transport;
use crate::storage::LocalCatalog;
use crate::transfer::{Downloader, Uploader};
use crate::utils::Result;

/// Serves one inbound connection: one command at a time until the peer hangs up.
///
/// Errors the peer can be told about (bad message, unknown command, missing
/// file, bad name) are answered and the loop goes on. Anything else ends this
/// connection only.
pub struct ConnectionHandler {
    catalog: Arc<dyn LocalCatalog>,
    uploader: Uploader,
    downloader: Downloader,
    max_command_size: usize,
}

impl ConnectionHandler {
    pub fn new(
        catalog: Arc<dyn LocalCatalog>,
        uploader: Uploader,
        downloader: Downloader,
        max_command_size: usize,
    ) -> Self {
        Self {
            catalog,
            uploader,
            downloader,
            max_command_size,
        }
    }

    pub async fn handle<S>(&self, mut transport: Transport<S>, peer: &str) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let value = match transport.read_json(self.max_command_size).await {
                Ok(Some(value)) => value,
                Ok(None) => break,
                Err(e) if e.is_client_error() => {
                    warn!("Bad message from {}: {}", peer, e);
                    transport.send_json(&Response::from_error(&e)).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let command = match Command::from_value(value) {
                Ok(command) => command,
                Err(e) => {
                    warn!("Rejected command from {}: {}", peer, e);
                    transport.send_json(&Response::from_error(&e)).await?;
                    continue;
                }
            };

            debug!("Received {} from {}", command.kind(), peer);
            match self.dispatch(&mut transport, command, peer).await {
                Ok(()) => {}
                Err(e) if e.is_client_error() => {
                    debug!("Answering {} with error: {}", peer, e);
                    transport.send_json(&Response::from_error(&e)).await?;
                }
                Err(e) => return Err(e),
            }
        }

        transport.shutdown().await;
        Ok(())
    }

    async fn dispatch<S>(
        &self,
        transport: &mut Transport<S>,
        command: Command,
        peer: &str,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match command {
            Command::Ping => transport.send_json(&Response::pong()).await,
            Command::ListFiles => match self.catalog.list_files().await {
                Ok(files) => transport.send_json(&Response::file_list(files)).await,
                Err(e) => {
                    error!("Error listing files: {}", e);
                    transport.send_json(&Response::from_error(&e)).await
                }
            },
            Command::DownloadFile { filename } => {
                self.uploader
                    .serve_download(transport, self.catalog.as_ref(), &filename, peer)
                    .await
            }
            Command::UploadFile { filename, size } => {
                self.downloader
                    .serve_upload(transport, self.catalog.as_ref(), &filename, size, peer)
                    .await
            }
        }
    }
}
