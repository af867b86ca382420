use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};

use crate::network::{ConnectionHandler, Transport};
use crate::utils::{P2PError, Result};

/// Accept loop that gives every connection its own task.
pub struct ProtocolListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Arc<ConnectionHandler>,
    connection_limit: Option<Arc<Semaphore>>,
}

/// Running listener. Dropping it stops the accept loop as well.
pub struct ListenerHandle {
    local_addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl ProtocolListener {
    pub async fn bind(
        addr: SocketAddr,
        backlog: u32,
        handler: Arc<ConnectionHandler>,
        max_connections: Option<usize>,
    ) -> Result<Self> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|e| P2PError::NetworkError(format!("Failed to create socket: {}", e)))?;

        socket
            .set_reuseaddr(true)
            .map_err(|e| P2PError::NetworkError(format!("Failed to set reuse_address: {}", e)))?;
        socket
            .bind(addr)
            .map_err(|e| P2PError::NetworkError(format!("Failed to bind to {}: {}", addr, e)))?;
        let listener = socket
            .listen(backlog)
            .map_err(|e| P2PError::NetworkError(format!("Failed to listen on {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;

        info!("Listening for connections on {}", local_addr);
        Ok(Self {
            listener,
            local_addr,
            handler,
            connection_limit: max_connections.map(|n| Arc::new(Semaphore::new(n))),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn spawn(self) -> ListenerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let local_addr = self.local_addr;
        let task = tokio::spawn(self.run(shutdown_rx));

        ListenerHandle {
            local_addr,
            shutdown_tx,
            task,
        }
    }

    async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        loop {
            // With a cap, accepting waits until a connection slot frees up.
            let permit = match &self.connection_limit {
                Some(limit) => tokio::select! {
                    permit = limit.clone().acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    },
                    _ = shutdown_rx.recv() => break,
                },
                None => None,
            };

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("New connection from: {}", addr);
                        if let Err(e) = stream.set_nodelay(true) {
                            error!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                        }

                        let handler = self.handler.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            let peer = addr.to_string();
                            if let Err(e) = handler.handle(Transport::new(stream), &peer).await {
                                error!("Error handling client {}: {}", addr, e);
                            }
                            info!("Connection closed for {}", addr);
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        info!("Listener on {} stopped", self.local_addr);
    }
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Closes the listening socket. Connections already accepted keep running.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}
