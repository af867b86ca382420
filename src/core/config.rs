use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::{P2PError, Result};

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub shared_dir: PathBuf,
    pub node_name: String,
    pub backlog: u32,
    /// Largest bulk read/write, in bytes.
    pub chunk_size: usize,
    /// Upper bound for one inbound control message.
    pub max_command_size: usize,
    /// Upper bound for one control response read by the prober (file lists grow with the catalog).
    pub max_response_size: usize,
    pub ping_timeout: Duration,
    pub catalog_timeout: Duration,
    /// Applies to connecting, the metadata handshake and every individual bulk read.
    pub pull_timeout: Duration,
    pub staleness_window: Duration,
    /// `None` keeps one task per connection without a ceiling.
    pub max_connections: Option<usize>,
    pub max_concurrent_probes: Option<usize>,
    /// `ip:port` entries registered when the node starts.
    pub bootstrap_peers: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            shared_dir: PathBuf::from("./shared_files"),
            node_name: format!("Node-{}", DEFAULT_PORT),
            backlog: 128,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_command_size: 64 * 1024,
            max_response_size: 16 * 1024 * 1024,
            ping_timeout: Duration::from_secs(5),
            catalog_timeout: Duration::from_secs(10),
            pull_timeout: Duration::from_secs(30),
            staleness_window: Duration::from_secs(5 * 60),
            max_connections: None,
            max_concurrent_probes: None,
            bootstrap_peers: Vec::new(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(P2PError::ConfigError("chunk_size must be positive".into()));
        }
        if self.max_command_size == 0 || self.max_response_size == 0 {
            return Err(P2PError::ConfigError(
                "message size bounds must be positive".into(),
            ));
        }
        for (name, timeout) in [
            ("ping_timeout", self.ping_timeout),
            ("catalog_timeout", self.catalog_timeout),
            ("pull_timeout", self.pull_timeout),
        ] {
            if timeout.is_zero() {
                return Err(P2PError::ConfigError(format!("{} must be positive", name)));
            }
        }
        if matches!(self.max_connections, Some(0)) || matches!(self.max_concurrent_probes, Some(0))
        {
            return Err(P2PError::ConfigError(
                "concurrency limits must be positive when set".into(),
            ));
        }
        for peer in &self.bootstrap_peers {
            peer.parse::<SocketAddr>().map_err(|e| {
                P2PError::ConfigError(format!("Invalid bootstrap peer {}: {}", peer, e))
            })?;
        }
        Ok(())
    }
}
