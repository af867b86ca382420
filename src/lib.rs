//! Peer-to-peer file exchange over TCP.
//!
//! Every node shares one directory, answers JSON commands on a single port,
//! and keeps a registry of the peers it knows about.

pub mod core;
pub mod network;
pub mod storage;
pub mod transfer;
pub mod utils;

pub use core::{Config, Node, NodeStats, Peer, PeerProber, PeerRegistry, PeerStatus};
pub use storage::{FileManager, FileMetadata, LocalCatalog};
pub use utils::error::{P2PError, Result};
