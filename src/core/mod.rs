pub mod config;
pub mod node;
pub mod peer;
pub mod prober;
pub mod protocol;

pub use config::Config;
pub use node::{Node, NodeStats};
pub use peer::{Peer, PeerRegistry, PeerStatus, peer_id};
pub use prober::{PeerProber, TransferOutcome};
pub use protocol::{Command, READY_SIGNAL, Response, ResponseStatus};
