pub mod connection;
pub mod listener;
pub mod transport;

pub use connection::ConnectionHandler;
pub use listener::{ListenerHandle, ProtocolListener};
pub use transport::Transport;
