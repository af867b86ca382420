use thiserror::Error;

pub type Result<T> = std::result::Result<T, P2PError>;

#[derive(Error, Debug)]
pub enum P2PError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Message too large: more than {0} bytes")]
    MessageTooLarge(usize),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Transfer incomplete: received {received} of {expected} bytes")]
    TransferIncomplete { expected: u64, received: u64 },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The remote side answered with `{"status": "error"}`.
    #[error("Peer error: {0}")]
    ApplicationError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl P2PError {
    /// Failures of the link itself rather than of the peer's application logic.
    pub fn is_transport_failure(&self) -> bool {
        !matches!(self, P2PError::ApplicationError(_))
    }

    /// Errors that are answered on the connection, after which it stays usable.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            P2PError::MalformedCommand(_)
                | P2PError::UnknownCommand(_)
                | P2PError::MessageTooLarge(_)
                | P2PError::FileNotFound(_)
                | P2PError::InvalidFilename(_)
        )
    }
}

impl From<std::io::Error> for P2PError {
    fn from(err: std::io::Error) -> Self {
        P2PError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for P2PError {
    fn from(err: serde_json::Error) -> Self {
        P2PError::SerializationError(err.to_string())
    }
}
