pub mod error;
pub mod format;
pub mod logger;

pub use error::{P2PError, Result};
pub use format::{format_file_size, guess_mime_type};
pub use logger::{setup_logging, setup_logging_at};
