pub mod downloader;
pub mod stream;
pub mod tracker;
pub mod uploader;

pub use downloader::Downloader;
pub use stream::{chunk_len, discard_partial, receive_file, send_file};
pub use tracker::{Direction, TransferInfo, TransferTicket, TransferTracker};
pub use uploader::{Uploader, read_response};
