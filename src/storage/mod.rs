pub mod catalog;
pub mod file_manager;
pub mod hash;

pub use catalog::{
    FileMetadata, LocalCatalog, PARTIAL_SUFFIX, partial_path, validate_filename,
};
pub use file_manager::FileManager;
pub use hash::HashUtils;
