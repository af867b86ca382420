use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;

use crate::storage::{FileMetadata, HashUtils, LocalCatalog, PARTIAL_SUFFIX, validate_filename};
use crate::utils::{P2PError, Result, format_file_size, guess_mime_type};

/// Directory-backed catalog.
pub struct FileManager {
    shared_dir: PathBuf,
}

impl FileManager {
    pub async fn new(shared_dir: PathBuf) -> Result<Self> {
        async_fs::create_dir_all(&shared_dir)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to create directory: {}", e)))?;

        info!("Sharing files from: {:?}", shared_dir);
        Ok(Self { shared_dir })
    }

    async fn describe(&self, name: &str, path: &Path) -> Result<FileMetadata> {
        let metadata = async_fs::metadata(path)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to read metadata: {}", e)))?;

        let modified_at: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());

        // An unreadable file is still listed, just without a digest.
        let content_hash = match HashUtils::hash_file(path).await {
            Ok(hash) => Some(hash),
            Err(e) => {
                warn!("Failed to hash {:?}: {}", path, e);
                None
            }
        };

        let extension = Path::new(name)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
            .unwrap_or_default();

        Ok(FileMetadata {
            name: name.to_string(),
            size_bytes: metadata.len(),
            size_human: format_file_size(metadata.len()),
            modified_at,
            modified_human: modified_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            mime_type: guess_mime_type(name).to_string(),
            extension,
            content_hash,
        })
    }
}

#[async_trait]
impl LocalCatalog for FileManager {
    async fn list_files(&self) -> Result<Vec<FileMetadata>> {
        let mut entries = async_fs::read_dir(&self.shared_dir)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to read directory: {}", e)))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to read directory entry: {}", e)))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(PARTIAL_SUFFIX) {
                continue;
            }

            let path = entry.path();
            match entry.file_type().await {
                Ok(file_type) if file_type.is_file() => {}
                _ => continue,
            }

            match self.describe(&name, &path).await {
                Ok(meta) => files.push(meta),
                // Removed between read_dir and stat.
                Err(e) => warn!("Skipping {:?}: {}", path, e),
            }
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("Listed {} files in {:?}", files.len(), self.shared_dir);
        Ok(files)
    }

    async fn get_file_info(&self, name: &str) -> Result<Option<FileMetadata>> {
        let path = self.resolve(name)?;
        match async_fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(self.describe(name, &path).await?)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_file(&self, name: &str) -> Result<()> {
        let path = self.resolve(name)?;
        match async_fs::remove_file(&path).await {
            Ok(()) => {
                info!("Removed file: {}", name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(P2PError::FileNotFound(name.to_string()))
            }
            Err(e) => Err(P2PError::IoError(format!("Failed to remove {}: {}", name, e))),
        }
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        validate_filename(name)?;
        Ok(self.shared_dir.join(name))
    }
}
