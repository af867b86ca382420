use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::utils::{P2PError, Result};

const HASH_READ_SIZE: usize = 8 * 1024;

pub struct HashUtils;

impl HashUtils {
    pub fn hash_data(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// SHA-256 of a file's contents, read incrementally.
    pub async fn hash_file(path: &Path) -> Result<String> {
        let mut file = File::open(path)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to open {:?}: {}", path, e)))?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; HASH_READ_SIZE];
        loop {
            let n = file.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_hash_matches_data_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let from_file = HashUtils::hash_file(&path).await.unwrap();
        assert_eq!(from_file, HashUtils::hash_data(&data));
        assert_eq!(from_file.len(), 64);
    }
}
