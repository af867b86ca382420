use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

use crate::utils::{P2PError, Result};

/// Suffix of files still being received. They never show up in a listing.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Snapshot of one shared file, as relayed on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    #[serde(default)]
    pub size_human: String,
    #[serde(rename = "modified", deserialize_with = "deserialize_timestamp")]
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub modified_human: String,
    #[serde(rename = "type", default = "default_mime_type")]
    pub mime_type: String,
    #[serde(default)]
    pub extension: String,
    #[serde(rename = "hash", default)]
    pub content_hash: Option<String>,
}

fn default_mime_type() -> String {
    "application/octet-stream".to_string()
}

// Peers may send offset-less ISO timestamps; those are read as UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

/// The set of files this node offers.
#[async_trait]
pub trait LocalCatalog: Send + Sync {
    async fn list_files(&self) -> Result<Vec<FileMetadata>>;

    async fn get_file_info(&self, name: &str) -> Result<Option<FileMetadata>>;

    async fn remove_file(&self, name: &str) -> Result<()>;

    /// Path a file of this name lives at. Fails for names that would escape the catalog.
    fn resolve(&self, name: &str) -> Result<PathBuf>;
}

/// Accepts plain file names only.
pub fn validate_filename(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || name.ends_with(PARTIAL_SUFFIX);

    if invalid {
        return Err(P2PError::InvalidFilename(name.to_string()));
    }
    Ok(())
}

/// Hidden sibling that receives bytes before being renamed onto `dest`.
pub fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}{}", name, PARTIAL_SUFFIX))
}
