//! Control messages exchanged before any bulk phase.
//!
//! Every message is one bare JSON object. The only non-JSON control token is
//! [`READY_SIGNAL`], sent by whichever side is about to receive bulk bytes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::FileMetadata;
use crate::utils::{P2PError, Result};

pub const READY_SIGNAL: &[u8] = b"ready";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Ping,
    ListFiles,
    DownloadFile {
        filename: String,
    },
    UploadFile {
        filename: String,
        size: u64,
    },
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Ping => "ping",
            Command::ListFiles => "list_files",
            Command::DownloadFile { .. } => "download_file",
            Command::UploadFile { .. } => "upload_file",
        }
    }

    /// Interprets one decoded JSON value as a command.
    pub fn from_value(value: Value) -> Result<Self> {
        let kind = match value.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(_) => return Err(P2PError::MalformedCommand("type must be a string".into())),
            None if value.is_object() => {
                return Err(P2PError::MalformedCommand("missing command type".into()));
            }
            None => return Err(P2PError::MalformedCommand("Invalid JSON command".into())),
        };

        match kind.as_str() {
            "ping" | "list_files" => {}
            "download_file" => {
                if !has_string(&value, "filename") {
                    return Err(P2PError::MalformedCommand("Filename required".into()));
                }
            }
            "upload_file" => {
                if !has_string(&value, "filename") || !value.get("size").is_some_and(Value::is_u64)
                {
                    return Err(P2PError::MalformedCommand(
                        "Filename and size required".into(),
                    ));
                }
            }
            _ => return Err(P2PError::UnknownCommand(kind)),
        }

        serde_json::from_value(value).map_err(|e| P2PError::MalformedCommand(e.to_string()))
    }
}

fn has_string(value: &Value, field: &str) -> bool {
    value
        .get(field)
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// `{"status": ..., "message"?: ..., ...payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileMetadata>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl Response {
    fn new(status: ResponseStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            files: None,
            filename: None,
            size: None,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(ResponseStatus::Success, Some(message.into()))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ResponseStatus::Error, Some(message.into()))
    }

    pub fn pong() -> Self {
        Self::success("pong")
    }

    pub fn file_list(files: Vec<FileMetadata>) -> Self {
        Self {
            files: Some(files),
            ..Self::new(ResponseStatus::Success, None)
        }
    }

    /// Announces the bulk phase of a download.
    pub fn transfer_metadata(filename: impl Into<String>, size: u64) -> Self {
        Self {
            filename: Some(filename.into()),
            size: Some(size),
            ..Self::new(ResponseStatus::Success, None)
        }
    }

    pub fn from_error(err: &P2PError) -> Self {
        let message = match err {
            P2PError::MalformedCommand(reason) => reason.clone(),
            P2PError::UnknownCommand(_) => "Unknown command".to_string(),
            P2PError::FileNotFound(_) => "File not found".to_string(),
            P2PError::TransferIncomplete { .. } => "Incomplete file transfer".to_string(),
            other => other.to_string(),
        };
        Self::error(message)
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Turns an error response into [`P2PError::ApplicationError`].
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(P2PError::ApplicationError(
                self.message.unwrap_or_else(|| "Unknown error".to_string()),
            ))
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| P2PError::InvalidResponse(e.to_string()))
    }
}
