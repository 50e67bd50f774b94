//! Sync error types.

use thiserror::Error;

use crate::db::StorageError;

/// Failures talking to the remote backend.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Sync is not configured
    #[error("Sync not configured. Add sync.server_url to config.")]
    NotConfigured,
    /// Request never got a response
    #[error("Network error: {0}")]
    Network(String),
    /// Remote rejected the bearer credential
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// Remote answered with a non-success status
    #[error("Server returned status {status}: {body}")]
    Status { status: u16, body: String },
    /// Response body could not be decoded
    #[error("Invalid response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Failed to transform '{collection}': {message}")]
    Transform { collection: String, message: String },
}

pub type SyncResult<T> = Result<T, SyncError>;
