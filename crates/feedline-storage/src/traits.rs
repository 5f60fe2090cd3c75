//! Storage abstraction trait
//!
//! This module defines the Storage trait that all object storage backends must implement.

use crate::StorageBackend;
use async_trait::async_trait;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid public id or URL: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("Storage call timed out after {0}s")]
    Timeout(u64),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// An object stored by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub public_id: String,
    /// Durable, publicly reachable URL.
    pub url: String,
}

/// Outcome of a delete by public id. Both variants are success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Nothing was stored under the public id.
    AlreadyAbsent,
}

/// Storage abstraction trait
///
/// Backends store objects under a caller-chosen public id. Uploading twice to the same
/// public id overwrites the object, which is what makes redelivered ingestion events safe.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Upload `data` under `public_id`. `filename` supplies the extension of the served URL.
    async fn upload(
        &self,
        public_id: &str,
        filename: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> StorageResult<StoredObject>;

    /// Delete the object stored under `public_id`. Deleting a missing object succeeds.
    async fn delete(&self, public_id: &str) -> StorageResult<DeleteOutcome>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
