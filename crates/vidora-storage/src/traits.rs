//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must implement.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Move failed: {0}")]
    MoveFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage abstraction trait
///
/// Keys are relative paths below the storage root, e.g. `tmp/upload-3.mp4` or
/// `videos/17_4f2c....mp4`. Keys must not contain `..` or start with `/`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write `data` to `key`, creating parent folders as needed.
    async fn put(&self, key: &str, data: Vec<u8>) -> StorageResult<()>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Size in bytes; `NotFound` when the key does not exist.
    async fn content_length(&self, key: &str) -> StorageResult<u64>;

    /// Move `from_key` to `to_key`.
    ///
    /// The source never disappears without the destination being fully written.
    async fn rename(&self, from_key: &str, to_key: &str) -> StorageResult<()>;

    /// Remove `key`. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Filesystem path for `key`, handed to external tools.
    fn local_path(&self, key: &str) -> StorageResult<PathBuf>;
}
