use crate::keys::is_valid_key;
use crate::traits::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// errno for a rename across filesystems.
#[cfg(unix)]
const EXDEV: i32 = 18;

fn is_cross_device(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(EXDEV)
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

/// Local filesystem storage implementation
///
/// Temp and permanent folders live under one root so promotion is normally a single
/// `rename(2)`.
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at `base_path` (created if missing).
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Convert storage key to filesystem path, rejecting keys that could escape the root.
    fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        if !is_valid_key(storage_key) {
            return Err(StorageError::InvalidKey(format!(
                "Storage key '{}' contains invalid characters",
                storage_key
            )));
        }
        Ok(self.base_path.join(storage_key))
    }

    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

/// Copy `from` to `to`, sync the copy, then remove `from`.
///
/// Used when `rename` crosses a filesystem boundary. The source is only removed once
/// the destination is durable.
pub(crate) async fn copy_then_remove(from: &Path, to: &Path) -> StorageResult<()> {
    let mut source = fs::File::open(from).await.map_err(|e| {
        StorageError::MoveFailed(format!("Failed to open {}: {}", from.display(), e))
    })?;
    let mut dest = fs::File::create(to).await.map_err(|e| {
        StorageError::MoveFailed(format!("Failed to create {}: {}", to.display(), e))
    })?;

    let copied = tokio::io::copy(&mut source, &mut dest).await;
    let synced = match copied {
        Ok(_) => dest.sync_all().await,
        Err(e) => Err(e),
    };
    if let Err(e) = synced {
        drop(dest);
        let _ = fs::remove_file(to).await;
        return Err(StorageError::MoveFailed(format!(
            "Failed to copy {} to {}: {}",
            from.display(),
            to.display(),
            e
        )));
    }

    fs::remove_file(from).await.map_err(|e| {
        StorageError::MoveFailed(format!(
            "Copied to {} but failed to remove {}: {}",
            to.display(),
            from.display(),
            e
        ))
    })
}

#[async_trait]
impl Storage for LocalStorage {
    async fn put(&self, key: &str, data: Vec<u8>) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        let size = data.len();

        self.ensure_parent_dir(&path).await?;

        let start = std::time::Instant::now();

        let mut file = fs::File::create(&path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", path.display(), e))
        })?;

        file.write_all(&data).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to write file {}: {}", path.display(), e))
        })?;

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file {}: {}", path.display(), e))
        })?;

        tracing::debug!(
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage write successful"
        );

        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(key)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    async fn content_length(&self, key: &str) -> StorageResult<u64> {
        let path = self.key_to_path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            Ok(_) => Err(StorageError::InvalidKey(format!("{} is not a file", key))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    async fn rename(&self, from_key: &str, to_key: &str) -> StorageResult<()> {
        let from_path = self.key_to_path(from_key)?;
        let to_path = self.key_to_path(to_key)?;

        if !fs::try_exists(&from_path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(from_key.to_string()));
        }

        self.ensure_parent_dir(&to_path).await?;

        let start = std::time::Instant::now();
        match fs::rename(&from_path, &to_path).await {
            Ok(()) => {}
            Err(e) if is_cross_device(&e) => {
                tracing::debug!(
                    from_key = %from_key,
                    to_key = %to_key,
                    "Rename crosses devices, falling back to copy"
                );
                copy_then_remove(&from_path, &to_path).await?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(from_key.to_string()));
            }
            Err(e) => {
                return Err(StorageError::MoveFailed(format!(
                    "Failed to move {} to {}: {}",
                    from_path.display(),
                    to_path.display(),
                    e
                )));
            }
        }

        tracing::debug!(
            from_key = %from_key,
            to_key = %to_key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage move successful"
        );

        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_to_path(key)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(key = %key, "Local storage delete successful");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "Failed to delete file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn local_path(&self, key: &str) -> StorageResult<PathBuf> {
        self.key_to_path(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn storage(dir: &tempfile::TempDir) -> LocalStorage {
        LocalStorage::new(dir.path()).await.unwrap()
    }

    async fn contents(storage: &LocalStorage, key: &str) -> Vec<u8> {
        fs::read(storage.local_path(key).unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn test_put_writes_under_root() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir).await;

        storage.put("tmp/a.txt", b"hello".to_vec()).await.unwrap();
        assert_eq!(contents(&storage, "tmp/a.txt").await, b"hello");
        assert_eq!(storage.content_length("tmp/a.txt").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir).await;

        let result = storage.content_length("../../../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.delete("../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.exists("/etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir).await;

        storage.put("videos/x.mp4", b"x".to_vec()).await.unwrap();
        storage.delete("videos/x.mp4").await.unwrap();
        storage.delete("videos/x.mp4").await.unwrap();
        assert!(!storage.exists("videos/x.mp4").await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_moves_into_new_folder() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir).await;

        storage.put("tmp/up.mp4", b"video".to_vec()).await.unwrap();
        storage.rename("tmp/up.mp4", "videos/1_abc.mp4").await.unwrap();

        assert!(!storage.exists("tmp/up.mp4").await.unwrap());
        assert_eq!(contents(&storage, "videos/1_abc.mp4").await, b"video");
    }

    #[tokio::test]
    async fn test_rename_missing_source_is_not_found() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir).await;

        let result = storage.rename("tmp/missing.mp4", "videos/x.mp4").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_copy_then_remove_keeps_content() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("src.bin");
        let to = dir.path().join("dst.bin");
        tokio::fs::write(&from, b"payload").await.unwrap();

        copy_then_remove(&from, &to).await.unwrap();

        assert!(!from.exists());
        assert_eq!(tokio::fs::read(&to).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_local_path_is_under_root() {
        let dir = tempdir().unwrap();
        let storage = storage(&dir).await;

        let path = storage.local_path("videos/a.mp4").unwrap();
        assert!(path.starts_with(dir.path()));
        assert!(storage.local_path("../a.mp4").is_err());
    }
}
