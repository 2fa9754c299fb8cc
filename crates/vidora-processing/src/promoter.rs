//! Temp-to-permanent promotion.

use std::sync::Arc;
use uuid::Uuid;
use vidora_core::models::AssetId;
use vidora_storage::keys::{extension, folder_key};
use vidora_storage::{Storage, StorageError};

use crate::error::PipelineError;

/// Size of the file at `key`, failing with `SourceMissing` or `EmptySource`.
pub async fn verify_source(storage: &dyn Storage, key: &str) -> Result<u64, PipelineError> {
    match storage.content_length(key).await {
        Ok(0) => Err(PipelineError::EmptySource(key.to_string())),
        Ok(size) => Ok(size),
        Err(StorageError::NotFound(_)) => Err(PipelineError::SourceMissing(key.to_string())),
        Err(e) => Err(e.into()),
    }
}

/// Moves staged files into permanent folders.
///
/// Touches storage only; callers persist the returned key.
#[derive(Clone)]
pub struct Promoter {
    storage: Arc<dyn Storage>,
}

impl Promoter {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub async fn verify_source(&self, staged_path: &str) -> Result<u64, PipelineError> {
        verify_source(self.storage.as_ref(), staged_path).await
    }

    /// `{asset_id}_{token}.{ext}`, keeping the staged file's extension when it has one.
    pub fn generate_name(asset_id: AssetId, staged_path: &str) -> String {
        let token = Uuid::new_v4().simple();
        match extension(staged_path) {
            Some(ext) => format!("{}_{}.{}", asset_id, token, ext),
            None => format!("{}_{}", asset_id, token),
        }
    }

    /// Verify the staged file and move it to `{target_folder}/{generated name}`.
    ///
    /// On a failed move the source stays where it was.
    #[tracing::instrument(skip(self), fields(asset_id = asset_id, target_path = tracing::field::Empty))]
    pub async fn promote(
        &self,
        asset_id: AssetId,
        staged_path: &str,
        target_folder: &str,
    ) -> Result<String, PipelineError> {
        let size = self.verify_source(staged_path).await?;
        let target_path = folder_key(target_folder, &Self::generate_name(asset_id, staged_path));
        tracing::Span::current().record("target_path", target_path.as_str());

        match self.storage.rename(staged_path, &target_path).await {
            Ok(()) => {}
            Err(StorageError::NotFound(_)) => {
                return Err(PipelineError::SourceMissing(staged_path.to_string()));
            }
            Err(e) => {
                return Err(PipelineError::PromotionFailed {
                    from: staged_path.to_string(),
                    to: target_path,
                    reason: e.to_string(),
                });
            }
        }

        tracing::info!(
            asset_id = asset_id,
            staged_path = %staged_path,
            target_path = %target_path,
            size_bytes = size,
            "Staged file promoted"
        );
        Ok(target_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vidora_storage::LocalStorage;

    async fn promoter() -> (TempDir, Arc<dyn Storage>, Promoter) {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        let promoter = Promoter::new(storage.clone());
        (dir, storage, promoter)
    }

    #[test]
    fn generated_names_are_unique_and_keep_extension() {
        let a = Promoter::generate_name(7, "tmp/upload.MOV");
        let b = Promoter::generate_name(7, "tmp/upload.MOV");
        assert_ne!(a, b);
        assert!(a.starts_with("7_"));
        assert!(a.ends_with(".mov"));
        assert!(!Promoter::generate_name(7, "tmp/raw").contains('.'));
    }

    #[tokio::test]
    async fn promotes_into_target_folder() {
        let (_dir, storage, promoter) = promoter().await;
        storage.put("tmp/up.mp4", vec![1; 64]).await.unwrap();

        let path = promoter.promote(3, "tmp/up.mp4", "videos").await.unwrap();

        assert!(path.starts_with("videos/3_"));
        assert!(path.ends_with(".mp4"));
        assert!(!storage.exists("tmp/up.mp4").await.unwrap());
        assert_eq!(storage.content_length(&path).await.unwrap(), 64);
    }

    #[tokio::test]
    async fn missing_source_is_reported() {
        let (_dir, _storage, promoter) = promoter().await;
        let err = promoter.promote(3, "tmp/gone.mp4", "videos").await.unwrap_err();
        assert!(matches!(err, PipelineError::SourceMissing(p) if p == "tmp/gone.mp4"));
    }

    #[tokio::test]
    async fn empty_source_creates_no_destination() {
        let (dir, storage, promoter) = promoter().await;
        storage.put("tmp/empty.mp4", Vec::new()).await.unwrap();

        let err = promoter.promote(3, "tmp/empty.mp4", "videos").await.unwrap_err();

        assert!(matches!(err, PipelineError::EmptySource(_)));
        assert!(!dir.path().join("videos").exists());
        assert!(storage.exists("tmp/empty.mp4").await.unwrap());
    }

    #[tokio::test]
    async fn rejected_target_leaves_source_in_place() {
        let (_dir, storage, promoter) = promoter().await;
        storage.put("tmp/up.mp4", vec![1; 8]).await.unwrap();

        let err = promoter.promote(3, "tmp/up.mp4", "../outside").await.unwrap_err();

        assert!(matches!(err, PipelineError::PromotionFailed { .. }));
        assert!(storage.exists("tmp/up.mp4").await.unwrap());
    }
}
