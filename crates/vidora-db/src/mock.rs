//! In-memory [`AssetStore`] for tests that run without a database.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use vidora_core::error::AppError;
use vidora_core::models::{AssetFieldUpdate, AssetId, AssetKind, MediaAsset, NewAsset, ProcessingState};

use crate::asset_store::AssetStore;

#[derive(Clone, Default)]
pub struct MockAssetStore {
    assets: Arc<Mutex<HashMap<AssetId, MediaAsset>>>,
    next_id: Arc<AtomicI64>,
    updates: Arc<Mutex<Vec<(AssetId, AssetFieldUpdate)>>>,
}

impl MockAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn assets(&self) -> MutexGuard<'_, HashMap<AssetId, MediaAsset>> {
        self.assets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a record as-is.
    pub fn insert(&self, asset: MediaAsset) {
        self.assets().insert(asset.id, asset);
    }

    pub fn snapshot(&self, id: AssetId) -> Option<MediaAsset> {
        self.assets().get(&id).cloned()
    }

    /// Every successful `update_fields` call, in order.
    pub fn updates(&self) -> Vec<(AssetId, AssetFieldUpdate)> {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AssetStore for MockAssetStore {
    async fn get(&self, id: AssetId) -> Result<Option<MediaAsset>, AppError> {
        Ok(self.snapshot(id))
    }

    async fn create_draft(&self, new_asset: NewAsset) -> Result<MediaAsset, AppError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let asset = MediaAsset::draft(id, new_asset);
        self.insert(asset.clone());
        Ok(asset)
    }

    async fn update_fields(
        &self,
        id: AssetId,
        update: &AssetFieldUpdate,
    ) -> Result<MediaAsset, AppError> {
        update.validate()?;
        let updated = {
            let mut assets = self.assets();
            let asset = assets.get_mut(&id).ok_or(AppError::AssetNotFound(id))?;
            update.apply_to(asset);
            asset.clone()
        };
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, update.clone()));
        Ok(updated)
    }

    async fn swap_thumbnail(&self, id: AssetId, path: &str) -> Result<String, AppError> {
        let previous = {
            let mut assets = self.assets();
            let asset = assets.get_mut(&id).ok_or(AppError::AssetNotFound(id))?;
            std::mem::replace(&mut asset.thumbnail_path, path.to_string())
        };
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, AssetFieldUpdate::thumbnail(path.to_string())));
        Ok(previous)
    }

    async fn mark_ready_if_complete(
        &self,
        id: AssetId,
        auto_activate_videos: bool,
    ) -> Result<bool, AppError> {
        let mut assets = self.assets();
        match assets.get_mut(&id) {
            Some(asset) if asset.artifacts_complete() => {
                asset.processing_state = ProcessingState::Ready;
                if asset.kind == AssetKind::Video && auto_activate_videos {
                    asset.is_active = true;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: AssetId) -> Result<bool, AppError> {
        Ok(self.assets().remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidora_core::models::{PromotionTarget, Resolution};

    fn new_video() -> NewAsset {
        NewAsset {
            kind: AssetKind::Video,
            title: "Trailer".to_string(),
            description: None,
        }
    }

    #[tokio::test]
    async fn drafts_get_sequential_ids() {
        let store = MockAssetStore::new();
        let a = store.create_draft(new_video()).await.unwrap();
        let b = store.create_draft(new_video()).await.unwrap();
        assert_eq!(a.id + 1, b.id);
        assert!(!a.is_active);
    }

    #[tokio::test]
    async fn swap_thumbnail_returns_the_replaced_path() {
        let store = MockAssetStore::new();
        let a = store.create_draft(new_video()).await.unwrap();

        assert_eq!(store.swap_thumbnail(a.id, "thumbnails/1_a.jpg").await.unwrap(), "");
        assert_eq!(
            store.swap_thumbnail(a.id, "thumbnails/1_b.jpg").await.unwrap(),
            "thumbnails/1_a.jpg"
        );
        assert_eq!(store.snapshot(a.id).unwrap().thumbnail_path, "thumbnails/1_b.jpg");
        assert!(matches!(
            store.swap_thumbnail(99, "thumbnails/x.jpg").await,
            Err(AppError::AssetNotFound(99))
        ));
    }

    #[tokio::test]
    async fn update_missing_asset_is_not_found() {
        let store = MockAssetStore::new();
        let err = store
            .update_fields(99, &AssetFieldUpdate::promoting())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AssetNotFound(99)));
    }

    #[tokio::test]
    async fn ready_only_once_every_artifact_exists() {
        let store = MockAssetStore::new();
        let asset = store.create_draft(new_video()).await.unwrap();

        store
            .update_fields(
                asset.id,
                &PromotionTarget::PrimaryVideo.success_update("videos/1_a.mp4".to_string()),
            )
            .await
            .unwrap();
        assert!(!store.mark_ready_if_complete(asset.id, false).await.unwrap());

        store
            .update_fields(asset.id, &AssetFieldUpdate::thumbnail("thumbnails/1_b.jpg".to_string()))
            .await
            .unwrap();
        store
            .update_fields(asset.id, &AssetFieldUpdate::technical(12, Resolution::default()))
            .await
            .unwrap();
        assert!(store.mark_ready_if_complete(asset.id, false).await.unwrap());

        let ready = store.snapshot(asset.id).unwrap();
        assert!(ready.is_ready());
        assert!(!ready.is_active);
        assert!(!store.mark_ready_if_complete(asset.id, false).await.unwrap());
    }
}
