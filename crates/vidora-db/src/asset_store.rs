//! Asset store trait
//!
//! The minimal interface the pipeline workers and the lifecycle service need from the
//! asset table, so they can be exercised without a database.

use async_trait::async_trait;
use vidora_core::error::AppError;
use vidora_core::models::{AssetFieldUpdate, AssetId, MediaAsset, NewAsset};

use crate::db::asset::AssetRepository;

#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn get(&self, id: AssetId) -> Result<Option<MediaAsset>, AppError>;

    async fn create_draft(&self, new_asset: NewAsset) -> Result<MediaAsset, AppError>;

    /// Partial update of exactly the fields owned by the caller.
    /// Fails with `AssetNotFound` when the row is gone.
    async fn update_fields(
        &self,
        id: AssetId,
        update: &AssetFieldUpdate,
    ) -> Result<MediaAsset, AppError>;

    /// Set `thumbnail_path` and return the value it replaced, atomically.
    async fn swap_thumbnail(&self, id: AssetId, path: &str) -> Result<String, AppError>;

    /// Conditional `processed → ready` transition; see [`MediaAsset::artifacts_complete`].
    async fn mark_ready_if_complete(
        &self,
        id: AssetId,
        auto_activate_videos: bool,
    ) -> Result<bool, AppError>;

    async fn delete(&self, id: AssetId) -> Result<bool, AppError>;
}

#[async_trait]
impl AssetStore for AssetRepository {
    async fn get(&self, id: AssetId) -> Result<Option<MediaAsset>, AppError> {
        AssetRepository::get(self, id).await
    }

    async fn create_draft(&self, new_asset: NewAsset) -> Result<MediaAsset, AppError> {
        AssetRepository::create_draft(self, new_asset).await
    }

    async fn update_fields(
        &self,
        id: AssetId,
        update: &AssetFieldUpdate,
    ) -> Result<MediaAsset, AppError> {
        AssetRepository::update_fields(self, id, update).await
    }

    async fn swap_thumbnail(&self, id: AssetId, path: &str) -> Result<String, AppError> {
        AssetRepository::swap_thumbnail(self, id, path).await
    }

    async fn mark_ready_if_complete(
        &self,
        id: AssetId,
        auto_activate_videos: bool,
    ) -> Result<bool, AppError> {
        AssetRepository::mark_ready_if_complete(self, id, auto_activate_videos).await
    }

    async fn delete(&self, id: AssetId) -> Result<bool, AppError> {
        AssetRepository::delete(self, id).await
    }
}
