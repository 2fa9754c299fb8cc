//! Thumbnail derivation worker
//!
//! Extracts one frame from the promoted video into the temp folder, checks that a
//! non-empty image actually landed there, then promotes it like any other upload.
//! The extractor's exit status is never taken as proof of a frame.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;
use vidora_core::constants::DERIVED_THUMBNAIL_EXTENSION;
use vidora_core::models::{AssetId, DeriveThumbnailPayload, TaskFailure};
use vidora_db::AssetStore;
use vidora_storage::keys::folder_key;
use vidora_storage::{Storage, StorageError};

use super::{delete_quietly, load_asset, resolve_source};
use crate::error::PipelineError;
use crate::promoter::Promoter;
use crate::tools::{FrameRequest, ToolInvoker};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ThumbnailOutcome {
    pub asset_id: AssetId,
    pub thumbnail_path: String,
    pub offset_seconds: f64,
    pub became_ready: bool,
}

#[derive(Clone)]
pub struct ThumbnailDerivationWorker {
    assets: Arc<dyn AssetStore>,
    promoter: Promoter,
    tools: Arc<dyn ToolInvoker>,
    temp_folder: String,
    quality: u8,
    auto_activate_videos: bool,
}

impl ThumbnailDerivationWorker {
    pub fn new(
        assets: Arc<dyn AssetStore>,
        promoter: Promoter,
        tools: Arc<dyn ToolInvoker>,
        temp_folder: impl Into<String>,
        quality: u8,
        auto_activate_videos: bool,
    ) -> Self {
        Self {
            assets,
            promoter,
            tools,
            temp_folder: temp_folder.into(),
            quality,
            auto_activate_videos,
        }
    }

    fn storage(&self) -> &Arc<dyn Storage> {
        self.promoter.storage()
    }

    #[tracing::instrument(skip(self, payload), fields(
        asset_id = payload.asset_id,
        offset_seconds = payload.offset_seconds,
        source_path = tracing::field::Empty
    ))]
    pub async fn run(&self, payload: &DeriveThumbnailPayload) -> Result<ThumbnailOutcome, PipelineError> {
        let asset = load_asset(self.assets.as_ref(), payload.asset_id).await?;
        let source = resolve_source(&asset, payload.source_path.as_deref())?;
        tracing::Span::current().record("source_path", source.as_str());

        self.promoter.verify_source(&source).await?;

        let frame_key = folder_key(
            &self.temp_folder,
            &format!(
                "{}_{}.{}",
                payload.asset_id,
                Uuid::new_v4().simple(),
                DERIVED_THUMBNAIL_EXTENSION
            ),
        );

        let thumbnail_path = match self
            .extract_and_promote(payload, &source, &frame_key)
            .await
        {
            Ok(path) => path,
            Err(e) => {
                delete_quietly(self.storage().as_ref(), &frame_key).await;
                return Err(e);
            }
        };

        let previous = match self
            .assets
            .swap_thumbnail(payload.asset_id, &thumbnail_path)
            .await
        {
            Ok(previous) => previous,
            Err(e) => {
                delete_quietly(self.storage().as_ref(), &thumbnail_path).await;
                return Err(e.into());
            }
        };

        if !previous.is_empty() && previous != thumbnail_path {
            delete_quietly(self.storage().as_ref(), &previous).await;
        }

        let became_ready = self
            .assets
            .mark_ready_if_complete(payload.asset_id, self.auto_activate_videos)
            .await?;

        tracing::info!(
            asset_id = payload.asset_id,
            thumbnail_path = %thumbnail_path,
            became_ready = became_ready,
            "Thumbnail derived"
        );

        Ok(ThumbnailOutcome {
            asset_id: payload.asset_id,
            thumbnail_path,
            offset_seconds: payload.offset_seconds,
            became_ready,
        })
    }

    async fn extract_and_promote(
        &self,
        payload: &DeriveThumbnailPayload,
        source: &str,
        frame_key: &str,
    ) -> Result<String, PipelineError> {
        let destination = self.storage().local_path(frame_key)?;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(StorageError::from)?;
        }

        let request = FrameRequest {
            source: self.storage().local_path(source)?,
            offset_seconds: payload.offset_seconds,
            quality: self.quality,
            destination,
        };
        self.tools.extract_frame(&request).await?;

        match self.storage().content_length(frame_key).await {
            Ok(size) if size > 0 => {}
            Ok(_) => return Err(PipelineError::tool("ffmpeg", "extracted frame is empty")),
            Err(StorageError::NotFound(_)) => {
                return Err(PipelineError::tool("ffmpeg", "no frame was written"));
            }
            Err(e) => return Err(e.into()),
        }

        self.promoter
            .promote(payload.asset_id, frame_key, &payload.target_folder)
            .await
    }

    /// A video without a thumbnail stays viewable; the gap is only logged.
    pub async fn on_terminal_failure(&self, payload: &DeriveThumbnailPayload, failure: &TaskFailure) {
        tracing::warn!(
            asset_id = payload.asset_id,
            offset_seconds = payload.offset_seconds,
            reason = %failure.message(),
            "Thumbnail derivation gave up, asset left without a derived thumbnail"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeToolInvoker;
    use async_trait::async_trait;
    use tempfile::TempDir;
    use vidora_core::error::AppError;
    use vidora_core::models::{AssetFieldUpdate, AssetKind, MediaAsset, NewAsset, PromotionTarget};
    use vidora_db::MockAssetStore;
    use vidora_storage::LocalStorage;

    struct Fixture {
        _dir: TempDir,
        storage: Arc<dyn Storage>,
        assets: MockAssetStore,
        tools: Arc<FakeToolInvoker>,
        worker: ThumbnailDerivationWorker,
    }

    async fn fixture(tools: FakeToolInvoker) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        let assets = MockAssetStore::new();
        let tools = Arc::new(tools);
        let worker = ThumbnailDerivationWorker::new(
            Arc::new(assets.clone()),
            Promoter::new(storage.clone()),
            tools.clone(),
            "tmp",
            2,
            false,
        );
        Fixture {
            _dir: dir,
            storage,
            assets,
            tools,
            worker,
        }
    }

    async fn promoted_video(f: &Fixture) -> MediaAsset {
        let asset = f
            .assets
            .create_draft(NewAsset {
                kind: AssetKind::Video,
                title: "clip".to_string(),
                description: None,
            })
            .await
            .unwrap();
        f.storage.put("videos/1_v.mp4", vec![0; 256]).await.unwrap();
        f.assets
            .update_fields(
                asset.id,
                &PromotionTarget::PrimaryVideo.success_update("videos/1_v.mp4".to_string()),
            )
            .await
            .unwrap()
    }

    fn payload(asset_id: AssetId) -> DeriveThumbnailPayload {
        DeriveThumbnailPayload {
            asset_id,
            offset_seconds: 2.0,
            target_folder: "thumbnails".to_string(),
            source_path: None,
        }
    }

    #[tokio::test]
    async fn derives_and_records_thumbnail() {
        let f = fixture(FakeToolInvoker::new()).await;
        let asset = promoted_video(&f).await;

        let outcome = f.worker.run(&payload(asset.id)).await.unwrap();

        let stored = f.assets.snapshot(asset.id).unwrap();
        assert_eq!(stored.thumbnail_path, outcome.thumbnail_path);
        assert!(outcome.thumbnail_path.starts_with("thumbnails/"));
        assert!(outcome.thumbnail_path.ends_with(".jpg"));
        assert!(f.storage.content_length(&outcome.thumbnail_path).await.unwrap() > 0);

        let requests = f.tools.frame_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].offset_seconds, 2.0);
        assert_eq!(requests[0].quality, 2);
    }

    #[tokio::test]
    async fn tool_failure_keeps_previous_thumbnail_and_activity() {
        let f = fixture(FakeToolInvoker::new().failing_frames()).await;
        let mut asset = promoted_video(&f).await;
        asset.thumbnail_path = "thumbnails/old.jpg".to_string();
        asset.is_active = true;
        f.assets.insert(asset.clone());

        let err = f.worker.run(&payload(asset.id)).await.unwrap_err();

        assert!(matches!(err, PipelineError::ToolInvocationFailed { .. }));
        assert!(err.is_retryable());
        let stored = f.assets.snapshot(asset.id).unwrap();
        assert_eq!(stored.thumbnail_path, "thumbnails/old.jpg");
        assert!(stored.is_active);
    }

    #[tokio::test]
    async fn empty_frame_counts_as_failure() {
        let f = fixture(FakeToolInvoker::new().empty_frames()).await;
        let asset = promoted_video(&f).await;

        let err = f.worker.run(&payload(asset.id)).await.unwrap_err();

        assert!(matches!(err, PipelineError::ToolInvocationFailed { tool: "ffmpeg", .. }));
        assert!(f.assets.snapshot(asset.id).unwrap().thumbnail_path.is_empty());
        let mut leftovers = tokio::fs::read_dir(f._dir.path().join("tmp")).await.unwrap();
        assert!(leftovers.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unpromoted_video_fails_fast() {
        let f = fixture(FakeToolInvoker::new()).await;
        let asset = f
            .assets
            .create_draft(NewAsset {
                kind: AssetKind::Video,
                title: "clip".to_string(),
                description: None,
            })
            .await
            .unwrap();

        let err = f.worker.run(&payload(asset.id)).await.unwrap_err();

        assert!(matches!(err, PipelineError::SourceMissing(_)));
        assert!(f.tools.frame_requests().is_empty());
    }

    #[tokio::test]
    async fn regeneration_replaces_previous_file() {
        let f = fixture(FakeToolInvoker::new()).await;
        let asset = promoted_video(&f).await;

        let first = f.worker.run(&payload(asset.id)).await.unwrap();
        let second = f.worker.run(&payload(asset.id)).await.unwrap();

        assert_ne!(first.thumbnail_path, second.thumbnail_path);
        assert!(!f.storage.exists(&first.thumbnail_path).await.unwrap());
        assert!(f.storage.exists(&second.thumbnail_path).await.unwrap());
    }

    /// Serves a fixed snapshot from `get`, as if the row was read before another
    /// derivation wrote its thumbnail.
    struct StaleReads {
        inner: MockAssetStore,
        snapshot: MediaAsset,
    }

    #[async_trait]
    impl AssetStore for StaleReads {
        async fn get(&self, _id: AssetId) -> Result<Option<MediaAsset>, AppError> {
            Ok(Some(self.snapshot.clone()))
        }

        async fn create_draft(&self, new_asset: NewAsset) -> Result<MediaAsset, AppError> {
            self.inner.create_draft(new_asset).await
        }

        async fn update_fields(
            &self,
            id: AssetId,
            update: &AssetFieldUpdate,
        ) -> Result<MediaAsset, AppError> {
            self.inner.update_fields(id, update).await
        }

        async fn swap_thumbnail(&self, id: AssetId, path: &str) -> Result<String, AppError> {
            self.inner.swap_thumbnail(id, path).await
        }

        async fn mark_ready_if_complete(
            &self,
            id: AssetId,
            auto_activate_videos: bool,
        ) -> Result<bool, AppError> {
            self.inner.mark_ready_if_complete(id, auto_activate_videos).await
        }

        async fn delete(&self, id: AssetId) -> Result<bool, AppError> {
            self.inner.delete(id).await
        }
    }

    #[tokio::test]
    async fn overlapping_derivations_leave_one_thumbnail() {
        let f = fixture(FakeToolInvoker::new()).await;
        let asset = promoted_video(&f).await;
        let before_first = f.assets.snapshot(asset.id).unwrap();

        let first = f.worker.run(&payload(asset.id)).await.unwrap();

        let late = ThumbnailDerivationWorker::new(
            Arc::new(StaleReads {
                inner: f.assets.clone(),
                snapshot: before_first,
            }),
            Promoter::new(f.storage.clone()),
            f.tools.clone(),
            "tmp",
            2,
            false,
        );
        let second = late.run(&payload(asset.id)).await.unwrap();

        assert_eq!(
            f.assets.snapshot(asset.id).unwrap().thumbnail_path,
            second.thumbnail_path
        );
        assert!(!f.storage.exists(&first.thumbnail_path).await.unwrap());
        let mut entries = tokio::fs::read_dir(f._dir.path().join("thumbnails")).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
    }
}
