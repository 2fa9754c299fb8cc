//! Routes claimed tasks from the worker pool to their handlers.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use vidora_core::models::{Task, TaskFailure, TaskType};
use vidora_worker::TaskHandlerContext;

use crate::state::AppState;
use crate::task_handlers::{
    MetadataTaskHandler, TaskHandler, ThumbnailTaskHandler, UploadPromotionTaskHandler,
};

fn handler_for(task_type: TaskType) -> &'static dyn TaskHandler {
    match task_type {
        TaskType::PromoteVideo | TaskType::PromoteThumbnail | TaskType::PromoteSliderImage => {
            &UploadPromotionTaskHandler
        }
        TaskType::DeriveThumbnail => &ThumbnailTaskHandler,
        TaskType::ExtractMetadata => &MetadataTaskHandler,
    }
}

#[async_trait]
impl TaskHandlerContext for AppState {
    async fn dispatch_task(self: Arc<Self>, task: &Task) -> Result<serde_json::Value> {
        handler_for(task.task_type).process(task, self).await
    }

    async fn on_task_failed(self: Arc<Self>, task: &Task, failure: &TaskFailure) -> Result<()> {
        handler_for(task.task_type)
            .on_failure(task, failure, self)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidora_core::models::{
        AssetFieldUpdate, AssetKind, NewAsset, ProcessingState, PromoteUploadPayload,
        PromotionTarget,
    };
    use vidora_core::{Config, IngestConfig};
    use vidora_db::{AssetStore, MockAssetStore};
    use vidora_processing::testing::FakeToolInvoker;
    use vidora_storage::{LocalStorage, Storage};
    use vidora_worker::testing::InMemoryScheduler;
    use vidora_worker::{JobRequest, JobScheduler};

    #[tokio::test]
    async fn terminal_failure_reaches_the_promotion_hook() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        let assets = Arc::new(MockAssetStore::new());
        let scheduler = Arc::new(InMemoryScheduler::new());
        let state = Arc::new(AppState::new(
            Config::from(IngestConfig {
                database_url: "postgresql://localhost/vidora_test".to_string(),
                local_storage_path: dir.path().display().to_string(),
                ..Default::default()
            }),
            assets.clone(),
            storage.clone(),
            Arc::new(FakeToolInvoker::new()),
            scheduler.clone(),
        ));

        let asset = assets
            .create_draft(NewAsset {
                kind: AssetKind::Video,
                title: "clip".to_string(),
                description: None,
            })
            .await
            .unwrap();
        assets
            .update_fields(asset.id, &AssetFieldUpdate::promoting())
            .await
            .unwrap();
        storage.put("tmp/clip.mp4", vec![1; 8]).await.unwrap();
        let task_id = scheduler
            .enqueue(
                JobRequest::new(&PromoteUploadPayload {
                    asset_id: asset.id,
                    staged_path: "tmp/clip.mp4".to_string(),
                    target_folder: "videos".to_string(),
                    target: PromotionTarget::PrimaryVideo,
                })
                .unwrap(),
            )
            .await
            .unwrap();
        let task = scheduler.task(task_id).unwrap();

        state
            .on_task_failed(
                &task,
                &TaskFailure::Unrecoverable {
                    error: "bad".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            assets.snapshot(asset.id).unwrap().processing_state,
            ProcessingState::Failed
        );
        assert!(!storage.exists("tmp/clip.mp4").await.unwrap());
    }
}
