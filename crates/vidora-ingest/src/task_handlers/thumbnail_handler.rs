use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use vidora_core::models::{DeriveThumbnailPayload, Task, TaskFailure};

use super::{parse_payload, pipeline_failure, TaskHandler};
use crate::state::AppState;

pub struct ThumbnailTaskHandler;

#[async_trait]
impl TaskHandler for ThumbnailTaskHandler {
    #[tracing::instrument(skip(self, task, state), fields(task.id = %task.id, asset.id = tracing::field::Empty))]
    async fn process(&self, task: &Task, state: Arc<AppState>) -> Result<serde_json::Value> {
        let payload: DeriveThumbnailPayload = parse_payload(task)?;
        tracing::Span::current().record("asset.id", payload.asset_id);

        tracing::info!(
            asset_id = payload.asset_id,
            attempt = task.attempt(),
            offset_seconds = payload.offset_seconds,
            "Processing thumbnail derivation task"
        );

        let outcome = state
            .thumbnail_worker
            .run(&payload)
            .await
            .map_err(pipeline_failure)?;

        Ok(json!({
            "status": "success",
            "asset_id": outcome.asset_id,
            "thumbnail_path": outcome.thumbnail_path,
            "offset_seconds": outcome.offset_seconds,
            "became_ready": outcome.became_ready,
        }))
    }

    async fn on_failure(&self, task: &Task, failure: &TaskFailure, state: Arc<AppState>) -> Result<()> {
        let payload: DeriveThumbnailPayload = parse_payload(task)?;
        state
            .thumbnail_worker
            .on_terminal_failure(&payload, failure)
            .await;
        Ok(())
    }
}
