use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use vidora_core::models::{PromoteUploadPayload, Task, TaskFailure};
use vidora_core::TaskError;

use super::{parse_payload, pipeline_failure, TaskHandler};
use crate::state::AppState;

/// Serves `promote_video`, `promote_thumbnail` and `promote_slider_image`.
pub struct UploadPromotionTaskHandler;

impl UploadPromotionTaskHandler {
    fn payload(task: &Task) -> Result<PromoteUploadPayload> {
        let payload: PromoteUploadPayload = parse_payload(task)?;
        if payload.target.task_type() != task.task_type {
            return Err(TaskError::unrecoverable(anyhow::anyhow!(
                "{} task carries a {} promotion target",
                task.task_type,
                payload.target
            ))
            .into());
        }
        Ok(payload)
    }
}

#[async_trait]
impl TaskHandler for UploadPromotionTaskHandler {
    #[tracing::instrument(skip(self, task, state), fields(task.id = %task.id, task.type = %task.task_type, asset.id = tracing::field::Empty))]
    async fn process(&self, task: &Task, state: Arc<AppState>) -> Result<serde_json::Value> {
        let payload = Self::payload(task)?;
        tracing::Span::current().record("asset.id", payload.asset_id);

        tracing::info!(
            asset_id = payload.asset_id,
            attempt = task.attempt(),
            staged_path = %payload.staged_path,
            "Processing upload promotion task"
        );

        let outcome = state
            .promotion_worker
            .run(&payload)
            .await
            .map_err(pipeline_failure)?;

        Ok(json!({
            "status": "success",
            "asset_id": outcome.asset_id,
            "path": outcome.path,
            "already_promoted": outcome.already_promoted,
            "became_ready": outcome.became_ready,
        }))
    }

    async fn on_failure(&self, task: &Task, failure: &TaskFailure, state: Arc<AppState>) -> Result<()> {
        let payload = Self::payload(task)?;
        state
            .promotion_worker
            .on_terminal_failure(&payload, failure)
            .await?;
        Ok(())
    }
}
