use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use vidora_core::models::{ExtractMetadataPayload, Task, TaskFailure};

use super::{parse_payload, pipeline_failure, TaskHandler};
use crate::state::AppState;

pub struct MetadataTaskHandler;

#[async_trait]
impl TaskHandler for MetadataTaskHandler {
    #[tracing::instrument(skip(self, task, state), fields(task.id = %task.id, asset.id = tracing::field::Empty))]
    async fn process(&self, task: &Task, state: Arc<AppState>) -> Result<serde_json::Value> {
        let payload: ExtractMetadataPayload = parse_payload(task)?;
        tracing::Span::current().record("asset.id", payload.asset_id);

        let outcome = state
            .metadata_worker
            .run(&payload)
            .await
            .map_err(pipeline_failure)?;

        Ok(json!({
            "status": "success",
            "asset_id": outcome.asset_id,
            "duration_seconds": outcome.duration_seconds,
            "resolution": outcome.resolution,
            "orientation": outcome.orientation,
            "defaulted": outcome.defaulted,
            "became_ready": outcome.became_ready,
        }))
    }

    async fn on_failure(&self, task: &Task, failure: &TaskFailure, state: Arc<AppState>) -> Result<()> {
        let payload: ExtractMetadataPayload = parse_payload(task)?;
        state
            .metadata_worker
            .on_terminal_failure(&payload, failure)
            .await;
        Ok(())
    }
}
