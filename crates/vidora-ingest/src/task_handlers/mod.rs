//! Task handlers, one per pipeline job kind.

mod metadata_handler;
mod thumbnail_handler;
mod upload_promotion_handler;

pub use metadata_handler::MetadataTaskHandler;
pub use thumbnail_handler::ThumbnailTaskHandler;
pub use upload_promotion_handler::UploadPromotionTaskHandler;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use vidora_core::models::{Task, TaskFailure, TaskPayload};
use vidora_core::TaskError;
use vidora_processing::PipelineError;

use crate::state::AppState;

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn process(&self, task: &Task, state: Arc<AppState>) -> Result<serde_json::Value>;

    /// Runs once after the task has failed for good.
    async fn on_failure(
        &self,
        _task: &Task,
        _failure: &TaskFailure,
        _state: Arc<AppState>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Deserialize the payload; a payload that does not parse never will.
pub(crate) fn parse_payload<P: TaskPayload>(task: &Task) -> Result<P> {
    task.try_payload_as::<P>().map_err(|e| {
        TaskError::unrecoverable(
            anyhow::Error::new(e).context(format!("Failed to parse {} payload", task.task_type)),
        )
        .into()
    })
}

/// Carry the worker's retry classification through to the queue.
pub(crate) fn pipeline_failure(err: PipelineError) -> anyhow::Error {
    tracing::warn!(error = %err, kind = err.kind(), retryable = err.is_retryable(), "Pipeline step failed");
    TaskError::from(err).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use vidora_core::models::{ExtractMetadataPayload, TaskStatus, TaskType};

    fn task(payload: serde_json::Value) -> Task {
        Task {
            id: Uuid::new_v4(),
            task_type: TaskType::ExtractMetadata,
            status: TaskStatus::Running,
            priority: 5,
            payload,
            result: None,
            scheduled_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
            retry_count: 0,
            max_retries: 1,
            timeout_seconds: Some(600),
            depends_on: None,
            cancel_on_dep_failure: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn malformed_payload_is_unrecoverable() {
        let err = parse_payload::<ExtractMetadataPayload>(&task(serde_json::json!({"asset": 1})))
            .unwrap_err();
        assert!(!TaskError::is_recoverable_error(&err));
        assert!(format!("{:#}", err).contains("extract_metadata"));
    }

    #[test]
    fn well_formed_payload_parses() {
        let payload = parse_payload::<ExtractMetadataPayload>(&task(
            serde_json::json!({"asset_id": 4, "source_path": null}),
        ))
        .unwrap();
        assert_eq!(payload.asset_id, 4);
        assert!(payload.source_path.is_none());
    }

    #[test]
    fn pipeline_classification_survives() {
        let missing = pipeline_failure(PipelineError::SourceMissing("tmp/a.mp4".into()));
        assert!(TaskError::is_recoverable_error(&missing));

        let gone = pipeline_failure(PipelineError::AssetNotFound(4));
        assert!(!TaskError::is_recoverable_error(&gone));
    }
}
