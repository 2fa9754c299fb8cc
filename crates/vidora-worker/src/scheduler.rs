//! Job submission seam
//!
//! The lifecycle service only needs to enqueue jobs and cancel an asset's pending jobs;
//! it never sees the queue's storage or worker pool.

use anyhow::{Context, Result};
use async_trait::async_trait;
use uuid::Uuid;

use vidora_core::models::{AssetId, Priority, TaskPayload, TaskType};

/// One job to enqueue. Attempt budget and timeout come from the task type.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub depends_on: Vec<Uuid>,
    /// Cancel instead of running if a dependency ends failed or cancelled.
    pub cancel_on_dep_failure: bool,
}

impl JobRequest {
    pub fn new<P: TaskPayload>(payload: &P) -> Result<Self> {
        Ok(Self {
            task_type: payload.task_type(),
            payload: payload.to_value().context("Failed to serialize task payload")?,
            priority: Priority::Normal,
            depends_on: Vec::new(),
            cancel_on_dep_failure: false,
        })
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Run only after `task_id` completes; cancelled if it fails.
    pub fn after(mut self, task_id: Uuid) -> Self {
        self.depends_on.push(task_id);
        self.cancel_on_dep_failure = true;
        self
    }

    pub fn depends_on(&self) -> Option<Vec<Uuid>> {
        (!self.depends_on.is_empty()).then(|| self.depends_on.clone())
    }
}

/// Durable, at-least-once job submission.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Returns as soon as the job is persisted.
    async fn enqueue(&self, request: JobRequest) -> Result<Uuid>;

    /// Cancel every job for `asset_id` that has not started yet.
    async fn cancel_for_asset(&self, asset_id: AssetId) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidora_core::models::{ExtractMetadataPayload, PromoteUploadPayload, PromotionTarget};

    #[test]
    fn request_takes_type_from_payload() {
        let request = JobRequest::new(&PromoteUploadPayload {
            asset_id: 3,
            staged_path: "tmp/a.mp4".to_string(),
            target_folder: "videos".to_string(),
            target: PromotionTarget::PrimaryVideo,
        })
        .unwrap()
        .with_priority(Priority::High);

        assert_eq!(request.task_type, TaskType::PromoteVideo);
        assert_eq!(request.payload["asset_id"], 3);
        assert_eq!(request.priority, Priority::High);
        assert_eq!(request.depends_on(), None);
    }

    #[test]
    fn dependent_requests_cancel_on_failure() {
        let parent = Uuid::new_v4();
        let request = JobRequest::new(&ExtractMetadataPayload {
            asset_id: 3,
            source_path: None,
        })
        .unwrap()
        .after(parent);

        assert_eq!(request.depends_on(), Some(vec![parent]));
        assert!(request.cancel_on_dep_failure);
    }
}
