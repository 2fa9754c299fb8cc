//! Task handler context trait
//!
//! The ingest service implements this for its application state. The queue calls
//! `dispatch_task` for each claimed task and `on_task_failed` once a task has failed
//! for good.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use vidora_core::models::{Task, TaskFailure};

/// Context for task dispatch.
///
/// The queue holds a weak reference so the worker pool never keeps application state
/// alive on its own.
#[async_trait]
pub trait TaskHandlerContext: Send + Sync {
    /// Run the handler for `task.task_type` and return its JSON result.
    async fn dispatch_task(self: Arc<Self>, task: &Task) -> Result<serde_json::Value>;

    /// Called once when a task ends `failed`: retries exhausted, an unrecoverable error,
    /// or a timeout on the last attempt. Not called for tasks cancelled because a
    /// dependency failed.
    async fn on_task_failed(self: Arc<Self>, _task: &Task, _failure: &TaskFailure) -> Result<()> {
        Ok(())
    }
}
