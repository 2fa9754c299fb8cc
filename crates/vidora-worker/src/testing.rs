//! In-memory [`JobScheduler`] that runs jobs through a [`TaskHandlerContext`] with the
//! same dependency and retry rules as the database queue. Backoff delays are skipped.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use vidora_core::models::{AssetId, Task, TaskStatus, TaskType};

use crate::context::TaskHandlerContext;
use crate::retry::{decide, failure_result, AttemptOutcome, Disposition, DEFAULT_TIMEOUT_SECONDS};
use crate::scheduler::{JobRequest, JobScheduler};

/// Upper bound on attempts per `run_until_idle` call.
const MAX_STEPS: usize = 1000;

#[derive(Default)]
pub struct InMemoryScheduler {
    tasks: Mutex<Vec<Task>>,
    timeout_override: Option<Duration>,
}

enum Next {
    Run(Task),
    Cancelled,
    Idle,
}

impl InMemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `timeout` for every attempt instead of the task type's budget.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            timeout_override: Some(timeout),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every task ever enqueued, in submission order.
    pub fn tasks(&self) -> Vec<Task> {
        self.lock().clone()
    }

    pub fn tasks_of(&self, task_type: TaskType) -> Vec<Task> {
        self.lock()
            .iter()
            .filter(|t| t.task_type == task_type)
            .cloned()
            .collect()
    }

    pub fn task(&self, id: Uuid) -> Option<Task> {
        self.lock().iter().find(|t| t.id == id).cloned()
    }

    fn status_of(tasks: &[Task], id: &Uuid) -> Option<TaskStatus> {
        tasks.iter().find(|t| &t.id == id).map(|t| t.status)
    }

    fn next(&self) -> Next {
        let mut tasks = self.lock();
        let mut runnable: Option<usize> = None;
        let mut cancel: Option<usize> = None;

        for (i, task) in tasks.iter().enumerate() {
            if !matches!(task.status, TaskStatus::Pending | TaskStatus::Scheduled) {
                continue;
            }
            let statuses: Vec<Option<TaskStatus>> = task
                .depends_on
                .iter()
                .flatten()
                .map(|d| Self::status_of(&tasks, d))
                .collect();

            if task.cancel_on_dep_failure
                && statuses
                    .iter()
                    .any(|s| matches!(s, Some(TaskStatus::Failed | TaskStatus::Cancelled)))
            {
                cancel = Some(i);
                break;
            }
            if statuses.iter().all(|s| *s == Some(TaskStatus::Completed))
                && runnable.map_or(true, |c| task.priority > tasks[c].priority)
            {
                runnable = Some(i);
            }
        }

        if let Some(i) = cancel {
            let task = &mut tasks[i];
            task.status = TaskStatus::Cancelled;
            task.completed_at = Some(Utc::now());
            return Next::Cancelled;
        }
        match runnable {
            Some(i) => {
                let task = &mut tasks[i];
                task.status = TaskStatus::Running;
                task.started_at = Some(Utc::now());
                Next::Run(task.clone())
            }
            None => Next::Idle,
        }
    }

    fn update(&self, id: Uuid, f: impl FnOnce(&mut Task)) {
        if let Some(task) = self.lock().iter_mut().find(|t| t.id == id) {
            f(task);
            task.updated_at = Utc::now();
        }
    }

    /// Run jobs until nothing is runnable. Returns the number of attempts made.
    pub async fn run_until_idle(&self, ctx: Arc<dyn TaskHandlerContext>) -> usize {
        let mut attempts = 0;
        for _ in 0..MAX_STEPS {
            let task = match self.next() {
                Next::Run(task) => task,
                Next::Cancelled => continue,
                Next::Idle => break,
            };
            attempts += 1;

            let timeout = self.timeout_override.unwrap_or_else(|| {
                Duration::from_secs(
                    task.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS).max(1) as u64,
                )
            });
            let outcome = match tokio::time::timeout(timeout, ctx.clone().dispatch_task(&task)).await {
                Ok(Ok(result)) => AttemptOutcome::Completed(result),
                Ok(Err(e)) => AttemptOutcome::Failed(e),
                Err(_) => AttemptOutcome::TimedOut,
            };

            match decide(&task, outcome) {
                Disposition::Complete(result) => self.update(task.id, |t| {
                    t.status = TaskStatus::Completed;
                    t.result = Some(result);
                    t.completed_at = Some(Utc::now());
                }),
                Disposition::Retry { .. } => self.update(task.id, |t| {
                    t.status = TaskStatus::Scheduled;
                    t.retry_count += 1;
                    t.started_at = None;
                }),
                Disposition::Fail(failure) => {
                    let result = failure_result(&task, &failure);
                    self.update(task.id, |t| {
                        t.status = TaskStatus::Failed;
                        t.result = Some(result);
                        t.completed_at = Some(Utc::now());
                    });
                    tracing::error!(
                        task_id = %task.id,
                        task_type = %task.task_type,
                        reason = %failure.message(),
                        "Task failed terminally"
                    );
                    if let Err(e) = ctx.clone().on_task_failed(&task, &failure).await {
                        tracing::error!(task_id = %task.id, error = %e, "Terminal failure hook failed");
                    }
                }
            }
        }
        attempts
    }
}

#[async_trait]
impl JobScheduler for InMemoryScheduler {
    async fn enqueue(&self, request: JobRequest) -> Result<Uuid> {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            task_type: request.task_type,
            status: TaskStatus::Pending,
            priority: request.priority.as_i32(),
            depends_on: request.depends_on(),
            payload: request.payload,
            result: None,
            scheduled_at: now,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: request.task_type.max_retries(),
            timeout_seconds: Some(request.task_type.timeout_seconds()),
            cancel_on_dep_failure: request.cancel_on_dep_failure,
            created_at: now,
            updated_at: now,
        };
        let id = task.id;
        self.lock().push(task);
        Ok(id)
    }

    async fn cancel_for_asset(&self, asset_id: AssetId) -> Result<u64> {
        let mut count = 0;
        for task in self.lock().iter_mut() {
            if matches!(task.status, TaskStatus::Pending | TaskStatus::Scheduled)
                && task.payload["asset_id"].as_i64() == Some(asset_id)
            {
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(Utc::now());
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vidora_core::models::{ExtractMetadataPayload, TaskFailure};
    use vidora_core::TaskError;

    /// Fails the first `failures` dispatches, then succeeds.
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
        failed: Mutex<Vec<TaskFailure>>,
    }

    #[async_trait]
    impl TaskHandlerContext for Flaky {
        async fn dispatch_task(self: Arc<Self>, _task: &Task) -> Result<serde_json::Value> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(anyhow::anyhow!("attempt {} failed", n + 1))
            } else {
                Ok(serde_json::json!({"status": "success"}))
            }
        }

        async fn on_task_failed(self: Arc<Self>, _task: &Task, failure: &TaskFailure) -> Result<()> {
            self.failed.lock().unwrap().push(failure.clone());
            Ok(())
        }
    }

    fn flaky(failures: usize) -> Arc<Flaky> {
        Arc::new(Flaky {
            failures,
            calls: AtomicUsize::new(0),
            failed: Mutex::new(Vec::new()),
        })
    }

    fn metadata_job(asset_id: AssetId) -> JobRequest {
        JobRequest::new(&ExtractMetadataPayload {
            asset_id,
            source_path: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn retries_within_budget() {
        let scheduler = InMemoryScheduler::new();
        let id = scheduler.enqueue(metadata_job(1)).await.unwrap();
        let ctx = flaky(1);

        let attempts = scheduler.run_until_idle(ctx.clone()).await;

        assert_eq!(attempts, 2);
        let task = scheduler.task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.retry_count, 1);
        assert!(ctx.failed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhausted_task_calls_failure_hook_once() {
        let scheduler = InMemoryScheduler::new();
        let id = scheduler.enqueue(metadata_job(1)).await.unwrap();
        let ctx = flaky(10);

        let attempts = scheduler.run_until_idle(ctx.clone()).await;

        assert_eq!(attempts, 2);
        assert_eq!(scheduler.task(id).unwrap().status, TaskStatus::Failed);
        let failed = ctx.failed.lock().unwrap();
        assert_eq!(failed.len(), 1);
        assert!(matches!(failed[0], TaskFailure::Exhausted { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn dependents_cancel_when_parent_fails() {
        let scheduler = InMemoryScheduler::new();
        let parent = scheduler.enqueue(metadata_job(1)).await.unwrap();
        let child = scheduler.enqueue(metadata_job(1).after(parent)).await.unwrap();

        scheduler.run_until_idle(flaky(10)).await;

        assert_eq!(scheduler.task(parent).unwrap().status, TaskStatus::Failed);
        assert_eq!(scheduler.task(child).unwrap().status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn dependents_wait_for_parent() {
        let scheduler = InMemoryScheduler::new();
        let parent = scheduler.enqueue(metadata_job(1)).await.unwrap();
        let child = scheduler.enqueue(metadata_job(1).after(parent)).await.unwrap();

        scheduler.run_until_idle(flaky(0)).await;

        let parent = scheduler.task(parent).unwrap();
        let child = scheduler.task(child).unwrap();
        assert_eq!(child.status, TaskStatus::Completed);
        assert!(parent.completed_at.unwrap() <= child.started_at.unwrap());
    }

    #[tokio::test]
    async fn cancel_for_asset_skips_other_assets() {
        let scheduler = InMemoryScheduler::new();
        scheduler.enqueue(metadata_job(1)).await.unwrap();
        let other = scheduler.enqueue(metadata_job(2)).await.unwrap();

        assert_eq!(scheduler.cancel_for_asset(1).await.unwrap(), 1);
        assert_eq!(scheduler.task(other).unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn unrecoverable_error_fails_first_time() {
        struct Broken;
        #[async_trait]
        impl TaskHandlerContext for Broken {
            async fn dispatch_task(self: Arc<Self>, _task: &Task) -> Result<serde_json::Value> {
                Err(TaskError::unrecoverable(anyhow::anyhow!("bad payload")).into())
            }
        }

        let scheduler = InMemoryScheduler::new();
        let id = scheduler.enqueue(metadata_job(1)).await.unwrap();

        assert_eq!(scheduler.run_until_idle(Arc::new(Broken)).await, 1);
        assert_eq!(scheduler.task(id).unwrap().status, TaskStatus::Failed);
    }
}
