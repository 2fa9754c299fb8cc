//! Task queue: worker pool, LISTEN/NOTIFY or polling, retry, and submission.
//!
//! Shutdown: [`TaskQueue::shutdown`] stops claiming; tasks already running continue
//! until they finish or hit their timeout.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;
use uuid::Uuid;

use vidora_core::constants::TASK_NOTIFY_CHANNEL;
use vidora_core::models::{AssetId, Task, TaskFailure, TaskStatus};
use vidora_core::Config;
use vidora_db::db::task::NewTask;
use vidora_db::TaskRepository;
use vidora_infra::RateLimiter;

use crate::context::TaskHandlerContext;
use crate::retry::{decide, failure_result, AttemptOutcome, Disposition, DEFAULT_TIMEOUT_SECONDS};
use crate::scheduler::{JobRequest, JobScheduler};

#[derive(Debug, Clone)]
pub struct TaskQueueConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    /// Delay before a task with unfinished dependencies is looked at again.
    pub dependency_recheck_secs: u64,
    /// Interval in seconds between runs of the stale task reaper (0 disables it).
    pub stale_task_reap_interval_secs: u64,
    /// Grace period in seconds added to task timeout before reaping stale running tasks.
    pub stale_task_grace_period_secs: i64,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval_ms: 1000,
            dependency_recheck_secs: 2,
            stale_task_reap_interval_secs: 60,
            stale_task_grace_period_secs: 300,
        }
    }
}

impl TaskQueueConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_workers: config.task_queue_max_workers(),
            poll_interval_ms: config.task_queue_poll_interval_ms(),
            stale_task_reap_interval_secs: config.task_queue_stale_task_reap_interval_secs(),
            stale_task_grace_period_secs: config.task_queue_stale_task_grace_period_secs(),
            ..Default::default()
        }
    }
}

pub struct TaskQueue {
    repository: TaskRepository,
    config: TaskQueueConfig,
    shutdown_tx: mpsc::Sender<()>,
}

impl TaskQueue {
    /// Create a queue and spawn its worker pool.
    ///
    /// With a `pool`, the worker also LISTENs on the task channel and wakes as soon as a
    /// task is created; polling at `poll_interval_ms` still runs either way.
    pub fn new(
        repository: TaskRepository,
        rate_limiter: RateLimiter,
        config: TaskQueueConfig,
        context: Weak<dyn TaskHandlerContext>,
        pool: Option<sqlx::PgPool>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let repo_clone = repository.clone();
        let config_clone = config.clone();

        tokio::spawn(async move {
            Self::worker_pool(
                repo_clone,
                rate_limiter,
                config_clone,
                context,
                shutdown_rx,
                pool,
            )
            .await;
        });

        Self {
            repository,
            config,
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &TaskQueueConfig {
        &self.config
    }

    /// Persist a job with its type's attempt budget and timeout.
    #[tracing::instrument(skip(self, request), fields(task_type = %request.task_type))]
    pub async fn submit(&self, request: JobRequest) -> Result<Uuid> {
        let task_type = request.task_type;
        let priority = request.priority.as_i32();
        let task = self
            .repository
            .create_task(NewTask {
                task_type,
                depends_on: request.depends_on(),
                payload: request.payload,
                priority,
                scheduled_at: None,
                max_retries: task_type.max_retries(),
                timeout_seconds: task_type.timeout_seconds(),
                cancel_on_dep_failure: request.cancel_on_dep_failure,
            })
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    task_type = %task_type,
                    priority = priority,
                    "Failed to create task in repository"
                );
                e
            })
            .context("Failed to create task in repository")?;

        tracing::info!(
            task_id = %task.id,
            task_type = %task_type,
            priority = priority,
            "Task submitted to queue"
        );

        Ok(task.id)
    }

    async fn worker_pool(
        repository: TaskRepository,
        rate_limiter: RateLimiter,
        config: TaskQueueConfig,
        context: Weak<dyn TaskHandlerContext>,
        mut shutdown_rx: mpsc::Receiver<()>,
        pool: Option<sqlx::PgPool>,
    ) {
        let use_listen = pool.is_some();
        tracing::info!(
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval_ms,
            listen_notify = use_listen,
            "Task queue worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_workers));
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(16);
        if let Some(pool) = pool {
            let tx = notify_tx.clone();
            tokio::spawn(async move {
                loop {
                    match sqlx::postgres::PgListener::connect_with(&pool).await {
                        Ok(mut listener) => {
                            if let Err(e) = listener.listen(TASK_NOTIFY_CHANNEL).await {
                                tracing::warn!(error = %e, "LISTEN failed, will retry");
                                sleep(Duration::from_secs(5)).await;
                                continue;
                            }
                            while listener.recv().await.is_ok() {
                                let _ = tx.send(()).await;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "PgListener connect failed, will retry");
                            sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            });
        }

        let (reaper_shutdown_tx, mut reaper_shutdown_rx) = mpsc::channel::<()>(1);
        if config.stale_task_reap_interval_secs > 0 {
            let repo_for_reaper = repository.clone();
            let ctx_for_reaper = context.clone();
            let reap_interval = Duration::from_secs(config.stale_task_reap_interval_secs);
            let grace_period = config.stale_task_grace_period_secs;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(reap_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = Self::reap_stale_tasks(&repo_for_reaper, &ctx_for_reaper, grace_period).await {
                                tracing::error!(error = %e, "Stale task reaper failed");
                            }
                        }
                        _ = reaper_shutdown_rx.recv() => break,
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Task queue worker pool shutting down");
                    let _ = reaper_shutdown_tx.send(()).await;
                    break;
                }
                _ = notify_rx.recv() => {
                    Self::claim_and_dispatch_one(&repository, &rate_limiter, &semaphore, &context, &config).await;
                }
                _ = sleep(poll_interval) => {
                    Self::claim_and_dispatch_one(&repository, &rate_limiter, &semaphore, &context, &config).await;
                }
            }
        }

        tracing::info!("Task queue worker pool stopped");
    }

    async fn claim_and_dispatch_one(
        repository: &TaskRepository,
        rate_limiter: &RateLimiter,
        semaphore: &Arc<Semaphore>,
        context: &Weak<dyn TaskHandlerContext>,
        config: &TaskQueueConfig,
    ) {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("No workers available, skipping claim");
                return;
            }
        };

        match repository.claim_next_task().await {
            Ok(Some(task)) => {
                let repo = repository.clone();
                let limiter = rate_limiter.clone();
                let ctx = context.clone();
                let recheck = config.dependency_recheck_secs;
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = Self::process_task(task, repo, limiter, ctx, recheck).await {
                        tracing::error!(error = %e, "Task processing failed");
                    }
                });
            }
            Ok(None) => {
                drop(permit);
                tracing::trace!("No tasks available in queue");
            }
            Err(e) => {
                drop(permit);
                tracing::error!(error = %e, "Failed to claim task from queue");
            }
        }
    }

    #[tracing::instrument(skip(repository, rate_limiter, context), fields(task.id = %task.id, task.type = %task.task_type, attempt = task.attempt()))]
    async fn process_task(
        task: Task,
        repository: TaskRepository,
        rate_limiter: RateLimiter,
        context: Weak<dyn TaskHandlerContext>,
        dependency_recheck_secs: u64,
    ) -> Result<()> {
        if let Some(ref depends_on) = task.depends_on {
            let deps_completed = repository
                .check_dependencies_completed(depends_on)
                .await
                .context("Failed to check dependencies")?;

            if !deps_completed {
                if task.cancel_on_dep_failure
                    && repository
                        .check_any_dependency_failed_or_cancelled(depends_on)
                        .await
                        .context("Failed to check dependency failure")?
                {
                    tracing::info!(
                        task_id = %task.id,
                        "Dependency failed or cancelled, cancelling task"
                    );
                    repository.update_status(task.id, TaskStatus::Cancelled).await?;
                    return Ok(());
                }
                tracing::debug!(task_id = %task.id, "Task dependencies not completed, rescheduling");
                repository.reschedule(task.id, dependency_recheck_secs).await?;
                return Ok(());
            }
        }

        rate_limiter.acquire(task.task_type).await;

        let Some(ctx) = context.upgrade() else {
            repository.reschedule(task.id, 0).await?;
            anyhow::bail!("TaskHandlerContext was dropped, task handed back to the queue");
        };

        let timeout_duration = Duration::from_secs(
            task.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS).max(1) as u64,
        );
        let outcome = match tokio::time::timeout(timeout_duration, ctx.clone().dispatch_task(&task)).await {
            Ok(Ok(result)) => AttemptOutcome::Completed(result),
            Ok(Err(e)) => {
                tracing::warn!(
                    task_id = %task.id,
                    error = %format!("{:#}", e),
                    attempt = task.attempt(),
                    max_attempts = task.max_retries + 1,
                    "Task attempt failed"
                );
                AttemptOutcome::Failed(e)
            }
            Err(_) => {
                tracing::warn!(
                    task_id = %task.id,
                    timeout_seconds = ?task.timeout_seconds,
                    attempt = task.attempt(),
                    "Task attempt timed out"
                );
                AttemptOutcome::TimedOut
            }
        };

        Self::apply_disposition(&repository, ctx, &task, decide(&task, outcome)).await
    }

    async fn apply_disposition(
        repository: &TaskRepository,
        ctx: Arc<dyn TaskHandlerContext>,
        task: &Task,
        disposition: Disposition,
    ) -> Result<()> {
        match disposition {
            Disposition::Complete(result) => {
                repository
                    .mark_completed(task.id, result)
                    .await
                    .context("Failed to mark task as completed")?;
            }
            Disposition::Retry {
                backoff_seconds,
                error,
            } => {
                tracing::info!(
                    task_id = %task.id,
                    next_attempt = task.attempt() + 1,
                    backoff_seconds = backoff_seconds,
                    error = %error,
                    "Scheduling task retry"
                );
                repository.increment_retry(task.id, backoff_seconds).await?;
            }
            Disposition::Fail(failure) => {
                repository
                    .mark_failed(task.id, failure_result(task, &failure))
                    .await
                    .context("Failed to mark task as failed")?;
                Self::notify_failure(ctx, task, &failure).await;
            }
        }
        Ok(())
    }

    async fn notify_failure(ctx: Arc<dyn TaskHandlerContext>, task: &Task, failure: &TaskFailure) {
        tracing::error!(
            task_id = %task.id,
            task_type = %task.task_type,
            reason = %failure.message(),
            "Task failed terminally"
        );
        if let Err(e) = ctx.on_task_failed(task, failure).await {
            tracing::error!(
                task_id = %task.id,
                error = %format!("{:#}", e),
                "Terminal failure hook failed"
            );
        }
    }

    /// Hand stale `running` tasks back to the retry policy as timed-out attempts.
    async fn reap_stale_tasks(
        repository: &TaskRepository,
        context: &Weak<dyn TaskHandlerContext>,
        grace_period_secs: i64,
    ) -> Result<()> {
        let stale = repository.find_stale_running_tasks(grace_period_secs).await?;
        if stale.is_empty() {
            return Ok(());
        }
        tracing::warn!(count = stale.len(), "Reaping stale running tasks");

        for task in stale {
            match decide(&task, AttemptOutcome::TimedOut) {
                Disposition::Fail(failure) => {
                    repository
                        .mark_failed(task.id, failure_result(&task, &failure))
                        .await?;
                    if let Some(ctx) = context.upgrade() {
                        Self::notify_failure(ctx, &task, &failure).await;
                    }
                }
                Disposition::Retry { backoff_seconds, .. } => {
                    repository.increment_retry(task.id, backoff_seconds).await?;
                }
                Disposition::Complete(_) => {}
            }
        }
        Ok(())
    }

    /// Signals the worker pool to stop claiming new tasks. Returns immediately.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating task queue shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }
}

impl Clone for TaskQueue {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            config: self.config.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }
}

#[async_trait]
impl JobScheduler for TaskQueue {
    async fn enqueue(&self, request: JobRequest) -> Result<Uuid> {
        self.submit(request).await
    }

    async fn cancel_for_asset(&self, asset_id: AssetId) -> Result<u64> {
        self.repository.cancel_pending_for_asset(asset_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidora_core::IngestConfig;

    #[test]
    fn config_follows_ingest_settings() {
        let mut ingest = IngestConfig::default();
        ingest.task_queue_max_workers = 9;
        ingest.task_queue_stale_task_reap_interval_secs = 0;
        let config = TaskQueueConfig::from_config(&Config::from(ingest));

        assert_eq!(config.max_workers, 9);
        assert_eq!(config.stale_task_reap_interval_secs, 0);
        assert_eq!(config.dependency_recheck_secs, 2);
    }
}
