use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use vidora_core::constants::TASK_NOTIFY_CHANNEL;
use vidora_core::models::{AssetId, Task, TaskStatus, TaskType};

const TASK_COLUMNS: &str = r#"
    id,
    task_type,
    status,
    priority,
    payload,
    result,
    scheduled_at,
    started_at,
    completed_at,
    retry_count,
    max_retries,
    timeout_seconds,
    depends_on,
    cancel_on_dep_failure,
    created_at,
    updated_at
"#;

/// Parameters for inserting a task row.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub max_retries: i32,
    pub timeout_seconds: i32,
    pub depends_on: Option<Vec<Uuid>>,
    pub cancel_on_dep_failure: bool,
}

#[derive(Clone)]
pub struct TaskRepository {
    pool: PgPool,
}

impl TaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a task and notify listening workers in the same transaction.
    #[tracing::instrument(skip(self, new_task), fields(task_type = %new_task.task_type))]
    pub async fn create_task(&self, new_task: NewTask) -> Result<Task> {
        let scheduled_at = new_task.scheduled_at.unwrap_or_else(Utc::now);
        let status = if scheduled_at > Utc::now() {
            TaskStatus::Scheduled
        } else {
            TaskStatus::Pending
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction for task creation")?;

        let sql = format!(
            r#"
            INSERT INTO tasks (
                task_type, status, priority, payload, scheduled_at,
                max_retries, timeout_seconds, depends_on, cancel_on_dep_failure
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            TASK_COLUMNS
        );
        let task: Task = sqlx::query_as::<Postgres, Task>(&sql)
            .bind(new_task.task_type.to_string())
            .bind(status)
            .bind(new_task.priority)
            .bind(&new_task.payload)
            .bind(scheduled_at)
            .bind(new_task.max_retries)
            .bind(new_task.timeout_seconds)
            .bind(new_task.depends_on.as_deref())
            .bind(new_task.cancel_on_dep_failure)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    task_type = %new_task.task_type,
                    "Failed to insert task into database"
                );
                anyhow::anyhow!("Failed to insert task into database: {}", e)
            })?;

        // Workers still poll, so a failed NOTIFY only delays pickup.
        if let Err(e) = sqlx::query("SELECT pg_notify($1, '')")
            .bind(TASK_NOTIFY_CHANNEL)
            .execute(&mut *tx)
            .await
        {
            tracing::warn!(
                error = %e,
                task_id = %task.id,
                "Failed to send pg_notify for new task, workers will discover task via polling"
            );
        }

        tx.commit()
            .await
            .context("Failed to commit task creation transaction")?;

        tracing::info!(
            task_id = %task.id,
            task_type = %task.task_type,
            priority = task.priority,
            depends_on = ?task.depends_on,
            "Task created"
        );

        Ok(task)
    }

    /// Atomically claim the next runnable task.
    ///
    /// `FOR UPDATE SKIP LOCKED` lets several worker processes share the table.
    #[tracing::instrument(skip(self))]
    pub async fn claim_next_task(&self) -> Result<Option<Task>> {
        let sql = format!(
            r#"
            UPDATE tasks
            SET status = 'running',
                started_at = NOW(),
                updated_at = NOW()
            WHERE id = (
                SELECT id
                FROM tasks
                WHERE status IN ('pending', 'scheduled')
                    AND scheduled_at <= NOW()
                ORDER BY priority DESC, scheduled_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            TASK_COLUMNS
        );
        let task = sqlx::query_as::<Postgres, Task>(&sql)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to claim next task")?;

        if let Some(ref task) = task {
            tracing::debug!(
                task_id = %task.id,
                task_type = %task.task_type,
                attempt = task.attempt(),
                "Task claimed"
            );
        }

        Ok(task)
    }

    #[tracing::instrument(skip(self))]
    pub async fn update_status(&self, task_id: Uuid, status: TaskStatus) -> Result<Task> {
        let sql = format!(
            r#"
            UPDATE tasks
            SET status = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            TASK_COLUMNS
        );
        let task = sqlx::query_as::<Postgres, Task>(&sql)
            .bind(task_id)
            .bind(status)
            .fetch_one(&self.pool)
            .await
            .context("Failed to update task status")?;

        tracing::debug!(task_id = %task_id, status = %status, "Task status updated");
        Ok(task)
    }

    #[tracing::instrument(skip(self, result))]
    pub async fn mark_completed(&self, task_id: Uuid, result: serde_json::Value) -> Result<Task> {
        let sql = format!(
            r#"
            UPDATE tasks
            SET status = 'completed',
                result = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            TASK_COLUMNS
        );
        let task = sqlx::query_as::<Postgres, Task>(&sql)
            .bind(task_id)
            .bind(result)
            .fetch_one(&self.pool)
            .await
            .context("Failed to mark task as completed")?;

        tracing::info!(
            task_id = %task_id,
            task_type = %task.task_type,
            attempt = task.attempt(),
            "Task completed"
        );
        Ok(task)
    }

    #[tracing::instrument(skip(self, error))]
    pub async fn mark_failed(&self, task_id: Uuid, error: serde_json::Value) -> Result<Task> {
        let sql = format!(
            r#"
            UPDATE tasks
            SET status = 'failed',
                result = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            TASK_COLUMNS
        );
        let task = sqlx::query_as::<Postgres, Task>(&sql)
            .bind(task_id)
            .bind(error)
            .fetch_one(&self.pool)
            .await
            .context("Failed to mark task as failed")?;

        tracing::error!(
            task_id = %task_id,
            task_type = %task.task_type,
            attempt = task.attempt(),
            "Task failed"
        );
        Ok(task)
    }

    /// Consume an attempt and schedule the next one `backoff_seconds` from now.
    #[tracing::instrument(skip(self))]
    pub async fn increment_retry(&self, task_id: Uuid, backoff_seconds: u64) -> Result<Task> {
        let sql = format!(
            r#"
            UPDATE tasks
            SET status = 'scheduled',
                retry_count = retry_count + 1,
                scheduled_at = NOW() + ($2 * interval '1 second'),
                started_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            TASK_COLUMNS
        );
        let task = sqlx::query_as::<Postgres, Task>(&sql)
            .bind(task_id)
            .bind(backoff_seconds as i64)
            .fetch_one(&self.pool)
            .await
            .context("Failed to increment retry count")?;

        tracing::info!(
            task_id = %task_id,
            retry_count = task.retry_count,
            max_retries = task.max_retries,
            backoff_seconds = backoff_seconds,
            "Task retry scheduled"
        );
        Ok(task)
    }

    /// Put a claimed task back without consuming an attempt (unmet dependencies).
    #[tracing::instrument(skip(self))]
    pub async fn reschedule(&self, task_id: Uuid, delay_seconds: u64) -> Result<Task> {
        let sql = format!(
            r#"
            UPDATE tasks
            SET status = 'scheduled',
                scheduled_at = NOW() + ($2 * interval '1 second'),
                started_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            TASK_COLUMNS
        );
        let task = sqlx::query_as::<Postgres, Task>(&sql)
            .bind(task_id)
            .bind(delay_seconds as i64)
            .fetch_one(&self.pool)
            .await
            .context("Failed to reschedule task")?;
        Ok(task)
    }

    #[tracing::instrument(skip(self))]
    pub async fn check_dependencies_completed(&self, depends_on: &[Uuid]) -> Result<bool> {
        if depends_on.is_empty() {
            return Ok(true);
        }

        let count: i64 = sqlx::query_scalar::<Postgres, i64>(
            r#"
            SELECT COUNT(*)
            FROM tasks
            WHERE id = ANY($1)
                AND status = 'completed'
            "#,
        )
        .bind(depends_on)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check dependencies")?;

        Ok(count == depends_on.len() as i64)
    }

    #[tracing::instrument(skip(self))]
    pub async fn check_any_dependency_failed_or_cancelled(&self, depends_on: &[Uuid]) -> Result<bool> {
        if depends_on.is_empty() {
            return Ok(false);
        }

        let failed: bool = sqlx::query_scalar::<Postgres, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM tasks
                WHERE id = ANY($1)
                    AND status IN ('failed', 'cancelled')
            )
            "#,
        )
        .bind(depends_on)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check dependency failure")?;

        Ok(failed)
    }

    /// Cancel every not-yet-running task whose payload targets `asset_id`.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_pending_for_asset(&self, asset_id: AssetId) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'cancelled',
                completed_at = NOW(),
                updated_at = NOW()
            WHERE status IN ('pending', 'scheduled')
                AND payload->>'asset_id' = $1::text
            "#,
        )
        .bind(asset_id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to cancel pending tasks for asset")?;

        let count = result.rows_affected();
        if count > 0 {
            tracing::info!(asset_id = asset_id, count = count, "Cancelled pending tasks");
        }
        Ok(count)
    }

    /// Running tasks whose `started_at + timeout + grace` is in the past.
    ///
    /// A crashed worker leaves its claimed task in `running`; these rows are handed back
    /// to the queue so the retry policy still applies.
    #[tracing::instrument(skip(self))]
    pub async fn find_stale_running_tasks(&self, grace_period_secs: i64) -> Result<Vec<Task>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM tasks
            WHERE status = 'running'
                AND started_at IS NOT NULL
                AND started_at
                    + (COALESCE(timeout_seconds, 3600) * interval '1 second')
                    + ($1 * interval '1 second') < NOW()
            "#,
            TASK_COLUMNS
        );
        let tasks = sqlx::query_as::<Postgres, Task>(&sql)
            .bind(grace_period_secs)
            .fetch_all(&self.pool)
            .await
            .context("Failed to find stale running tasks")?;
        Ok(tasks)
    }
}
