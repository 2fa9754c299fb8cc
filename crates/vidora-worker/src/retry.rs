//! What happens to a task after one attempt.
//!
//! Kept free of I/O so the database queue and the in-memory scheduler apply the same
//! policy.

use vidora_core::models::{Task, TaskFailure};
use vidora_core::TaskError;

/// Maximum delay in seconds before retrying a failed task.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// Timeout applied when a task row carries none.
pub const DEFAULT_TIMEOUT_SECONDS: i32 = 3600;

/// Exponential backoff, capped at [`MAX_RETRY_BACKOFF_SECS`].
#[inline]
pub fn compute_retry_backoff_seconds(retry_count: i32) -> u64 {
    2_u64
        .checked_pow(retry_count.max(0) as u32)
        .unwrap_or(u64::MAX)
        .min(MAX_RETRY_BACKOFF_SECS)
}

/// How one attempt ended.
#[derive(Debug)]
pub enum AttemptOutcome {
    Completed(serde_json::Value),
    Failed(anyhow::Error),
    TimedOut,
}

#[derive(Debug)]
pub enum Disposition {
    Complete(serde_json::Value),
    Retry { backoff_seconds: u64, error: String },
    Fail(TaskFailure),
}

/// Apply the attempt budget stored on `task` to `outcome`.
pub fn decide(task: &Task, outcome: AttemptOutcome) -> Disposition {
    match outcome {
        AttemptOutcome::Completed(result) => Disposition::Complete(result),
        AttemptOutcome::Failed(e) => {
            let error = format!("{:#}", e);
            if !TaskError::is_recoverable_error(&e) {
                Disposition::Fail(TaskFailure::Unrecoverable { error })
            } else if task.can_retry() {
                Disposition::Retry {
                    backoff_seconds: compute_retry_backoff_seconds(task.retry_count),
                    error,
                }
            } else {
                Disposition::Fail(TaskFailure::Exhausted {
                    error,
                    attempts: task.attempt(),
                })
            }
        }
        AttemptOutcome::TimedOut => {
            let timeout_seconds = task.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS);
            if task.can_retry() {
                Disposition::Retry {
                    backoff_seconds: compute_retry_backoff_seconds(task.retry_count),
                    error: format!("timed out after {}s", timeout_seconds),
                }
            } else {
                Disposition::Fail(TaskFailure::TimedOut {
                    timeout_seconds,
                    attempts: task.attempt(),
                })
            }
        }
    }
}

/// Result column written for a failed task.
pub fn failure_result(task: &Task, failure: &TaskFailure) -> serde_json::Value {
    serde_json::json!({
        "error": failure.message(),
        "retry_count": task.retry_count,
        "attempts": task.attempt(),
        "unrecoverable": matches!(failure, TaskFailure::Unrecoverable { .. }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use vidora_core::models::{TaskStatus, TaskType};

    fn task(task_type: TaskType, retry_count: i32) -> Task {
        Task {
            id: Uuid::new_v4(),
            task_type,
            status: TaskStatus::Running,
            priority: 5,
            payload: serde_json::json!({"asset_id": 1}),
            result: None,
            scheduled_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
            retry_count,
            max_retries: task_type.max_retries(),
            timeout_seconds: Some(task_type.timeout_seconds()),
            depends_on: None,
            cancel_on_dep_failure: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn retry_backoff_exponential_then_capped() {
        assert_eq!(compute_retry_backoff_seconds(0), 1);
        assert_eq!(compute_retry_backoff_seconds(1), 2);
        assert_eq!(compute_retry_backoff_seconds(8), 256);
        assert_eq!(compute_retry_backoff_seconds(9), MAX_RETRY_BACKOFF_SECS);
        assert_eq!(compute_retry_backoff_seconds(70), MAX_RETRY_BACKOFF_SECS);
        assert_eq!(compute_retry_backoff_seconds(-1), 1);
    }

    #[test]
    fn promotion_gets_three_attempts() {
        let err = || AttemptOutcome::Failed(anyhow::anyhow!("disk busy"));
        assert!(matches!(
            decide(&task(TaskType::PromoteVideo, 0), err()),
            Disposition::Retry { backoff_seconds: 1, .. }
        ));
        assert!(matches!(
            decide(&task(TaskType::PromoteVideo, 1), err()),
            Disposition::Retry { backoff_seconds: 2, .. }
        ));
        match decide(&task(TaskType::PromoteVideo, 2), err()) {
            Disposition::Fail(TaskFailure::Exhausted { attempts, error }) => {
                assert_eq!(attempts, 3);
                assert!(error.contains("disk busy"));
            }
            other => panic!("unexpected disposition: {:?}", other),
        }
    }

    #[test]
    fn derivation_gets_two_attempts() {
        let outcome = decide(&task(TaskType::DeriveThumbnail, 1), AttemptOutcome::TimedOut);
        assert!(matches!(
            outcome,
            Disposition::Fail(TaskFailure::TimedOut {
                timeout_seconds: 180,
                attempts: 2
            })
        ));
    }

    #[test]
    fn unrecoverable_errors_skip_retries() {
        let err: anyhow::Error = TaskError::unrecoverable(anyhow::anyhow!("asset 9 gone")).into();
        assert!(matches!(
            decide(&task(TaskType::ExtractMetadata, 0), AttemptOutcome::Failed(err)),
            Disposition::Fail(TaskFailure::Unrecoverable { .. })
        ));
    }

    #[test]
    fn context_wrapped_task_error_keeps_its_flag() {
        let err = anyhow::Error::from(TaskError::unrecoverable(anyhow::anyhow!("bad payload")))
            .context("handler failed");
        assert!(matches!(
            decide(&task(TaskType::PromoteThumbnail, 0), AttemptOutcome::Failed(err)),
            Disposition::Fail(TaskFailure::Unrecoverable { .. })
        ));
    }

    #[test]
    fn failure_result_marks_unrecoverable() {
        let t = task(TaskType::PromoteVideo, 2);
        let value = failure_result(
            &t,
            &TaskFailure::Unrecoverable {
                error: "x".to_string(),
            },
        );
        assert_eq!(value["unrecoverable"], true);
        assert_eq!(value["attempts"], 3);
    }
}
