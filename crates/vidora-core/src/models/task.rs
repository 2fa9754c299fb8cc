use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::asset::{AssetId, PromotionTarget};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    PromoteVideo,
    PromoteThumbnail,
    PromoteSliderImage,
    DeriveThumbnail,
    ExtractMetadata,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::PromoteVideo,
        TaskType::PromoteThumbnail,
        TaskType::PromoteSliderImage,
        TaskType::DeriveThumbnail,
        TaskType::ExtractMetadata,
    ];

    /// Total attempts including the first run.
    pub fn max_attempts(&self) -> i32 {
        match self {
            TaskType::PromoteVideo | TaskType::PromoteThumbnail | TaskType::PromoteSliderImage => 3,
            TaskType::DeriveThumbnail | TaskType::ExtractMetadata => 2,
        }
    }

    /// Retries after the first attempt; stored as `max_retries` on the task row.
    pub fn max_retries(&self) -> i32 {
        self.max_attempts() - 1
    }

    pub fn timeout_seconds(&self) -> i32 {
        match self {
            TaskType::PromoteVideo => 300,
            TaskType::PromoteThumbnail | TaskType::PromoteSliderImage => 120,
            TaskType::DeriveThumbnail => 180,
            TaskType::ExtractMetadata => 600,
        }
    }

    /// Jobs that shell out to ffmpeg/ffprobe.
    pub fn invokes_tools(&self) -> bool {
        matches!(self, TaskType::DeriveThumbnail | TaskType::ExtractMetadata)
    }
}

impl Display for TaskType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskType::PromoteVideo => write!(f, "promote_video"),
            TaskType::PromoteThumbnail => write!(f, "promote_thumbnail"),
            TaskType::PromoteSliderImage => write!(f, "promote_slider_image"),
            TaskType::DeriveThumbnail => write!(f, "derive_thumbnail"),
            TaskType::ExtractMetadata => write!(f, "extract_metadata"),
        }
    }
}

impl FromStr for TaskType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "promote_video" => Ok(TaskType::PromoteVideo),
            "promote_thumbnail" => Ok(TaskType::PromoteThumbnail),
            "promote_slider_image" => Ok(TaskType::PromoteSliderImage),
            "derive_thumbnail" => Ok(TaskType::DeriveThumbnail),
            "extract_metadata" => Ok(TaskType::ExtractMetadata),
            _ => Err(anyhow::anyhow!("Invalid task type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(
    feature = "sqlx",
    derive(sqlx::Type),
    sqlx(type_name = "task_status", rename_all = "lowercase")
)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Scheduled,
    Cancelled,
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Scheduled => write!(f, "scheduled"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "scheduled" => Ok(TaskStatus::Scheduled),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid task status: {}", s)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 3,
    #[default]
    Normal = 5,
    High = 7,
}

impl Priority {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}

impl From<Priority> for i32 {
    fn from(priority: Priority) -> Self {
        priority as i32
    }
}

/// A persisted background job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: i32,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub timeout_seconds: Option<i32>,
    pub depends_on: Option<Vec<Uuid>>,
    /// Cancel instead of running when any dependency ends failed or cancelled.
    pub cancel_on_dep_failure: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Task {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Task {
            id: row.get("id"),
            task_type: row.get::<String, _>("task_type").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse task_type: {}", e).into())
            })?,
            status: row.get("status"),
            priority: row.get("priority"),
            payload: row.get("payload"),
            result: row.get("result"),
            scheduled_at: row.get("scheduled_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            retry_count: row.get("retry_count"),
            max_retries: row.get("max_retries"),
            timeout_seconds: row.get("timeout_seconds"),
            depends_on: row.get::<Option<Vec<Uuid>>, _>("depends_on"),
            cancel_on_dep_failure: row
                .get::<Option<bool>, _>("cancel_on_dep_failure")
                .unwrap_or(false),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

impl Task {
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// 1-based attempt number of the current run.
    pub fn attempt(&self) -> i32 {
        self.retry_count + 1
    }

    /// Extract the payload as a typed struct, returning an error on failure.
    pub fn try_payload_as<P: TaskPayload>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Trait for type-safe task payloads
pub trait TaskPayload: Serialize + for<'de> Deserialize<'de> {
    fn task_type(&self) -> TaskType;

    fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Move a staged upload into a permanent folder and record it on the asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromoteUploadPayload {
    pub asset_id: AssetId,
    /// Storage key of the staged file, relative to the storage root.
    pub staged_path: String,
    pub target_folder: String,
    pub target: PromotionTarget,
}

impl TaskPayload for PromoteUploadPayload {
    fn task_type(&self) -> TaskType {
        self.target.task_type()
    }
}

/// Extract one frame from the asset's primary video.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeriveThumbnailPayload {
    pub asset_id: AssetId,
    pub offset_seconds: f64,
    pub target_folder: String,
    /// Source video key. `None` reads the asset's primary path when the job runs.
    #[serde(default)]
    pub source_path: Option<String>,
}

impl TaskPayload for DeriveThumbnailPayload {
    fn task_type(&self) -> TaskType {
        TaskType::DeriveThumbnail
    }
}

/// Probe the asset's primary video for duration and dimensions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractMetadataPayload {
    pub asset_id: AssetId,
    #[serde(default)]
    pub source_path: Option<String>,
}

impl TaskPayload for ExtractMetadataPayload {
    fn task_type(&self) -> TaskType {
        TaskType::ExtractMetadata
    }
}

/// Why a task ended in `Failed`, handed to the failure hook.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskFailure {
    /// A recoverable error on the last allowed attempt.
    Exhausted { error: String, attempts: i32 },
    /// The handler marked the error unrecoverable.
    Unrecoverable { error: String },
    /// The last allowed attempt ran past its timeout.
    TimedOut { timeout_seconds: i32, attempts: i32 },
}

impl TaskFailure {
    pub fn message(&self) -> String {
        match self {
            TaskFailure::Exhausted { error, attempts } => {
                format!("failed after {} attempts: {}", attempts, error)
            }
            TaskFailure::Unrecoverable { error } => format!("unrecoverable: {}", error),
            TaskFailure::TimedOut {
                timeout_seconds,
                attempts,
            } => format!(
                "timed out after {}s on attempt {}",
                timeout_seconds, attempts
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(task_type: TaskType, status: TaskStatus, retry_count: i32) -> Task {
        Task {
            id: Uuid::new_v4(),
            task_type,
            status,
            priority: Priority::Normal.as_i32(),
            payload: serde_json::json!({}),
            result: None,
            scheduled_at: Utc::now() - chrono::Duration::seconds(10),
            started_at: None,
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
    fn test_task_type_round_trips_through_strings() {
        for task_type in TaskType::ALL {
            assert_eq!(task_type.to_string().parse::<TaskType>().unwrap(), task_type);
        }
        assert!("video_transcode".parse::<TaskType>().is_err());
    }

    #[test]
    fn test_attempt_budgets() {
        assert_eq!(TaskType::PromoteVideo.max_attempts(), 3);
        assert_eq!(TaskType::PromoteThumbnail.max_retries(), 2);
        assert_eq!(TaskType::DeriveThumbnail.max_attempts(), 2);
        assert_eq!(TaskType::ExtractMetadata.max_retries(), 1);
        assert_eq!(TaskType::PromoteVideo.timeout_seconds(), 300);
        assert_eq!(TaskType::ExtractMetadata.timeout_seconds(), 600);
    }

    #[test]
    fn test_task_status_from_str() {
        assert_eq!("pending".parse::<TaskStatus>().unwrap(), TaskStatus::Pending);
        assert_eq!(
            "cancelled".parse::<TaskStatus>().unwrap(),
            TaskStatus::Cancelled
        );
        assert!("invalid_status".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_priority_order() {
        assert_eq!(Priority::High.as_i32(), 7);
        assert!(Priority::Low < Priority::High);
    }

    #[test]
    fn test_retry_budget_follows_task_type() {
        assert!(task(TaskType::PromoteVideo, TaskStatus::Running, 1).can_retry());
        assert!(!task(TaskType::PromoteVideo, TaskStatus::Running, 2).can_retry());
        assert!(task(TaskType::DeriveThumbnail, TaskStatus::Running, 0).can_retry());
        assert!(!task(TaskType::DeriveThumbnail, TaskStatus::Running, 1).can_retry());
        assert_eq!(task(TaskType::DeriveThumbnail, TaskStatus::Running, 1).attempt(), 2);
    }

    #[test]
    fn test_promotion_payload_derives_task_type() {
        let payload = PromoteUploadPayload {
            asset_id: 9,
            staged_path: "tmp/upload.mp4".to_string(),
            target_folder: "videos".to_string(),
            target: PromotionTarget::PrimaryVideo,
        };
        assert_eq!(payload.task_type(), TaskType::PromoteVideo);

        let value = payload.to_value().unwrap();
        assert_eq!(value["target"], "primary_video");
        let mut t = task(TaskType::PromoteVideo, TaskStatus::Running, 0);
        t.payload = value;
        assert_eq!(t.try_payload_as::<PromoteUploadPayload>().unwrap(), payload);
    }

    #[test]
    fn test_source_path_defaults_to_late_binding() {
        let payload: ExtractMetadataPayload =
            serde_json::from_value(serde_json::json!({ "asset_id": 4 })).unwrap();
        assert_eq!(payload.source_path, None);
    }

    #[test]
    fn test_failure_messages() {
        let exhausted = TaskFailure::Exhausted {
            error: "staged file missing".to_string(),
            attempts: 3,
        };
        assert!(exhausted.message().contains("3 attempts"));
        let timed_out = TaskFailure::TimedOut {
            timeout_seconds: 300,
            attempts: 3,
        };
        assert!(timed_out.message().contains("300s"));
    }
}
