use thiserror::Error;
use vidora_core::models::AssetId;
use vidora_core::{AppError, TaskError};
use vidora_storage::StorageError;

/// Failures raised by the pipeline workers.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Source file missing: {0}")]
    SourceMissing(String),

    #[error("Source file is empty: {0}")]
    EmptySource(String),

    #[error("Failed to promote {from} to {to}: {reason}")]
    PromotionFailed {
        from: String,
        to: String,
        reason: String,
    },

    #[error("{tool} failed: {reason}")]
    ToolInvocationFailed { tool: &'static str, reason: String },

    #[error("Asset not found: {0}")]
    AssetNotFound(AssetId),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Repository error: {0}")]
    Repository(AppError),
}

impl From<AppError> for PipelineError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::AssetNotFound(id) => PipelineError::AssetNotFound(id),
            other => PipelineError::Repository(other),
        }
    }
}

impl PipelineError {
    pub fn tool(tool: &'static str, reason: impl Into<String>) -> Self {
        PipelineError::ToolInvocationFailed {
            tool,
            reason: reason.into(),
        }
    }

    /// Whether another attempt could succeed.
    ///
    /// Missing and empty sources still consume an attempt so they surface in the task
    /// history; a deleted asset or an invalid key never recovers.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::SourceMissing(_)
            | PipelineError::EmptySource(_)
            | PipelineError::PromotionFailed { .. }
            | PipelineError::ToolInvocationFailed { .. } => true,
            PipelineError::AssetNotFound(_) => false,
            PipelineError::Storage(StorageError::InvalidKey(_)) => false,
            PipelineError::Storage(_) => true,
            PipelineError::Repository(e) => e.is_recoverable(),
        }
    }

    /// Stable name for structured logs and task results.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::SourceMissing(_) => "source_missing",
            PipelineError::EmptySource(_) => "empty_source",
            PipelineError::PromotionFailed { .. } => "promotion_failed",
            PipelineError::ToolInvocationFailed { .. } => "tool_invocation_failed",
            PipelineError::AssetNotFound(_) => "asset_not_found",
            PipelineError::Storage(_) => "storage",
            PipelineError::Repository(_) => "repository",
        }
    }
}

impl From<PipelineError> for TaskError {
    fn from(err: PipelineError) -> Self {
        if err.is_retryable() {
            TaskError::recoverable(err)
        } else {
            TaskError::unrecoverable(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_asset_is_terminal() {
        let err: PipelineError = AppError::AssetNotFound(3).into();
        assert!(matches!(err, PipelineError::AssetNotFound(3)));
        assert!(!err.is_retryable());
        assert!(!TaskError::from(err).is_recoverable());
    }

    #[test]
    fn source_errors_consume_attempts() {
        assert!(PipelineError::SourceMissing("tmp/a.mp4".into()).is_retryable());
        assert!(PipelineError::EmptySource("tmp/a.mp4".into()).is_retryable());
        assert!(PipelineError::tool("ffmpeg", "exit status 1").is_retryable());
    }

    #[test]
    fn invalid_keys_are_terminal() {
        let err = PipelineError::Storage(StorageError::InvalidKey("../x".into()));
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "storage");
    }
}
