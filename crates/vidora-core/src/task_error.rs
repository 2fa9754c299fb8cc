//! Task execution error types
//!
//! Handlers return `anyhow::Error`; wrapping it in a [`TaskError`] lets a handler tell the
//! queue whether the failure should consume another attempt or fail the task at once.

use std::fmt;

/// Task execution error that can be either recoverable or unrecoverable
#[derive(Debug)]
pub struct TaskError {
    inner: anyhow::Error,
    recoverable: bool,
}

impl TaskError {
    /// The task fails immediately, without retrying.
    ///
    /// For failures that cannot change between attempts: a payload that does not
    /// deserialize, or an asset row that no longer exists.
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: false,
        }
    }

    /// The task is retried according to its attempt budget.
    ///
    /// Missing or empty staged files are recoverable too: the attempt is consumed so the
    /// failure is surfaced loudly, even though a retry rarely helps.
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: true,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }

    /// Returns false only for errors explicitly wrapped with [`TaskError::unrecoverable`].
    pub fn is_recoverable_error(err: &anyhow::Error) -> bool {
        err.downcast_ref::<TaskError>()
            .map(|te| te.is_recoverable())
            .unwrap_or(true)
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.inner)
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for TaskError {
    /// Default conversion from anyhow::Error creates a recoverable error
    fn from(err: anyhow::Error) -> Self {
        Self::recoverable(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecoverable_error() {
        let err = TaskError::unrecoverable(anyhow::anyhow!("asset 12 does not exist"));
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("asset 12"));
    }

    #[test]
    fn test_recoverable_error() {
        let err = TaskError::recoverable(anyhow::anyhow!("staged file missing"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_from_anyhow() {
        let err: TaskError = anyhow::anyhow!("Some error").into();
        assert!(err.is_recoverable(), "Default should be recoverable");
    }

    #[test]
    fn plain_anyhow_errors_count_as_recoverable() {
        let plain = anyhow::anyhow!("ffmpeg crashed");
        assert!(TaskError::is_recoverable_error(&plain));

        let wrapped: anyhow::Error = TaskError::unrecoverable(anyhow::anyhow!("bad payload")).into();
        assert!(!TaskError::is_recoverable_error(&wrapped));
    }
}
