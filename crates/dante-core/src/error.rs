use dante_model::JobId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("handler is shutting down")]
    ShuttingDown,

    #[error("job {0} is already active")]
    DuplicateJob(JobId),

    #[error("at capacity ({limit} active jobs)")]
    AtCapacity { limit: usize },

    #[error("job {0} is not active")]
    UnknownJob(JobId),

    #[error("status publish failed: {0}")]
    Publish(String),
}

impl CoreError {
    /// Admission failures that clear up on their own; the message should be redelivered later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::ShuttingDown | CoreError::DuplicateJob(_) | CoreError::AtCapacity { .. }
        )
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::ShuttingDown => "shutting_down",
            CoreError::DuplicateJob(_) => "duplicate",
            CoreError::AtCapacity { .. } => "capacity",
            CoreError::UnknownJob(_) => "unknown_job",
            CoreError::Publish(_) => "publish",
        }
    }
}
