use async_trait::async_trait;
use dante_core::ActiveJob;
use dante_model::JobId;

use crate::ApiError;

/// Operations behind the control routes.
#[async_trait]
pub trait ControlHandler: Send + Sync + 'static {
    async fn list_jobs(&self) -> Result<Vec<ActiveJob>, ApiError>;

    async fn get_job(&self, id: &JobId) -> Result<Option<ActiveJob>, ApiError>;

    /// Cancels a running job. Unknown IDs are [`ApiError::NotFound`].
    async fn cancel_job(&self, id: &JobId) -> Result<(), ApiError>;
}
