use std::sync::Arc;

use async_trait::async_trait;
use dante_core::{ActiveJob, TaskHandler};
use dante_model::JobId;
use tracing::info;

use crate::{ApiError, ControlHandler};

/// Serves the control routes straight from a [`TaskHandler`].
pub struct TaskHandlerAdapter {
    handler: Arc<TaskHandler>,
}

impl TaskHandlerAdapter {
    pub fn new(handler: Arc<TaskHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl ControlHandler for TaskHandlerAdapter {
    async fn list_jobs(&self) -> Result<Vec<ActiveJob>, ApiError> {
        Ok(self.handler.jobs().list())
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<ActiveJob>, ApiError> {
        Ok(self.handler.jobs().get(id))
    }

    async fn cancel_job(&self, id: &JobId) -> Result<(), ApiError> {
        self.handler.cancel(id)?;
        info!(target: "dante.api", job_id = %id, "job cancelled via control api");
        Ok(())
    }
}
