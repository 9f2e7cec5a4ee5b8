use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use dante_model::JobId;
use tracing::debug;

use crate::{ApiError, ControlHandler};

/// HTTP API service builder.
pub struct HttpApi<H> {
    handler: Arc<H>,
}

impl<H> HttpApi<H>
where
    H: ControlHandler,
{
    pub fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }

    /// Build axum router with mounted endpoints.
    ///
    /// Routes:
    /// - GET /api/v1/jobs - List active jobs
    /// - GET /api/v1/jobs/{id} - Inspect one job
    /// - POST /api/v1/jobs/{id}/cancel - Cancel a job
    /// - GET /healthz - Liveness
    pub fn router(self) -> Router {
        Router::new()
            .route("/api/v1/jobs", get(list_jobs::<H>))
            .route("/api/v1/jobs/{id}", get(get_job::<H>))
            .route("/api/v1/jobs/{id}/cancel", post(cancel_job::<H>))
            .route("/healthz", get(healthz))
            .with_state(self.handler)
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/jobs
async fn list_jobs<H>(State(handler): State<Arc<H>>) -> Result<impl IntoResponse, ApiError>
where
    H: ControlHandler,
{
    let jobs = handler.list_jobs().await?;
    debug!(target: "dante.api", count = jobs.len(), "jobs listed");
    Ok(Json(jobs))
}

/// GET /api/v1/jobs/{id}
async fn get_job<H>(
    State(handler): State<Arc<H>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    H: ControlHandler,
{
    let job_id = parse_id(id)?;
    match handler.get_job(&job_id).await? {
        Some(job) => Ok(Json(job)),
        None => Err(ApiError::NotFound(job_id.to_string())),
    }
}

/// POST /api/v1/jobs/{id}/cancel
async fn cancel_job<H>(
    State(handler): State<Arc<H>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    H: ControlHandler,
{
    let job_id = parse_id(id)?;
    handler.cancel_job(&job_id).await?;
    debug!(target: "dante.api", %job_id, "job cancel requested");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /healthz
async fn healthz() -> &'static str {
    "ok"
}

fn parse_id(id: String) -> Result<JobId, ApiError> {
    let job_id = JobId::from(id);
    if job_id.is_empty() {
        return Err(ApiError::InvalidRequest("job_id cannot be empty".into()));
    }
    Ok(job_id)
}
