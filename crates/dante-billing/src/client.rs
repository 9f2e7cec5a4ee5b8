use async_trait::async_trait;
use reqwest::Response;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::{BillingConfig, BillingError, SessionEnd, SessionStatus, UsageSample};

/// Longest response body kept in [`BillingError::Status`].
const ERROR_BODY_LIMIT: usize = 512;

/// Metering service operations used by the task handler.
#[async_trait]
pub trait BillingApi: Send + Sync {
    /// Posts one usage sample. Callers treat failures as best-effort.
    async fn post_usage(&self, sample: &UsageSample) -> Result<(), BillingError>;

    /// Current state and balance of `session_id`.
    async fn session_status(&self, session_id: &str) -> Result<SessionStatus, BillingError>;

    /// Marks the start of execution for a scheduler-created session.
    async fn start_billing(&self, session_id: &str, job_id: &str) -> Result<(), BillingError>;

    /// Marks the end of execution. Called on every exit path.
    async fn stop_billing(&self, end: &SessionEnd) -> Result<(), BillingError>;
}

/// HTTP client for the metering service.
#[derive(Clone)]
pub struct BillingClient {
    http: reqwest::Client,
    cfg: BillingConfig,
}

impl BillingClient {
    pub fn new(cfg: BillingConfig) -> Result<Self, BillingError> {
        let http = reqwest::Client::builder().timeout(cfg.timeout()).build()?;
        Ok(Self { http, cfg })
    }

    pub fn config(&self) -> &BillingConfig {
        &self.cfg
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Response, BillingError> {
        let resp = self.http.post(self.cfg.endpoint(path)).json(body).send().await?;
        check(resp).await
    }
}

async fn check(resp: Response) -> Result<Response, BillingError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let mut body = resp.text().await.unwrap_or_default();
    if body.len() > ERROR_BODY_LIMIT {
        let mut end = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    Err(BillingError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl BillingApi for BillingClient {
    #[instrument(level = "trace", skip_all, fields(session_id = %sample.session_id))]
    async fn post_usage(&self, sample: &UsageSample) -> Result<(), BillingError> {
        debug!(
            target: "dante.billing",
            gpu = sample.gpu_utilization_percent,
            vram = sample.vram_utilization_percent,
            power_w = sample.power_draw_w,
            "posting usage sample"
        );
        self.post("usage-update", sample).await.map(|_| ())
    }

    async fn session_status(&self, session_id: &str) -> Result<SessionStatus, BillingError> {
        let url = self.cfg.endpoint(&format!("current-usage/{session_id}"));
        let resp = check(self.http.get(url).send().await?).await?;
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| BillingError::InvalidResponse(e.to_string()))
    }

    async fn start_billing(&self, session_id: &str, job_id: &str) -> Result<(), BillingError> {
        info!(target: "dante.billing", %session_id, %job_id, "billing started");
        // Sessions are opened by the scheduler; this only confirms the one we were given.
        let status = self.session_status(session_id).await?;
        if !status.is_funded() {
            warn!(
                target: "dante.billing",
                %session_id,
                state = %status.state,
                remaining_balance = status.remaining_balance,
                "session is not active or funded at start"
            );
        }
        Ok(())
    }

    async fn stop_billing(&self, end: &SessionEnd) -> Result<(), BillingError> {
        info!(
            target: "dante.billing",
            session_id = %end.session_id,
            job_id = %end.job_id,
            reason = %end.reason,
            "billing stopped"
        );
        self.post("end-session", end).await.map(|_| ())
    }
}

/// Stand-in used when billing is disabled: records nothing and reports every
/// session as funded.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBilling;

#[async_trait]
impl BillingApi for NoopBilling {
    async fn post_usage(&self, _sample: &UsageSample) -> Result<(), BillingError> {
        Ok(())
    }

    async fn session_status(&self, _session_id: &str) -> Result<SessionStatus, BillingError> {
        Ok(SessionStatus::active(f64::MAX))
    }

    async fn start_billing(&self, _session_id: &str, _job_id: &str) -> Result<(), BillingError> {
        Ok(())
    }

    async fn stop_billing(&self, _end: &SessionEnd) -> Result<(), BillingError> {
        Ok(())
    }
}
