//! Periodic usage reporting for metered sessions.
//!
//! While a task with a `session_id` runs, the meter samples its GPU on a
//! fixed interval, posts each sample to billing, and every `status_every`
//! ticks asks billing whether the session is still funded. An unfunded or
//! inactive session cancels the task's execution token. Billing failures
//! never stop the task.

use std::{sync::Arc, time::Duration};

use dante_billing::{BillingApi, UsageSample};
use dante_probe::{LiveMetrics, MetricsSampler};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::{MetricsBackend, SampleOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeteringConfig {
    pub interval_ms: u64,
    /// Check the session every N ticks.
    pub status_every: u64,
    /// Deadline for `stop_billing` after a task exits.
    pub stop_timeout_ms: u64,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            status_every: 1,
            stop_timeout_ms: 10_000,
        }
    }
}

impl MeteringConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// What the meter did over a task's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeterReport {
    pub ticks: u64,
    pub samples_posted: u64,
    /// The meter cancelled execution because the session ran out.
    pub defunded: bool,
}

/// Converts probe metrics into the billing wire sample. Missing readings are zero.
pub fn usage_sample(session_id: &str, m: &LiveMetrics) -> UsageSample {
    fn percent(v: Option<f32>) -> u8 {
        v.map(|p| p.round().clamp(0.0, 100.0) as u8).unwrap_or(0)
    }
    UsageSample {
        session_id: session_id.to_string(),
        gpu_utilization_percent: percent(m.utilization_percent),
        vram_utilization_percent: percent(m.vram_utilization_percent()),
        power_draw_w: m
            .power_draw_w
            .map(|w| w.round().clamp(0.0, u32::MAX as f32) as u32)
            .unwrap_or(0),
        temperature_c: m
            .temperature_c
            .map(|t| t.round().clamp(0.0, u8::MAX as f32) as u8)
            .unwrap_or(0),
        timestamp: OffsetDateTime::now_utc(),
    }
}

#[derive(Clone)]
pub(crate) struct Meter {
    pub(crate) billing: Arc<dyn BillingApi>,
    pub(crate) sampler: Arc<dyn MetricsSampler>,
    pub(crate) metrics: Arc<dyn MetricsBackend>,
    pub(crate) cfg: MeteringConfig,
}

pub(crate) struct MeterHandle {
    stop: CancellationToken,
    join: JoinHandle<MeterReport>,
}

impl MeterHandle {
    /// Stops the loop and returns its report.
    pub(crate) async fn stop(self) -> MeterReport {
        self.stop.cancel();
        self.join.await.unwrap_or_default()
    }
}

impl Meter {
    /// Starts metering `session_id` on `gpu_id`; cancels `exec` if the session is defunded.
    pub(crate) fn spawn(&self, session_id: String, gpu_id: String, exec: CancellationToken) -> MeterHandle {
        let stop = CancellationToken::new();
        let meter = self.clone();
        let join = tokio::spawn(meter.run(stop.clone(), session_id, gpu_id, exec));
        MeterHandle { stop, join }
    }

    #[instrument(level = "debug", skip_all, fields(%session_id, %gpu_id))]
    async fn run(self, stop: CancellationToken, session_id: String, gpu_id: String, exec: CancellationToken) -> MeterReport {
        let mut report = MeterReport::default();
        let mut ticker = tokio::time::interval(self.cfg.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let status_every = self.cfg.status_every.max(1);

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }
            report.ticks += 1;
            let check_status = report.ticks % status_every == 0;

            let step = self.tick(&session_id, &gpu_id, check_status);
            let (posted, funded) = tokio::select! {
                _ = stop.cancelled() => break,
                r = step => r,
            };
            if posted {
                report.samples_posted += 1;
            }
            if !funded {
                warn!(target: "dante.core.meter", "session no longer funded; cancelling task");
                report.defunded = true;
                exec.cancel();
                break;
            }
        }
        debug!(target: "dante.core.meter", ticks = report.ticks, posted = report.samples_posted, "meter stopped");
        report
    }

    /// One sample-and-check round. Returns (sample posted, session still funded).
    async fn tick(&self, session_id: &str, gpu_id: &str, check_status: bool) -> (bool, bool) {
        let sampler = Arc::clone(&self.sampler);
        let gpu = gpu_id.to_string();
        let metrics = tokio::task::spawn_blocking(move || sampler.sample(&gpu))
            .await
            .ok()
            .flatten();

        let outcome = match metrics {
            Some(m) => {
                let sample = usage_sample(session_id, &m);
                match self.billing.post_usage(&sample).await {
                    Ok(()) => SampleOutcome::Posted,
                    Err(e) => {
                        warn!(target: "dante.core.meter", error = %e, "usage post failed");
                        SampleOutcome::Failed
                    }
                }
            }
            None => {
                trace!(target: "dante.core.meter", "no metrics for gpu");
                SampleOutcome::NoData
            }
        };
        self.metrics.record_usage_sample(outcome);

        if !check_status {
            return (outcome == SampleOutcome::Posted, true);
        }
        let funded = match self.billing.session_status(session_id).await {
            Ok(status) => {
                trace!(target: "dante.core.meter", state = %status.state, balance = status.remaining_balance, "session status");
                status.is_funded()
            }
            Err(e) => {
                // Treated as funded; the next tick asks again.
                warn!(target: "dante.core.meter", error = %e, "session status check failed");
                true
            }
        };
        (outcome == SampleOutcome::Posted, funded)
    }
}
