use std::time::Duration;

use dante_model::{ExecutionKind, TaskState};

/// Result of one metering tick's usage post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    Posted,
    Failed,
    /// The probe had no metrics for the GPU.
    NoData,
}

impl SampleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleOutcome::Posted => "posted",
            SampleOutcome::Failed => "failed",
            SampleOutcome::NoData => "no_data",
        }
    }
}

/// Sink for handler metrics. Implementations must be cheap and non-blocking.
pub trait MetricsBackend: Send + Sync {
    fn record_task_started(&self, kind: ExecutionKind);

    fn record_task_finished(&self, kind: ExecutionKind, outcome: TaskState, duration: Duration);

    fn record_task_rejected(&self, reason: &'static str);

    fn record_usage_sample(&self, outcome: SampleOutcome);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsBackend for NoopMetrics {
    fn record_task_started(&self, _kind: ExecutionKind) {}

    fn record_task_finished(&self, _kind: ExecutionKind, _outcome: TaskState, _duration: Duration) {}

    fn record_task_rejected(&self, _reason: &'static str) {}

    fn record_usage_sample(&self, _outcome: SampleOutcome) {}
}
