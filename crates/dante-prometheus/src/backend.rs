use std::time::Duration;

use dante_core::{MetricsBackend, SampleOutcome};
use dante_model::{ExecutionKind, TaskState};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
    proto::MetricFamily,
};
use tracing::warn;

/// Task durations range from seconds to days.
const DURATION_BUCKETS: &[f64] = &[
    1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3_600.0, 14_400.0, 43_200.0, 86_400.0,
];

#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    started: IntCounterVec,
    finished: IntCounterVec,
    duration: HistogramVec,
    rejected: IntCounterVec,
    samples: IntCounterVec,
}

impl PrometheusMetrics {
    /// Registers every collector on a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let started = IntCounterVec::new(
            Opts::new("dante_tasks_started_total", "Tasks that reached in_progress"),
            &["kind"],
        )?;
        let finished = IntCounterVec::new(
            Opts::new("dante_tasks_finished_total", "Tasks that reached a terminal state"),
            &["kind", "outcome"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new("dante_task_duration_seconds", "Admission to terminal status")
                .buckets(DURATION_BUCKETS.to_vec()),
            &["kind"],
        )?;
        let rejected = IntCounterVec::new(
            Opts::new("dante_tasks_rejected_total", "Dispatch messages not admitted"),
            &["reason"],
        )?;
        let samples = IntCounterVec::new(
            Opts::new("dante_usage_samples_total", "Metering ticks by result"),
            &["result"],
        )?;

        registry.register(Box::new(started.clone()))?;
        registry.register(Box::new(finished.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(rejected.clone()))?;
        registry.register(Box::new(samples.clone()))?;

        Ok(Self {
            registry,
            started,
            finished,
            duration,
            rejected,
            samples,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// Text exposition format, ready for a `/metrics` response body.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        if let Err(e) = encoder.encode(&self.gather(), &mut buf) {
            warn!(target: "dante.prometheus", error = %e, "metrics encode failed");
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }

    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }
}

impl MetricsBackend for PrometheusMetrics {
    fn record_task_started(&self, kind: ExecutionKind) {
        self.started.with_label_values(&[kind.as_str()]).inc();
    }

    fn record_task_finished(&self, kind: ExecutionKind, outcome: TaskState, duration: Duration) {
        self.finished
            .with_label_values(&[kind.as_str(), outcome.as_str()])
            .inc();
        self.duration
            .with_label_values(&[kind.as_str()])
            .observe(duration.as_secs_f64());
    }

    fn record_task_rejected(&self, reason: &'static str) {
        self.rejected.with_label_values(&[reason]).inc();
    }

    fn record_usage_sample(&self, outcome: SampleOutcome) {
        self.samples.with_label_values(&[outcome.as_str()]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_task_lifecycle() {
        let m = PrometheusMetrics::new().unwrap();
        m.record_task_started(ExecutionKind::Script);
        m.record_task_finished(ExecutionKind::Script, TaskState::Completed, Duration::from_secs(3));
        m.record_task_finished(ExecutionKind::Docker, TaskState::Failed, Duration::from_secs(90));

        assert_eq!(m.started.with_label_values(&["script"]).get(), 1);
        assert_eq!(m.finished.with_label_values(&["script", "completed"]).get(), 1);
        assert_eq!(m.finished.with_label_values(&["docker", "failed"]).get(), 1);
        assert_eq!(m.duration.with_label_values(&["docker"]).get_sample_count(), 1);
    }

    #[test]
    fn rejections_and_samples_by_label() {
        let m = PrometheusMetrics::new().unwrap();
        m.record_task_rejected("capacity");
        m.record_task_rejected("capacity");
        m.record_usage_sample(SampleOutcome::Posted);
        m.record_usage_sample(SampleOutcome::NoData);

        assert_eq!(m.rejected.with_label_values(&["capacity"]).get(), 2);
        assert_eq!(m.samples.with_label_values(&["posted"]).get(), 1);
        assert_eq!(m.samples.with_label_values(&["no_data"]).get(), 1);
    }

    #[test]
    fn renders_text_exposition() {
        let m = PrometheusMetrics::new().unwrap();
        m.record_task_started(ExecutionKind::Docker);
        let text = m.render();

        assert!(text.contains("dante_tasks_started_total{kind=\"docker\"} 1"));
        assert!(m.content_type().starts_with("text/plain"));
    }

    #[test]
    fn double_registration_fails() {
        let registry = Registry::new();
        PrometheusMetrics::with_registry(registry.clone()).unwrap();
        assert!(PrometheusMetrics::with_registry(registry).is_err());
    }
}
