//! Prometheus metrics backend for the provider daemon.
//!
//! [`PrometheusMetrics`] implements [`dante_core::MetricsBackend`] over its own
//! [`Registry`]. Hand a clone to the task handler and serve [`PrometheusMetrics::render`]
//! (or [`PrometheusMetrics::gather`] with a [`TextEncoder`]) from `/metrics`.
//!
//! ## Metrics
//! - `dante_tasks_started_total{kind}` - Counter
//! - `dante_tasks_finished_total{kind, outcome}` - Counter
//! - `dante_task_duration_seconds{kind}` - Histogram
//! - `dante_tasks_rejected_total{reason}` - Counter
//! - `dante_usage_samples_total{result}` - Counter

mod backend;
pub use backend::PrometheusMetrics;

pub use prometheus::{Encoder, Registry, TextEncoder};
