//! Task lifecycle for the provider daemon.
//!
//! [`TaskHandler`] takes a dispatched [`Task`](dante_model::Task) through
//! `preparing → in_progress → {completed | failed | cancelled}`: it admits the
//! task into the [`ActiveJobs`] table, prepares a workspace, picks an executor
//! from the [`ExecutorRouter`], meters the session while the task runs, and
//! publishes every status through a [`StatusPublisher`].

pub mod error;
pub use error::CoreError;

mod state;
pub use state::{ActiveJob, ActiveJobs};

mod router;
pub use router::ExecutorRouter;

mod publish;
pub use publish::{Disposition, StatusPublisher, TaskSink};

mod metrics;
pub use metrics::{MetricsBackend, NoopMetrics, SampleOutcome};

mod meter;
pub use meter::{MeterReport, MeteringConfig, usage_sample};

mod handler;
pub use handler::{HandlerConfig, TaskHandler};
