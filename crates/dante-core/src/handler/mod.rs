use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use dante_billing::{BillingApi, NoopBilling, SessionEnd};
use dante_exec::{StartSignal, Workspace, WorkspaceManager};
use dante_model::{
    EXIT_SETUP_ERROR, ExecutionError, ExecutionResult, JobId, Task, TaskState, TaskStatus,
    execution_log,
};
use dante_probe::{LiveMetrics, MetricsSampler};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    ActiveJobs, CoreError, Disposition, ExecutorRouter, MetricsBackend, NoopMetrics, StatusPublisher,
    TaskSink,
    meter::{Meter, MeterReport, MeteringConfig},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConfig {
    /// Tasks addressed to any other daemon are dropped.
    pub instance_id: String,
    pub max_concurrent_jobs: usize,
    pub metering: MeteringConfig,
}

impl HandlerConfig {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            max_concurrent_jobs: 1,
            metering: MeteringConfig::default(),
        }
    }
}

struct NoSamples;

impl MetricsSampler for NoSamples {
    fn sample(&self, _gpu_id: &str) -> Option<LiveMetrics> {
        None
    }
}

/// Drives dispatched tasks from admission to terminal status.
///
/// Every admitted task gets exactly one terminal status, its workspace is
/// removed, and `stop_billing` runs for metered sessions, whatever the
/// executor did.
pub struct TaskHandler {
    cfg: HandlerConfig,
    jobs: ActiveJobs,
    router: ExecutorRouter,
    workspaces: WorkspaceManager,
    publisher: Arc<dyn StatusPublisher>,
    billing: Arc<dyn BillingApi>,
    sampler: Arc<dyn MetricsSampler>,
    metrics: Arc<dyn MetricsBackend>,
    shutdown: CancellationToken,
}

impl TaskHandler {
    pub fn new(
        cfg: HandlerConfig,
        router: ExecutorRouter,
        workspaces: WorkspaceManager,
        publisher: Arc<dyn StatusPublisher>,
    ) -> Self {
        Self {
            cfg,
            jobs: ActiveJobs::new(),
            router,
            workspaces,
            publisher,
            billing: Arc::new(NoopBilling),
            sampler: Arc::new(NoSamples),
            metrics: Arc::new(NoopMetrics),
            shutdown: CancellationToken::new(),
        }
    }

    /// Meters sessions against `billing`, sampling GPUs through `sampler`.
    pub fn with_billing(mut self, billing: Arc<dyn BillingApi>, sampler: Arc<dyn MetricsSampler>) -> Self {
        self.billing = billing;
        self.sampler = sampler;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsBackend>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn jobs(&self) -> &ActiveJobs {
        &self.jobs
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.cfg
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancels one active job. It still publishes its terminal status.
    pub fn cancel(&self, id: &JobId) -> Result<(), CoreError> {
        if self.jobs.cancel(id) {
            info!(target: "dante.core.handler", job_id = %id, "cancel requested");
            Ok(())
        } else {
            Err(CoreError::UnknownJob(id.clone()))
        }
    }

    /// Refuses new tasks, cancels running ones, and waits up to `timeout` for
    /// them to finish. Returns false if jobs were still active at the deadline.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        info!(target: "dante.core.handler", active = self.jobs.len(), "shutting down task handler");
        self.shutdown.cancel();
        self.jobs.cancel_all();
        let drained = self.jobs.wait_empty(timeout).await;
        if !drained {
            warn!(target: "dante.core.handler", active = self.jobs.len(), "jobs still active after shutdown timeout");
        }
        drained
    }

    fn meter(&self) -> Meter {
        Meter {
            billing: Arc::clone(&self.billing),
            sampler: Arc::clone(&self.sampler),
            metrics: Arc::clone(&self.metrics),
            cfg: self.cfg.metering.clone(),
        }
    }

    fn admit(&self, task: &Task) -> Result<CancellationToken, CoreError> {
        if self.shutdown.is_cancelled() {
            return Err(CoreError::ShuttingDown);
        }
        let exec = self.shutdown.child_token();
        self.jobs
            .admit(task, self.cfg.max_concurrent_jobs.max(1), exec.clone())?;
        Ok(exec)
    }

    fn status(&self, id: &JobId, state: TaskState, message: impl Into<String>) -> TaskStatus {
        TaskStatus::new(id.clone(), self.cfg.instance_id.clone(), state, message)
    }

    fn setup_failed(&self, id: &JobId, message: impl Into<String>) -> TaskStatus {
        self.status(id, TaskState::Failed, message)
            .with_exit_code(EXIT_SETUP_ERROR)
    }

    async fn publish(&self, status: &TaskStatus) {
        self.jobs.set_state(&status.job_id, status.status);
        debug!(target: "dante.core.handler", job_id = %status.job_id, status = %status.status, "publishing status");
        if let Err(e) = self.publisher.publish(status).await {
            warn!(target: "dante.core.handler", job_id = %status.job_id, error = %e, "status publish failed");
        }
    }

    /// Everything between `preparing` and the terminal status.
    async fn drive(&self, task: &Task, exec: CancellationToken) -> TaskStatus {
        let id = &task.job_id;

        let workspaces = self.workspaces.clone();
        let job = id.clone();
        let workspace = match tokio::task::spawn_blocking(move || workspaces.prepare(&job)).await {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => return self.setup_failed(id, format!("workspace setup failed: {e}")),
            Err(e) => return self.setup_failed(id, format!("workspace setup failed: {e}")),
        };

        let Some(executor) = self.router.pick(task.execution_type).cloned() else {
            cleanup(workspace).await;
            return self.setup_failed(
                id,
                format!("no executor available for {}", task.execution_type),
            );
        };
        if exec.is_cancelled() {
            cleanup(workspace).await;
            return self.status(id, TaskState::Cancelled, "cancelled before start");
        }

        self.publish(&self.status(id, TaskState::InProgress, format!("running with {} executor", executor.name())))
            .await;
        self.metrics.record_task_started(task.execution_type);
        let accepted = Instant::now();

        let (signal, started) = StartSignal::channel();
        // Executor panics surface as a JoinError.
        let run = {
            let exec = exec.clone();
            let task = task.clone();
            let path = workspace.path().to_path_buf();
            tokio::spawn(async move { executor.execute(exec, &task, &path, signal).await })
        };

        // Resolves unfired if the executor returns before its workload starts.
        let started_at = started.await.ok();
        let meter = match (started_at, task.session_id()) {
            (Some(_), Some(session)) => {
                if let Err(e) = self.billing.start_billing(session, id.as_str()).await {
                    warn!(target: "dante.core.handler", job_id = %id, error = %e, "start_billing failed");
                }
                let gpu = task
                    .selected_gpu
                    .as_ref()
                    .map(|g| g.instance_id.clone())
                    .unwrap_or_default();
                Some(self.meter().spawn(session.to_string(), gpu, exec.clone()))
            }
            _ => None,
        };

        let result = match run.await {
            Ok(result) => result,
            Err(e) => {
                warn!(target: "dante.core.handler", job_id = %id, error = %e, "executor task failed");
                ExecutionResult::setup_failure(ExecutionError::Panicked(e.to_string()))
            }
        };
        let elapsed = accepted.elapsed();
        let billed = started_at.map(|at| at.elapsed()).unwrap_or_default();

        let report = match meter {
            Some(handle) => handle.stop().await,
            None => MeterReport::default(),
        };
        let terminal = self.classify(task, &result, report);

        if let Some(session) = task.session_id() {
            self.stop_billing(session, id, terminal.status, billed).await;
        }
        cleanup(workspace).await;
        self.metrics
            .record_task_finished(task.execution_type, terminal.status, elapsed);
        terminal
    }

    async fn stop_billing(&self, session: &str, id: &JobId, outcome: TaskState, billed: Duration) {
        let end = SessionEnd {
            session_id: session.to_string(),
            job_id: id.to_string(),
            reason: outcome.as_str().to_string(),
            duration_hours: billed.as_secs_f64() / 3600.0,
        };
        let limit = self.cfg.metering.stop_timeout();
        match tokio::time::timeout(limit, self.billing.stop_billing(&end)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(target: "dante.core.handler", job_id = %id, error = %e, "stop_billing failed"),
            Err(_) => warn!(target: "dante.core.handler", job_id = %id, "stop_billing timed out"),
        }
    }

    fn classify(&self, task: &Task, result: &ExecutionResult, report: MeterReport) -> TaskStatus {
        let (state, message) = if report.defunded {
            (TaskState::Cancelled, "session no longer funded".to_string())
        } else {
            match &result.error {
                Some(e) if e.is_cancelled() => (TaskState::Cancelled, "cancelled".to_string()),
                Some(e) => (TaskState::Failed, e.to_string()),
                None if result.exit_code != 0 => (
                    TaskState::Failed,
                    format!("exited with code {}", result.exit_code),
                ),
                None => (TaskState::Completed, "completed".to_string()),
            }
        };
        self.status(&task.job_id, state, message)
            .with_exit_code(result.exit_code)
            .with_log(execution_log(&result.stdout, &result.stderr))
    }
}

async fn cleanup(workspace: Workspace) {
    let path = workspace.path().to_path_buf();
    match tokio::task::spawn_blocking(move || workspace.cleanup()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(target: "dante.core.handler", path = %path.display(), error = %e, "workspace cleanup failed"),
        Err(e) => warn!(target: "dante.core.handler", path = %path.display(), error = %e, "workspace cleanup panicked"),
    }
}

#[async_trait]
impl TaskSink for TaskHandler {
    #[instrument(level = "info", skip_all, fields(job_id = %task.job_id, kind = %task.execution_type))]
    async fn run(&self, task: Task) -> Disposition {
        if !task.is_addressed_to(&self.cfg.instance_id) {
            warn!(
                target: "dante.core.handler",
                assigned = %task.assigned_provider_id,
                "task addressed to another daemon; dropping"
            );
            return Disposition::Ack;
        }
        let exec = match self.admit(&task) {
            Ok(token) => token,
            Err(e) => {
                info!(target: "dante.core.handler", reason = %e, "task not admitted; will be redelivered");
                self.metrics.record_task_rejected(e.kind());
                return Disposition::Retry;
            }
        };
        info!(target: "dante.core.handler", name = %task.job_name, "task accepted");

        self.publish(&self.status(&task.job_id, TaskState::Preparing, "preparing workspace"))
            .await;
        let terminal = self.drive(&task, exec).await;
        info!(
            target: "dante.core.handler",
            status = %terminal.status,
            exit_code = ?terminal.exit_code,
            message = %terminal.message,
            "task finished"
        );
        self.publish(&terminal).await;
        self.jobs.remove(&task.job_id);
        Disposition::Ack
    }
}

#[cfg(test)]
mod tests {
    use std::{path::Path, sync::Mutex};

    use dante_exec::Executor;
    use dante_model::{ExecutionKind, JobParams};

    use super::*;

    #[derive(Default)]
    struct Outbox(Mutex<Vec<TaskStatus>>);

    #[async_trait]
    impl StatusPublisher for Outbox {
        async fn publish(&self, status: &TaskStatus) -> Result<(), CoreError> {
            self.0.lock().unwrap().push(status.clone());
            Ok(())
        }
    }

    impl Outbox {
        fn states(&self) -> Vec<TaskState> {
            self.0.lock().unwrap().iter().map(|s| s.status).collect()
        }

        fn last(&self) -> TaskStatus {
            self.0.lock().unwrap().last().cloned().unwrap()
        }
    }

    struct Canned(ExecutionResult);

    #[async_trait]
    impl Executor for Canned {
        fn name(&self) -> &'static str {
            "canned"
        }

        fn supports(&self, kind: ExecutionKind) -> bool {
            kind == ExecutionKind::Script
        }

        async fn execute(
            &self,
            _: CancellationToken,
            _: &Task,
            workspace: &Path,
            mut started: StartSignal,
        ) -> ExecutionResult {
            assert!(workspace.is_dir());
            started.fire();
            self.0.clone()
        }
    }

    struct Panics;

    #[async_trait]
    impl Executor for Panics {
        fn name(&self) -> &'static str {
            "panics"
        }

        fn supports(&self, _: ExecutionKind) -> bool {
            true
        }

        async fn execute(&self, _: CancellationToken, _: &Task, _: &Path, _: StartSignal) -> ExecutionResult {
            panic!("executor bug")
        }
    }

    fn handler(executor: Arc<dyn Executor>, root: &Path) -> (TaskHandler, Arc<Outbox>) {
        let outbox = Arc::new(Outbox::default());
        let h = TaskHandler::new(
            HandlerConfig::new("provider-test"),
            ExecutorRouter::new().with(executor),
            WorkspaceManager::new(root),
            outbox.clone(),
        );
        (h, outbox)
    }

    fn task(id: &str) -> Task {
        Task::new(id, "provider-test", ExecutionKind::Script, JobParams::new())
    }

    #[tokio::test]
    async fn completed_task_publishes_full_sequence() {
        let root = tempfile::tempdir().unwrap();
        let ok = ExecutionResult::success("hi\n".into(), String::new());
        let (h, outbox) = handler(Arc::new(Canned(ok)), root.path());

        assert_eq!(h.run(task("j1")).await, Disposition::Ack);
        assert_eq!(
            outbox.states(),
            [TaskState::Preparing, TaskState::InProgress, TaskState::Completed]
        );
        let last = outbox.last();
        assert_eq!(last.exit_code, Some(0));
        assert!(last.execution_log.unwrap().contains("hi"));
        assert!(h.jobs().is_empty());
        assert!(!root.path().join("job-j1").exists());
    }

    #[tokio::test]
    async fn non_zero_exit_fails() {
        let root = tempfile::tempdir().unwrap();
        let r = ExecutionResult {
            exit_code: 3,
            ..Default::default()
        };
        let (h, outbox) = handler(Arc::new(Canned(r)), root.path());
        h.run(task("j1")).await;
        let last = outbox.last();
        assert_eq!(last.status, TaskState::Failed);
        assert_eq!(last.exit_code, Some(3));
    }

    #[tokio::test]
    async fn cancelled_error_maps_to_cancelled() {
        let root = tempfile::tempdir().unwrap();
        let r = ExecutionResult::setup_failure(ExecutionError::Cancelled);
        let (h, outbox) = handler(Arc::new(Canned(r)), root.path());
        h.run(task("j1")).await;
        assert_eq!(outbox.last().status, TaskState::Cancelled);
    }

    #[tokio::test]
    async fn misrouted_task_is_acked_silently() {
        let root = tempfile::tempdir().unwrap();
        let (h, outbox) = handler(Arc::new(Canned(ExecutionResult::default())), root.path());
        let mut t = task("j1");
        t.assigned_provider_id = "other".into();

        assert_eq!(h.run(t).await, Disposition::Ack);
        assert!(outbox.states().is_empty());
        assert!(!root.path().join("job-j1").exists());
    }

    #[tokio::test]
    async fn missing_executor_fails_in_preparing() {
        let root = tempfile::tempdir().unwrap();
        let (h, outbox) = handler(Arc::new(Canned(ExecutionResult::default())), root.path());
        let t = Task::new("j1", "provider-test", ExecutionKind::Docker, JobParams::new());

        h.run(t).await;
        assert_eq!(outbox.states(), [TaskState::Preparing, TaskState::Failed]);
        let last = outbox.last();
        assert_eq!(last.exit_code, Some(EXIT_SETUP_ERROR));
        assert!(last.message.contains("no executor available"));
    }

    #[tokio::test]
    async fn executor_panic_becomes_failed() {
        let root = tempfile::tempdir().unwrap();
        let (h, outbox) = handler(Arc::new(Panics), root.path());
        h.run(task("j1")).await;

        let last = outbox.last();
        assert_eq!(last.status, TaskState::Failed);
        assert_eq!(last.exit_code, Some(EXIT_SETUP_ERROR));
        assert!(h.jobs().is_empty());
    }

    #[tokio::test]
    async fn invalid_job_id_fails_workspace_setup() {
        let root = tempfile::tempdir().unwrap();
        let (h, outbox) = handler(Arc::new(Canned(ExecutionResult::default())), root.path());
        h.run(task("../escape")).await;

        assert_eq!(outbox.states(), [TaskState::Preparing, TaskState::Failed]);
        assert!(outbox.last().message.starts_with("workspace setup failed"));
    }

    #[tokio::test]
    async fn shutdown_refuses_new_tasks() {
        let root = tempfile::tempdir().unwrap();
        let (h, outbox) = handler(Arc::new(Canned(ExecutionResult::default())), root.path());
        assert!(h.shutdown(Duration::from_millis(10)).await);

        assert_eq!(h.run(task("j1")).await, Disposition::Retry);
        assert!(outbox.states().is_empty());
    }

    #[test]
    fn cancel_unknown_job_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let (h, _) = handler(Arc::new(Canned(ExecutionResult::default())), root.path());
        assert_eq!(
            h.cancel(&JobId::from("nope")),
            Err(CoreError::UnknownJob(JobId::from("nope")))
        );
    }
}
