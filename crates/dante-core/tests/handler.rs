//! End-to-end lifecycle runs through the task handler with the real script
//! executor and in-memory stand-ins for the transport, billing, probe, and
//! container engine.

use std::{
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use dante_billing::{BillingApi, BillingError, SessionEnd, SessionStatus, UsageSample};
use dante_core::{
    CoreError, Disposition, ExecutorRouter, HandlerConfig, MeteringConfig, StatusPublisher,
    TaskHandler, TaskSink,
};
use dante_exec::{
    ContainerConfig, ContainerExecutor, ScriptConfig, ScriptExecutor, WorkspaceManager,
    container::{ContainerLogs, ContainerRuntime, ContainerSpec, RuntimeError, WaitOutcome},
};
use dante_model::{
    EXIT_SCRIPT_TIMEOUT, ExecutionKind, JobId, JobParams, SelectedGpu, Task, TaskState, TaskStatus,
};
use dante_probe::{LiveMetrics, MetricsSampler};
use time::OffsetDateTime;
use tokio::sync::Notify;

const PROVIDER: &str = "provider-test";

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

    fn terminal(&self) -> TaskStatus {
        let all = self.0.lock().unwrap();
        let terminal: Vec<_> = all.iter().filter(|s| s.status.is_terminal()).collect();
        assert_eq!(terminal.len(), 1, "exactly one terminal status: {all:?}");
        terminal[0].clone()
    }
}

#[derive(Default)]
struct Ledger {
    samples: Mutex<Vec<UsageSample>>,
    ends: Mutex<Vec<SessionEnd>>,
    checks: AtomicU64,
    defund_at: u64,
}

#[async_trait]
impl BillingApi for Ledger {
    async fn post_usage(&self, sample: &UsageSample) -> Result<(), BillingError> {
        self.samples.lock().unwrap().push(sample.clone());
        Ok(())
    }

    async fn session_status(&self, _: &str) -> Result<SessionStatus, BillingError> {
        let n = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
        if self.defund_at != 0 && n >= self.defund_at {
            Ok(SessionStatus::inactive("insufficient_funds"))
        } else {
            Ok(SessionStatus::active(5.0))
        }
    }

    async fn start_billing(&self, _: &str, _: &str) -> Result<(), BillingError> {
        Ok(())
    }

    async fn stop_billing(&self, end: &SessionEnd) -> Result<(), BillingError> {
        self.ends.lock().unwrap().push(end.clone());
        Ok(())
    }
}

struct Gpu;

impl MetricsSampler for Gpu {
    fn sample(&self, gpu_id: &str) -> Option<LiveMetrics> {
        Some(LiveMetrics {
            gpu_id: gpu_id.to_string(),
            utilization_percent: Some(90.0),
            vram_used_mb: Some(1024),
            vram_total_mb: Some(4096),
            temperature_c: Some(70.0),
            power_draw_w: Some(200.0),
            sampled_at: OffsetDateTime::now_utc(),
        })
    }
}

/// Container engine whose containers print "ok" and exit 0, or run until stopped.
#[derive(Default)]
struct Engine {
    long_running: bool,
    pull_delay: Duration,
    stopped: Notify,
    created: AtomicU64,
    removed: AtomicU64,
}

#[async_trait]
impl ContainerRuntime for Engine {
    async fn pull_image(&self, _: &str) -> Result<(), RuntimeError> {
        tokio::time::sleep(self.pull_delay).await;
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        assert!(spec.workspace.is_dir());
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok("c-1".into())
    }

    async fn start(&self, _: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn wait(&self, _: &str) -> Result<WaitOutcome, RuntimeError> {
        if self.long_running {
            self.stopped.notified().await;
            return Ok(WaitOutcome {
                exit_code: Some(137),
                error: None,
            });
        }
        Ok(WaitOutcome {
            exit_code: Some(0),
            error: None,
        })
    }

    async fn stop(&self, _: &str, _: Duration) -> Result<(), RuntimeError> {
        self.stopped.notify_waiters();
        Ok(())
    }

    async fn logs(&self, _: &str) -> Result<ContainerLogs, RuntimeError> {
        Ok(ContainerLogs {
            stdout: "ok\n".into(),
            stderr: String::new(),
        })
    }

    async fn exit_code(&self, _: &str) -> Result<Option<i64>, RuntimeError> {
        Ok(Some(137))
    }

    async fn remove(&self, _: &str) -> Result<(), RuntimeError> {
        self.removed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Rig {
    handler: TaskHandler,
    outbox: Arc<Outbox>,
    ledger: Arc<Ledger>,
    engine: Arc<Engine>,
    root: tempfile::TempDir,
}

fn rig(engine: Engine, ledger: Ledger) -> Rig {
    let root = tempfile::tempdir().unwrap();
    let outbox = Arc::new(Outbox::default());
    let ledger = Arc::new(ledger);
    let engine = Arc::new(engine);

    let router = ExecutorRouter::new()
        .with(Arc::new(ContainerExecutor::new(engine.clone(), ContainerConfig::default())))
        .with(Arc::new(ScriptExecutor::new(ScriptConfig {
            kill_grace_ms: 200,
            ..Default::default()
        })));
    let cfg = HandlerConfig {
        instance_id: PROVIDER.into(),
        max_concurrent_jobs: 4,
        metering: MeteringConfig {
            interval_ms: 100,
            status_every: 1,
            stop_timeout_ms: 1_000,
        },
    };
    let handler = TaskHandler::new(cfg, router, WorkspaceManager::new(root.path()), outbox.clone())
        .with_billing(ledger.clone(), Arc::new(Gpu));

    Rig {
        handler,
        outbox,
        ledger,
        engine,
        root,
    }
}

fn script(id: &str, content: &str) -> Task {
    Task::new(
        id,
        PROVIDER,
        ExecutionKind::Script,
        JobParams::new()
            .with("script_content", content)
            .with("script_interpreter", "/bin/sh"),
    )
}

fn workspace_gone(root: &Path, id: &str) -> bool {
    !root.join(format!("job-{id}")).exists()
}

#[cfg(unix)]
#[tokio::test]
async fn script_success_reports_completed_with_log() {
    let rig = rig(Engine::default(), Ledger::default());
    let disposition = rig.handler.run(script("j1", "echo hi")).await;

    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(
        rig.outbox.states(),
        [TaskState::Preparing, TaskState::InProgress, TaskState::Completed]
    );
    let done = rig.outbox.terminal();
    assert_eq!(done.exit_code, Some(0));
    assert_eq!(done.provider_id, PROVIDER);
    assert!(done.execution_log.unwrap().contains("hi"));
    assert!(workspace_gone(rig.root.path(), "j1"));
    assert!(rig.handler.jobs().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn script_failure_reports_real_exit_code() {
    let rig = rig(Engine::default(), Ledger::default());
    rig.handler.run(script("j2", "exit 7")).await;

    let done = rig.outbox.terminal();
    assert_eq!(done.status, TaskState::Failed);
    assert_eq!(done.exit_code, Some(7));
    assert!(workspace_gone(rig.root.path(), "j2"));
}

#[cfg(unix)]
#[tokio::test]
async fn script_timeout_reports_minus_two() {
    let rig = rig(Engine::default(), Ledger::default());
    let task = {
        let mut t = script("j3", "sleep 60");
        t.job_params = t.job_params.with("timeout_seconds", 1);
        t
    };
    let run = tokio::time::timeout(Duration::from_secs(15), rig.handler.run(task));
    run.await.unwrap();

    let done = rig.outbox.terminal();
    assert_eq!(done.status, TaskState::Failed);
    assert_eq!(done.exit_code, Some(EXIT_SCRIPT_TIMEOUT));
    assert!(workspace_gone(rig.root.path(), "j3"));
}

#[tokio::test]
async fn container_success_reports_stdout() {
    let rig = rig(Engine::default(), Ledger::default());
    let task = Task::new(
        "j4",
        PROVIDER,
        ExecutionKind::Docker,
        JobParams::new()
            .with("docker_image", "alpine:latest")
            .with("docker_command", serde_json::json!(["echo", "ok"])),
    );
    rig.handler.run(task).await;

    let done = rig.outbox.terminal();
    assert_eq!(done.status, TaskState::Completed);
    assert_eq!(done.exit_code, Some(0));
    assert!(done.execution_log.unwrap().contains("ok"));
    assert_eq!(rig.engine.removed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn misrouted_task_produces_nothing() {
    let rig = rig(Engine::default(), Ledger::default());
    let mut task = script("j5", "echo hi");
    task.assigned_provider_id = "other".into();

    assert_eq!(rig.handler.run(task).await, Disposition::Ack);
    assert!(rig.outbox.states().is_empty());
    assert!(workspace_gone(rig.root.path(), "j5"));
}

#[tokio::test]
async fn defunded_session_cancels_container() {
    let engine = Engine {
        long_running: true,
        ..Default::default()
    };
    let rig = rig(engine, Ledger {
        defund_at: 2,
        ..Default::default()
    });
    let mut task = Task::new(
        "j6",
        PROVIDER,
        ExecutionKind::Docker,
        JobParams::new()
            .with("docker_image", "trainer:latest")
            .with("session_id", "sess-6"),
    );
    task.selected_gpu = Some(SelectedGpu {
        instance_id: "gpu-instance-1".into(),
        model: "RTX 4090".into(),
        price_per_hour: 0.5,
    });

    tokio::time::timeout(Duration::from_secs(10), rig.handler.run(task))
        .await
        .unwrap();

    let done = rig.outbox.terminal();
    assert_eq!(done.status, TaskState::Cancelled);
    assert_eq!(rig.engine.created.load(Ordering::SeqCst), 1);
    assert_eq!(rig.engine.removed.load(Ordering::SeqCst), 1);

    let ends = rig.ledger.ends.lock().unwrap();
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0].session_id, "sess-6");
    assert_eq!(ends[0].reason, "cancelled");
    assert!(!rig.ledger.samples.lock().unwrap().is_empty());
    assert!(workspace_gone(rig.root.path(), "j6"));
}

#[tokio::test]
async fn image_pull_time_is_not_billed() {
    let engine = Engine {
        pull_delay: Duration::from_millis(1_500),
        ..Default::default()
    };
    let rig = rig(engine, Ledger::default());
    let task = Task::new(
        "j10",
        PROVIDER,
        ExecutionKind::Docker,
        JobParams::new()
            .with("docker_image", "trainer:latest")
            .with("session_id", "sess-10"),
    );
    rig.handler.run(task).await;

    assert_eq!(rig.outbox.terminal().status, TaskState::Completed);
    assert!(rig.ledger.samples.lock().unwrap().len() <= 1);
    let ends = rig.ledger.ends.lock().unwrap();
    assert_eq!(ends.len(), 1);
    assert!(ends[0].duration_hours * 3600.0 < 0.5, "billed {}h", ends[0].duration_hours);
}

#[tokio::test]
async fn session_is_closed_when_the_container_never_starts() {
    let rig = rig(Engine::default(), Ledger::default());
    let task = Task::new(
        "j11",
        PROVIDER,
        ExecutionKind::Docker,
        JobParams::new().with("session_id", "sess-11"),
    );
    rig.handler.run(task).await;

    assert_eq!(rig.outbox.terminal().status, TaskState::Failed);
    assert!(rig.ledger.samples.lock().unwrap().is_empty());
    let ends = rig.ledger.ends.lock().unwrap();
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0].duration_hours, 0.0);
}

#[cfg(unix)]
#[tokio::test]
async fn explicit_cancel_stops_running_script() {
    let rig = Arc::new(rig(Engine::default(), Ledger::default()));
    let runner = rig.clone();
    let run = tokio::spawn(async move { runner.handler.run(script("j7", "sleep 60")).await });

    let id = JobId::from("j7");
    for _ in 0..100 {
        if rig.handler.jobs().get(&id).map(|j| j.state) == Some(TaskState::InProgress) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    rig.handler.cancel(&id).unwrap();

    let disposition = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(rig.outbox.terminal().status, TaskState::Cancelled);
}

#[cfg(unix)]
#[tokio::test]
async fn shutdown_drains_active_jobs() {
    let rig = Arc::new(rig(Engine::default(), Ledger::default()));
    let runner = rig.clone();
    let run = tokio::spawn(async move { runner.handler.run(script("j8", "sleep 60")).await });

    while rig.handler.jobs().is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(rig.handler.shutdown(Duration::from_secs(10)).await);
    run.await.unwrap();

    assert_eq!(rig.outbox.terminal().status, TaskState::Cancelled);
    assert_eq!(
        rig.handler.run(script("j9", "true")).await,
        Disposition::Retry
    );
}

#[cfg(unix)]
#[tokio::test]
async fn duplicate_job_in_flight_is_retried() {
    let rig = Arc::new(rig(Engine::default(), Ledger::default()));
    let runner = rig.clone();
    let first = tokio::spawn(async move { runner.handler.run(script("dup", "sleep 60")).await });

    while rig.handler.jobs().is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(rig.handler.run(script("dup", "true")).await, Disposition::Retry);

    rig.handler.cancel(&JobId::from("dup")).unwrap();
    first.await.unwrap();
}
