//! Container executor.
//!
//! Every task gets a fresh container named `dante-task-<job>-<timestamp>` with
//! the job workspace bind-mounted at `/workspace`. The container is created
//! with auto-remove off so logs and state survive a failed run, and is always
//! force-removed afterwards under its own short deadline.

mod docker;
mod gpu;
mod runtime;

use std::{future::Future, path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use dante_model::{
    EXIT_CONTAINER_KILLED, EXIT_SETUP_ERROR, ExecutionError, ExecutionKind, ExecutionResult, Task,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

pub use docker::DockerRuntime;
pub use gpu::GpuRequest;
pub use runtime::{ContainerLogs, ContainerRuntime, ContainerSpec, RuntimeError, WaitOutcome};

use crate::{
    ExecError,
    executor::{Executor, StartSignal, default_script_filename, is_plain_filename},
    util::{sleep_until_deadline, write_executable},
};

pub const JOB_ID_LABEL: &str = "dante.job_id";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// `unix:///path`, `/path` or `tcp://host:port`; `None` uses `DOCKER_HOST`
    /// or the local socket.
    pub docker_endpoint: Option<String>,
    pub pull_timeout_ms: u64,
    pub log_timeout_ms: u64,
    pub remove_timeout_ms: u64,
    pub inspect_timeout_ms: u64,
    /// Seconds the engine waits after SIGTERM before killing a stopped container.
    pub stop_grace_secs: u64,
    pub gpu_driver: String,
    /// Interpreter for embedded `script_content` when the job names none.
    pub default_interpreter: String,
    pub name_prefix: String,
    /// Per-stream log capture limit.
    pub max_output_bytes: usize,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            docker_endpoint: None,
            pull_timeout_ms: 300_000,
            log_timeout_ms: 60_000,
            remove_timeout_ms: 30_000,
            inspect_timeout_ms: 30_000,
            stop_grace_secs: 10,
            gpu_driver: "nvidia".into(),
            default_interpreter: "/bin/sh".into(),
            name_prefix: "dante-task".into(),
            max_output_bytes: 1024 * 1024,
        }
    }
}

/// Runs `docker` tasks through a [`ContainerRuntime`].
pub struct ContainerExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    cfg: ContainerConfig,
}

impl ContainerExecutor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, cfg: ContainerConfig) -> Self {
        Self { runtime, cfg }
    }

    /// Connects to the Docker engine and checks that it answers.
    pub async fn connect(cfg: ContainerConfig) -> Result<Self, ExecError> {
        let docker = DockerRuntime::connect(cfg.docker_endpoint.as_deref(), cfg.max_output_bytes)?;
        docker.ping().await?;
        Ok(Self::new(Arc::new(docker), cfg))
    }

    fn ms(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    /// Resolves the container command, writing an embedded script if present.
    async fn command(&self, task: &Task, workspace: &Path) -> Result<Vec<String>, ExecutionError> {
        let params = &task.job_params;
        let Some(content) = params.script_content() else {
            return Ok(params.docker_command());
        };
        let interpreter = params
            .script_interpreter()
            .unwrap_or(self.cfg.default_interpreter.as_str());
        let filename = params
            .script_filename()
            .unwrap_or_else(|| default_script_filename(interpreter, true));
        if !is_plain_filename(filename) {
            return Err(ExecutionError::Workspace(format!(
                "invalid script filename {filename:?}"
            )));
        }
        write_executable(&workspace.join(filename), content)
            .await
            .map_err(|e| ExecutionError::Workspace(e.to_string()))?;
        Ok(vec![
            interpreter.to_string(),
            format!("{}/{filename}", ContainerSpec::WORKDIR),
        ])
    }

    fn spec(&self, task: &Task, image: &str, cmd: Vec<String>, workspace: &Path) -> ContainerSpec {
        let params = &task.job_params;
        let gpu = params.docker_gpus().and_then(|raw| {
            let req = GpuRequest::parse(raw);
            if req.is_none() {
                warn!(target: "dante.exec.container", docker_gpus = %raw, "unrecognised GPU request; running without GPUs");
            }
            req
        });
        ContainerSpec {
            name: container_name(&self.cfg.name_prefix, task.job_id.as_str(), OffsetDateTime::now_utc()),
            image: image.to_string(),
            cmd,
            env: params
                .docker_env_vars()
                .into_iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect(),
            workspace: workspace.to_path_buf(),
            gpu,
            gpu_driver: self.cfg.gpu_driver.clone(),
            labels: vec![(JOB_ID_LABEL.to_string(), task.job_id.to_string())],
        }
    }

    async fn exit_code_or(&self, id: &str, fallback: i64) -> i64 {
        match bounded(Self::ms(self.cfg.inspect_timeout_ms), self.runtime.exit_code(id)).await {
            Ok(Some(code)) => code,
            Ok(None) => fallback,
            Err(e) => {
                warn!(target: "dante.exec.container", container = %id, error = %e, "inspect failed");
                fallback
            }
        }
    }
}

enum Outcome {
    Exited(WaitOutcome),
    WaitFailed(RuntimeError),
    TimedOut(Duration),
    Cancelled,
}

#[async_trait]
impl Executor for ContainerExecutor {
    fn name(&self) -> &'static str {
        "container"
    }

    fn supports(&self, kind: ExecutionKind) -> bool {
        matches!(kind, ExecutionKind::Docker)
    }

    #[instrument(level = "debug", skip_all, fields(job_id = %task.job_id))]
    async fn execute(
        &self,
        ctx: CancellationToken,
        task: &Task,
        workspace: &Path,
        mut started: StartSignal,
    ) -> ExecutionResult {
        let Some(image) = task.job_params.docker_image() else {
            return ExecutionResult::setup_failure(ExecutionError::MissingImage);
        };
        let cmd = match self.command(task, workspace).await {
            Ok(cmd) => cmd,
            Err(e) => return ExecutionResult::setup_failure(e),
        };

        debug!(target: "dante.exec.container", %image, "pulling image");
        let pull_timeout = Self::ms(self.cfg.pull_timeout_ms);
        let pulled = tokio::select! {
            r = bounded(pull_timeout, self.runtime.pull_image(image)) => r,
            _ = ctx.cancelled() => return ExecutionResult::setup_failure(ExecutionError::Cancelled),
        };
        if let Err(e) = pulled {
            return ExecutionResult::setup_failure(ExecutionError::ImagePull(format!("{image}: {e}")));
        }

        let spec = self.spec(task, image, cmd, workspace);
        let id = match self.runtime.create(&spec).await {
            Ok(id) => id,
            Err(e) => return ExecutionResult::setup_failure(ExecutionError::Create(e.to_string())),
        };
        let guard = RemovalGuard::new(
            self.runtime.clone(),
            id.clone(),
            Self::ms(self.cfg.remove_timeout_ms),
        );
        debug!(target: "dante.exec.container", container = %id, name = %spec.name, "created");

        if let Err(e) = self.runtime.start(&id).await {
            guard.remove().await;
            return ExecutionResult::setup_failure(ExecutionError::Start(e.to_string()));
        }
        started.fire();

        let deadline = task.timeout();
        let outcome = tokio::select! {
            r = self.runtime.wait(&id) => match r {
                Ok(w) => Outcome::Exited(w),
                Err(e) => Outcome::WaitFailed(e),
            },
            _ = sleep_until_deadline(deadline) => Outcome::TimedOut(deadline.unwrap_or_default()),
            _ = ctx.cancelled() => Outcome::Cancelled,
        };

        if !matches!(outcome, Outcome::Exited(_)) {
            let grace = Duration::from_secs(self.cfg.stop_grace_secs);
            debug!(target: "dante.exec.container", container = %id, "stopping container");
            let bound = grace + Self::ms(self.cfg.remove_timeout_ms);
            if let Err(e) = bounded(bound, self.runtime.stop(&id, grace)).await {
                warn!(target: "dante.exec.container", container = %id, error = %e, "stop failed");
            }
        }

        let logs = match bounded(Self::ms(self.cfg.log_timeout_ms), self.runtime.logs(&id)).await {
            Ok(logs) => logs,
            Err(e) => {
                warn!(target: "dante.exec.container", container = %id, error = %e, "log retrieval failed");
                ContainerLogs::default()
            }
        };

        let (exit_code, error) = match outcome {
            Outcome::Exited(w) => {
                let code = match w.exit_code {
                    Some(code) => code,
                    None => self.exit_code_or(&id, EXIT_SETUP_ERROR).await,
                };
                let error = match w.error {
                    Some(msg) => Some(ExecutionError::Wait(msg)),
                    None => (code != 0).then_some(ExecutionError::ContainerExit { code }),
                };
                (code, error)
            }
            Outcome::WaitFailed(e) => (
                self.exit_code_or(&id, EXIT_SETUP_ERROR).await,
                Some(ExecutionError::Wait(e.to_string())),
            ),
            Outcome::TimedOut(after) => (
                EXIT_CONTAINER_KILLED,
                Some(ExecutionError::Timeout {
                    secs: after.as_secs(),
                }),
            ),
            Outcome::Cancelled => (
                self.exit_code_or(&id, EXIT_CONTAINER_KILLED).await,
                Some(ExecutionError::Cancelled),
            ),
        };
        debug!(target: "dante.exec.container", container = %id, exit_code, error = ?error, "container finished");

        guard.remove().await;
        ExecutionResult {
            stdout: logs.stdout,
            stderr: logs.stderr,
            exit_code,
            error,
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, RuntimeError>>,
) -> Result<T, RuntimeError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(r) => r,
        Err(_) => Err(RuntimeError::Engine(format!(
            "timed out after {}s",
            limit.as_secs()
        ))),
    }
}

/// Removes the container when dropped, so early returns and panics inside the
/// executor do not leak it. [`RemovalGuard::remove`] does the same inline.
struct RemovalGuard {
    runtime: Arc<dyn ContainerRuntime>,
    id: String,
    timeout: Duration,
    armed: bool,
}

impl RemovalGuard {
    fn new(runtime: Arc<dyn ContainerRuntime>, id: String, timeout: Duration) -> Self {
        Self {
            runtime,
            id,
            timeout,
            armed: true,
        }
    }

    async fn remove(mut self) {
        self.armed = false;
        remove_container(self.runtime.clone(), self.id.clone(), self.timeout).await;
    }
}

impl Drop for RemovalGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(remove_container(
                    self.runtime.clone(),
                    std::mem::take(&mut self.id),
                    self.timeout,
                ));
            }
            Err(_) => {
                warn!(target: "dante.exec.container", container = %self.id, "no runtime to remove container");
            }
        }
    }
}

async fn remove_container(runtime: Arc<dyn ContainerRuntime>, id: String, timeout: Duration) {
    match bounded(timeout, runtime.remove(&id)).await {
        Ok(()) => debug!(target: "dante.exec.container", container = %id, "removed"),
        Err(e) => warn!(target: "dante.exec.container", container = %id, error = %e, "failed to remove container"),
    }
}

/// `<prefix>-<job>-<YYYYmmddHHMMSS>`, with characters the engine rejects in
/// names replaced by `-`.
pub fn container_name(prefix: &str, job_id: &str, at: OffsetDateTime) -> String {
    let job: String = job_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!(
        "{prefix}-{job}-{:04}{:02}{:02}{:02}{:02}{:02}",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    )
}
