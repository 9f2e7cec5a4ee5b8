use std::{
    path::Path,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use async_trait::async_trait;
use dante_model::{
    EXIT_SCRIPT_TIMEOUT, EXIT_SETUP_ERROR, ExecutionError, ExecutionKind, ExecutionResult, Task,
};
use serde::{Deserialize, Serialize};
use tokio::{process::Command, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::{
    RlimitConfig, attach_rlimits,
    executor::{Executor, StartSignal, default_script_filename, is_plain_filename},
    util::{kill_graceful, read_capped, sleep_until_deadline, write_executable},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    pub default_interpreter: String,
    /// Time between SIGTERM and SIGKILL when a script is stopped.
    pub kill_grace_ms: u64,
    /// Per-stream capture limit; output past it is drained and dropped.
    pub max_output_bytes: usize,
    pub rlimits: RlimitConfig,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            default_interpreter: "/bin/sh".into(),
            kill_grace_ms: 5_000,
            max_output_bytes: 1024 * 1024,
            rlimits: RlimitConfig::default(),
        }
    }
}

/// Runs `script_content` with an interpreter on the host, inside the workspace.
pub struct ScriptExecutor {
    cfg: ScriptConfig,
}

impl ScriptExecutor {
    pub fn new(cfg: ScriptConfig) -> Self {
        Self { cfg }
    }

    fn grace(&self) -> Duration {
        Duration::from_millis(self.cfg.kill_grace_ms)
    }
}

impl Default for ScriptExecutor {
    fn default() -> Self {
        Self::new(ScriptConfig::default())
    }
}

enum Outcome {
    Exited(ExitStatus),
    WaitFailed(std::io::Error),
    TimedOut(Duration),
    Cancelled,
}

#[async_trait]
impl Executor for ScriptExecutor {
    fn name(&self) -> &'static str {
        "script"
    }

    fn supports(&self, kind: ExecutionKind) -> bool {
        matches!(kind, ExecutionKind::Script)
    }

    #[instrument(level = "debug", skip_all, fields(job_id = %task.job_id))]
    async fn execute(
        &self,
        ctx: CancellationToken,
        task: &Task,
        workspace: &Path,
        mut started: StartSignal,
    ) -> ExecutionResult {
        let params = &task.job_params;
        let Some(content) = params.script_content() else {
            return ExecutionResult::setup_failure(ExecutionError::MissingScript);
        };
        let interpreter = params
            .script_interpreter()
            .unwrap_or(self.cfg.default_interpreter.as_str());
        let filename = params
            .script_filename()
            .unwrap_or_else(|| default_script_filename(interpreter, false));
        if !is_plain_filename(filename) {
            return ExecutionResult::setup_failure(ExecutionError::Workspace(format!(
                "invalid script filename {filename:?}"
            )));
        }

        if let Err(e) = write_executable(&workspace.join(filename), content).await {
            return ExecutionResult::setup_failure(ExecutionError::Workspace(e.to_string()));
        }

        let mut cmd = Command::new(interpreter);
        cmd.arg(filename)
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        attach_rlimits(&mut cmd, &self.cfg.rlimits);

        trace!(target: "dante.exec.script", %interpreter, %filename, "spawn");
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionResult::setup_failure(ExecutionError::Spawn(format!(
                    "{interpreter}: {e}"
                )));
            }
        };
        started.fire();

        let cap = self.cfg.max_output_bytes;
        let stdout = tokio::spawn(read_capped(child.stdout.take(), cap));
        let stderr = tokio::spawn(read_capped(child.stderr.take(), cap));

        let deadline = task.timeout();
        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => Outcome::Exited(status),
                Err(e) => Outcome::WaitFailed(e),
            },
            _ = sleep_until_deadline(deadline) => Outcome::TimedOut(deadline.unwrap_or_default()),
            _ = ctx.cancelled() => Outcome::Cancelled,
        };

        if matches!(outcome, Outcome::TimedOut(_) | Outcome::Cancelled | Outcome::WaitFailed(_)) {
            debug!(target: "dante.exec.script", "stopping script");
            if let Err(e) = kill_graceful(&mut child, self.grace()).await {
                warn!(target: "dante.exec.script", error = %e, "failed to kill script");
            }
        }

        // Grandchildren may still hold the pipes; don't wait on them forever.
        let settle = self.grace() + Duration::from_secs(1);
        let stdout = collect(stdout, settle).await;
        let stderr = collect(stderr, settle).await;

        let (exit_code, error) = match outcome {
            Outcome::Exited(status) => exit_details(status),
            Outcome::WaitFailed(e) => (EXIT_SETUP_ERROR, Some(ExecutionError::Io(e.to_string()))),
            Outcome::TimedOut(after) => (
                EXIT_SCRIPT_TIMEOUT,
                Some(ExecutionError::Timeout {
                    secs: after.as_secs(),
                }),
            ),
            Outcome::Cancelled => (EXIT_SETUP_ERROR, Some(ExecutionError::Cancelled)),
        };
        debug!(target: "dante.exec.script", exit_code, error = ?error, "script finished");

        ExecutionResult {
            stdout,
            stderr,
            exit_code,
            error,
        }
    }
}

async fn collect(handle: JoinHandle<String>, within: Duration) -> String {
    match tokio::time::timeout(within, handle).await {
        Ok(Ok(out)) => out,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            warn!(target: "dante.exec.script", "output pipe still open after exit; dropping");
            String::new()
        }
    }
}

fn exit_details(status: ExitStatus) -> (i64, Option<ExecutionError>) {
    if let Some(code) = status.code() {
        let code = i64::from(code);
        let error = (code != 0).then_some(ExecutionError::ScriptExit { code });
        return (code, error);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return (128 + i64::from(signal), Some(ExecutionError::KilledBySignal { signal }));
        }
    }
    (EXIT_SETUP_ERROR, Some(ExecutionError::Io(format!("unknown exit status: {status}"))))
}
