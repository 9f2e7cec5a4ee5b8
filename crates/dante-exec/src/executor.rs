use std::path::Path;

use async_trait::async_trait;
use dante_model::{ExecutionKind, ExecutionResult, Task};
use tokio::{sync::oneshot, time::Instant};
use tokio_util::sync::CancellationToken;

/// A way of running tasks of some [`ExecutionKind`].
#[async_trait]
pub trait Executor: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, kind: ExecutionKind) -> bool;

    /// Runs `task` inside `workspace` until it exits, times out, or `ctx` is cancelled.
    ///
    /// `started` must be fired once the workload itself is running (process
    /// spawned, container started). Image pulls and other setup come before it.
    async fn execute(
        &self,
        ctx: CancellationToken,
        task: &Task,
        workspace: &Path,
        started: StartSignal,
    ) -> ExecutionResult;
}

/// One-shot report of the instant a task's workload began running.
///
/// Dropping it unfired tells the receiver the workload never started.
#[derive(Debug, Default)]
pub struct StartSignal(Option<oneshot::Sender<Instant>>);

impl StartSignal {
    pub fn channel() -> (Self, oneshot::Receiver<Instant>) {
        let (tx, rx) = oneshot::channel();
        (Self(Some(tx)), rx)
    }

    /// A signal nobody listens to.
    pub fn ignored() -> Self {
        Self(None)
    }

    /// Records "now" as the start. Later calls do nothing.
    pub fn fire(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(Instant::now());
        }
    }
}

/// Script filename used when the job does not name one.
///
/// Python interpreters get `main.py`; other interpreters get `task_script.sh`
/// on the host and `container_script.sh` when the script runs in a container.
pub fn default_script_filename(interpreter: &str, in_container: bool) -> &'static str {
    let base = interpreter.rsplit('/').next().unwrap_or(interpreter);
    if base.starts_with("python") {
        "main.py"
    } else if in_container {
        "container_script.sh"
    } else {
        "task_script.sh"
    }
}

/// A script filename must be one plain path component inside the workspace.
pub(crate) fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
