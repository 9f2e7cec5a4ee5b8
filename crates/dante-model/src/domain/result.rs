use thiserror::Error;

/// Exit code reported when the task never ran or the executor itself failed.
pub const EXIT_SETUP_ERROR: i64 = -1;
/// Exit code reported when a script was killed on its deadline.
pub const EXIT_SCRIPT_TIMEOUT: i64 = -2;
/// Exit code reported when a container was stopped on its deadline.
pub const EXIT_CONTAINER_KILLED: i64 = 137;

/// Structured cause attached to an [`ExecutionResult`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("script_content required")]
    MissingScript,
    #[error("docker_image required")]
    MissingImage,
    #[error("workspace: {0}")]
    Workspace(String),
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("script exited with code {code}")]
    ScriptExit { code: i64 },
    #[error("script killed by signal {signal}")]
    KilledBySignal { signal: i32 },
    #[error("container exited with code {code}")]
    ContainerExit { code: i64 },
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("cancelled")]
    Cancelled,
    #[error("image pull failed: {0}")]
    ImagePull(String),
    #[error("container create failed: {0}")]
    Create(String),
    #[error("container start failed: {0}")]
    Start(String),
    #[error("container wait failed: {0}")]
    Wait(String),
    #[error("executor unavailable: {0}")]
    Unavailable(String),
    #[error("executor panicked: {0}")]
    Panicked(String),
}

impl ExecutionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecutionError::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionError::Timeout { .. })
    }
}

impl From<std::io::Error> for ExecutionError {
    fn from(e: std::io::Error) -> Self {
        ExecutionError::Io(e.to_string())
    }
}

/// Uniform outcome of one execution, produced once per task.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub error: Option<ExecutionError>,
}

impl ExecutionResult {
    /// Result for a task that never got to run.
    pub fn setup_failure(error: ExecutionError) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: EXIT_SETUP_ERROR,
            error: Some(error),
        }
    }

    pub fn success(stdout: String, stderr: String) -> Self {
        Self {
            stdout,
            stderr,
            exit_code: 0,
            error: None,
        }
    }

    pub fn with_error(mut self, error: ExecutionError) -> Self {
        self.error = Some(error);
        self
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_failure_uses_negative_one() {
        let r = ExecutionResult::setup_failure(ExecutionError::MissingScript);
        assert_eq!(r.exit_code, EXIT_SETUP_ERROR);
        assert!(!r.is_success());
        assert_eq!(r.error.unwrap().to_string(), "script_content required");
    }

    #[test]
    fn exit_messages() {
        assert_eq!(
            ExecutionError::ScriptExit { code: 7 }.to_string(),
            "script exited with code 7"
        );
        assert_eq!(
            ExecutionError::Timeout { secs: 3 }.to_string(),
            "timed out after 3s"
        );
    }

    #[test]
    fn success_requires_zero_and_no_error() {
        assert!(ExecutionResult::success("a".into(), String::new()).is_success());
        let r = ExecutionResult::success(String::new(), String::new())
            .with_error(ExecutionError::Cancelled);
        assert!(!r.is_success());
        assert!(r.error.as_ref().unwrap().is_cancelled());
    }
}
