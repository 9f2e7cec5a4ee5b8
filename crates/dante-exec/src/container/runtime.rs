use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use super::GpuRequest;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("{0}")]
    Engine(String),
    #[error("no such container: {0}")]
    NotFound(String),
}

/// Everything needed to create one task container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Empty means the image's default command.
    pub cmd: Vec<String>,
    /// `KEY=VALUE` entries.
    pub env: Vec<String>,
    /// Host directory bind-mounted read-write at [`ContainerSpec::WORKDIR`].
    pub workspace: PathBuf,
    pub gpu: Option<GpuRequest>,
    pub gpu_driver: String,
    pub labels: Vec<(String, String)>,
}

impl ContainerSpec {
    pub const WORKDIR: &'static str = "/workspace";

    pub fn bind(&self) -> String {
        format!("{}:{}:rw", self.workspace.display(), Self::WORKDIR)
    }
}

/// What the wait channel reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitOutcome {
    pub exit_code: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerLogs {
    pub stdout: String,
    pub stderr: String,
}

/// Container engine operations used by the container executor.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pulls `image`, consuming the progress stream to completion.
    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Creates the container and returns its ID.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    /// Resolves once the container is no longer running.
    async fn wait(&self, id: &str) -> Result<WaitOutcome, RuntimeError>;

    /// Stops the container, killing it after `grace`.
    async fn stop(&self, id: &str, grace: Duration) -> Result<(), RuntimeError>;

    /// Demultiplexed stdout/stderr of a finished container.
    async fn logs(&self, id: &str) -> Result<ContainerLogs, RuntimeError>;

    /// Exit code recorded in the container state.
    async fn exit_code(&self, id: &str) -> Result<Option<i64>, RuntimeError>;

    /// Force-removes the container. Removing a missing container succeeds.
    async fn remove(&self, id: &str) -> Result<(), RuntimeError>;
}
