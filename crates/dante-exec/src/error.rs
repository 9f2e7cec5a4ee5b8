use std::path::PathBuf;

use thiserror::Error;

/// Failures constructing an executor; per-task failures live in [`dante_model::ExecutionError`].
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),
    #[error("invalid executor config: {0}")]
    InvalidConfig(String),
}

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("job id {0:?} cannot be used as a directory name")]
    InvalidJobId(String),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WorkspaceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WorkspaceError::Io {
            path: path.into(),
            source,
        }
    }
}
