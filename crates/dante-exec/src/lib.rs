//! Workspaces and executors for provider tasks.
//!
//! An [`Executor`] turns a [`Task`](dante_model::Task) plus a prepared
//! workspace directory into an [`ExecutionResult`](dante_model::ExecutionResult).
//! Executors never return errors: every failure is folded into the result's
//! `error` field and exit code.

mod error;
pub use error::{ExecError, WorkspaceError};

mod executor;
pub use executor::{Executor, StartSignal, default_script_filename};

mod limits;
pub use limits::{RlimitConfig, attach_rlimits};

mod util;
pub use util::kill_graceful;

mod workspace;
pub use workspace::{Workspace, WorkspaceManager};

#[cfg(feature = "script")]
mod script;
#[cfg(feature = "script")]
pub use script::{ScriptConfig, ScriptExecutor};

#[cfg(feature = "container")]
pub mod container;
#[cfg(feature = "container")]
pub use container::{ContainerConfig, ContainerExecutor, DockerRuntime, GpuRequest};
