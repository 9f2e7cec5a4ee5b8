mod job_id;
mod params;
mod result;
mod status;
mod task;

pub use job_id::JobId;
pub use params::JobParams;
pub use result::{
    EXIT_CONTAINER_KILLED, EXIT_SCRIPT_TIMEOUT, EXIT_SETUP_ERROR, ExecutionError, ExecutionResult,
};
pub use status::{TaskState, TaskStatus};
pub use task::{ExecutionKind, SelectedGpu, Task};
