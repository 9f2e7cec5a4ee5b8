use async_trait::async_trait;
use dante_model::{Task, TaskStatus};

use crate::CoreError;

/// Where the handler sends status updates. Implemented by the transport.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(&self, status: &TaskStatus) -> Result<(), CoreError>;
}

/// What the transport should do with a dispatch message once the handler is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Finished (terminal status published) or dropped as a misroute.
    Ack,
    /// Not admitted right now; redeliver later.
    Retry,
}

/// Consumer of decoded dispatch messages.
#[async_trait]
pub trait TaskSink: Send + Sync {
    /// Runs `task` to its terminal state.
    async fn run(&self, task: Task) -> Disposition;
}
