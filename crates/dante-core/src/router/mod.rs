use std::sync::Arc;

use dante_exec::Executor;
use dante_model::ExecutionKind;
use tracing::{instrument, trace};

/// Ordered set of executors; the first one that supports a kind wins.
#[derive(Default, Clone)]
pub struct ExecutorRouter {
    executors: Vec<Arc<dyn Executor>>,
}

impl ExecutorRouter {
    #[inline]
    pub fn new() -> Self {
        Self {
            executors: Vec::new(),
        }
    }

    #[inline]
    pub fn register(&mut self, executor: Arc<dyn Executor>) {
        self.executors.push(executor);
    }

    #[inline]
    pub fn with(mut self, executor: Arc<dyn Executor>) -> Self {
        self.register(executor);
        self
    }

    #[instrument(level = "trace", skip(self))]
    pub fn pick(&self, kind: ExecutionKind) -> Option<&Arc<dyn Executor>> {
        let picked = self.executors.iter().find(|e| e.supports(kind));
        if let Some(e) = picked {
            trace!(target: "dante.core.router", executor = e.name(), "executor selected");
        }
        picked
    }

    /// Names of the registered executors, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.executors.iter().map(|e| e.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}
