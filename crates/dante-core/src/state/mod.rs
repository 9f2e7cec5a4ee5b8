use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use dante_model::{ExecutionKind, JobId, Task, TaskState};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::{sync::Notify, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::CoreError;

/// Snapshot of one in-flight job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveJob {
    pub job_id: JobId,
    pub job_name: String,
    pub execution_type: ExecutionKind,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub accepted_at: OffsetDateTime,
}

struct Entry {
    job: ActiveJob,
    cancel: CancellationToken,
}

/// In-memory table of jobs between admission and terminal status.
///
/// Never persisted: a crash loses it and redelivery rebuilds it.
#[derive(Clone, Default)]
pub struct ActiveJobs {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    jobs: RwLock<HashMap<JobId, Entry>>,
    emptied: Notify,
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, Entry>> {
        self.inner.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, Entry>> {
        self.inner.jobs.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Inserts `task` in `preparing`, unless its ID is already active or the
    /// table already holds `limit` jobs. `cancel` stops the job's execution.
    pub fn admit(&self, task: &Task, limit: usize, cancel: CancellationToken) -> Result<(), CoreError> {
        let mut jobs = self.write();
        if jobs.contains_key(&task.job_id) {
            return Err(CoreError::DuplicateJob(task.job_id.clone()));
        }
        if jobs.len() >= limit {
            return Err(CoreError::AtCapacity { limit });
        }
        let job = ActiveJob {
            job_id: task.job_id.clone(),
            job_name: task.job_name.clone(),
            execution_type: task.execution_type,
            state: TaskState::Preparing,
            session_id: task.session_id().map(str::to_string),
            accepted_at: OffsetDateTime::now_utc(),
        };
        jobs.insert(task.job_id.clone(), Entry { job, cancel });
        Ok(())
    }

    /// Moves the job forward. Backward transitions are ignored.
    pub fn set_state(&self, id: &JobId, state: TaskState) {
        if let Some(entry) = self.write().get_mut(id)
            && entry.job.state.can_transition_to(state)
        {
            entry.job.state = state;
        }
    }

    pub fn remove(&self, id: &JobId) -> Option<ActiveJob> {
        let mut jobs = self.write();
        let removed = jobs.remove(id).map(|e| e.job);
        if jobs.is_empty() {
            self.inner.emptied.notify_waiters();
        }
        removed
    }

    pub fn get(&self, id: &JobId) -> Option<ActiveJob> {
        self.read().get(id).map(|e| e.job.clone())
    }

    /// All active jobs, oldest first.
    pub fn list(&self) -> Vec<ActiveJob> {
        let mut jobs: Vec<_> = self.read().values().map(|e| e.job.clone()).collect();
        jobs.sort_by(|a, b| a.accepted_at.cmp(&b.accepted_at).then_with(|| a.job_id.cmp(&b.job_id)));
        jobs
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Cancels one job's execution. Returns false when the job is not active.
    pub fn cancel(&self, id: &JobId) -> bool {
        match self.read().get(id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for entry in self.read().values() {
            entry.cancel.cancel();
        }
    }

    /// Waits until the table is empty. Returns false if `timeout` passed first.
    pub async fn wait_empty(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.inner.emptied.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_empty() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.is_empty();
            }
        }
    }
}
