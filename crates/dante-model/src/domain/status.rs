use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::JobId;

/// Lifecycle state of a job on this daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Accepted; workspace and executor are being set up.
    Preparing,
    /// Executor is running the workload.
    InProgress,
    /// Finished with exit code 0 and no error.
    Completed,
    /// Setup error, non-zero exit, timeout or runtime error.
    Failed,
    /// Stopped on request, by shutdown, or because the session ran out of funds.
    Cancelled,
}

impl TaskState {
    /// Returns `true` for states after which nothing else is published.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Returns `true` while the job is still held by the handler.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskState::Preparing | TaskState::InProgress)
    }

    fn rank(&self) -> u8 {
        match self {
            TaskState::Preparing => 0,
            TaskState::InProgress => 1,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled => 2,
        }
    }

    /// Transitions only move forward; terminal states are final.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Preparing => "preparing",
            TaskState::InProgress => "in_progress",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status update published for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub job_id: JobId,
    pub provider_id: String,
    pub status: TaskState,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_log: Option<String>,
}

impl TaskStatus {
    pub fn new(
        job_id: JobId,
        provider_id: impl Into<String>,
        status: TaskState,
        message: impl Into<String>,
    ) -> Self {
        Self {
            job_id,
            provider_id: provider_id.into(),
            status,
            message: message.into(),
            timestamp: OffsetDateTime::now_utc(),
            exit_code: None,
            execution_log: None,
        }
    }

    pub fn with_exit_code(mut self, code: i64) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn with_log(mut self, log: Option<String>) -> Self {
        self.execution_log = log;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());

        assert!(!TaskState::Preparing.is_terminal());
        assert!(!TaskState::InProgress.is_terminal());
    }

    #[test]
    fn active_states() {
        assert!(TaskState::Preparing.is_active());
        assert!(TaskState::InProgress.is_active());
        assert!(!TaskState::Failed.is_active());
    }

    #[test]
    fn transitions_are_monotone() {
        use TaskState::*;
        assert!(Preparing.can_transition_to(InProgress));
        assert!(Preparing.can_transition_to(Failed));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Cancelled));

        assert!(!InProgress.can_transition_to(Preparing));
        assert!(!InProgress.can_transition_to(InProgress));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Cancelled.can_transition_to(Completed));
    }

    #[test]
    fn serde_roundtrip() {
        let state = TaskState::InProgress;
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, r#""in_progress""#);

        let back: TaskState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn status_message_shape() {
        let status = TaskStatus::new(JobId::from("j1"), "provider-a", TaskState::Failed, "boom")
            .with_exit_code(7)
            .with_log(Some("stderr:\nboom".into()));
        let value: serde_json::Value = serde_json::to_value(&status).unwrap();

        assert_eq!(value["job_id"], "j1");
        assert_eq!(value["provider_id"], "provider-a");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["exit_code"], 7);
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn optional_fields_omitted() {
        let status = TaskStatus::new(JobId::from("j1"), "p", TaskState::Preparing, "");
        let json = serde_json::to_string(&status).unwrap();
        assert!(!json.contains("exit_code"));
        assert!(!json.contains("execution_log"));
    }
}
