use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{JobId, JobParams};

/// How a task is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    /// Run inside a container on the local engine.
    Docker,
    /// Write a script to the workspace and run it with an interpreter.
    Script,
    /// Anything the daemon does not know how to run.
    #[serde(other)]
    Unsupported,
}

impl ExecutionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionKind::Docker => "docker",
            ExecutionKind::Script => "script",
            ExecutionKind::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for ExecutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// GPU chosen by the scheduler for this task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectedGpu {
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub price_per_hour: f64,
}

/// Task dispatch message, immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub job_id: JobId,
    #[serde(default)]
    pub job_name: String,
    /// Daemon instance the scheduler addressed this task to.
    pub assigned_provider_id: String,
    pub user_id: String,
    pub execution_type: ExecutionKind,
    #[serde(default)]
    pub job_params: JobParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_gpu: Option<SelectedGpu>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_type_needed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_count_needed: Option<u32>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub dispatched_at: Option<OffsetDateTime>,
}

impl Task {
    /// Minimal task addressed to `provider`; remaining fields take defaults.
    pub fn new(
        job_id: impl Into<JobId>,
        provider: impl Into<String>,
        kind: ExecutionKind,
        params: JobParams,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            job_name: String::new(),
            assigned_provider_id: provider.into(),
            user_id: String::new(),
            execution_type: kind,
            job_params: params,
            selected_gpu: None,
            job_type: None,
            gpu_type_needed: None,
            gpu_count_needed: None,
            dispatched_at: None,
        }
    }

    /// True when the task is addressed to the daemon identified by `instance_id`.
    #[inline]
    pub fn is_addressed_to(&self, instance_id: &str) -> bool {
        self.assigned_provider_id == instance_id
    }

    /// Metering session, when the renter is billed for this task.
    #[inline]
    pub fn session_id(&self) -> Option<&str> {
        self.job_params.session_id()
    }

    /// Per-job deadline for the execution phase.
    #[inline]
    pub fn timeout(&self) -> Option<std::time::Duration> {
        self.job_params.timeout()
    }
}
