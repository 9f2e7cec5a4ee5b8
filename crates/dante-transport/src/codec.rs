use dante_model::{JobId, Task};

/// A decoded dispatch message, before any acknowledgement.
#[derive(Debug)]
pub enum Inbound {
    /// Addressed to this daemon; hand it to the handler.
    Task(Box<Task>),
    /// Addressed to another daemon.
    Misrouted { job_id: JobId, assigned: String },
    /// Not a task. Never redelivered.
    Poison(String),
}

/// Decodes a dispatch payload and checks its addressing.
pub fn classify(payload: &[u8], instance_id: &str) -> Inbound {
    match serde_json::from_slice::<Task>(payload) {
        Ok(task) if task.is_addressed_to(instance_id) => Inbound::Task(Box::new(task)),
        Ok(task) => Inbound::Misrouted {
            job_id: task.job_id,
            assigned: task.assigned_provider_id,
        },
        Err(e) => Inbound::Poison(e.to_string()),
    }
}

/// Subject a job's status updates are published on.
pub fn status_subject(prefix: &str, job_id: &JobId) -> String {
    format!("{}.{}", prefix.trim_end_matches('.'), job_id)
}
