use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Placeholder replaced by the daemon instance ID in subject and durable patterns.
const INSTANCE_PLACEHOLDER: &str = "{instance_id}";

/// Connection, stream and acknowledgement settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub url: String,
    pub stream_name: String,
    pub stream_subjects: Vec<String>,
    pub dispatch_subject_pattern: String,
    pub durable_name_pattern: String,
    pub status_subject_prefix: String,

    /// Must exceed the longest gap between progress acks.
    pub ack_wait_ms: u64,
    pub max_deliver: i64,
    pub fetch_batch: usize,
    pub fetch_expires_ms: u64,
    pub nak_delay_ms: u64,

    pub flush_timeout_ms: u64,
    pub reconnect_poll_ms: u64,
    pub connect_timeout_ms: u64,
    /// Statuses kept for republish when the connection is down.
    pub status_backlog: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".into(),
            stream_name: "DANTE_TASKS".into(),
            stream_subjects: vec!["dante.tasks.dispatch.>".into()],
            dispatch_subject_pattern: "dante.tasks.dispatch.{instance_id}.>".into(),
            durable_name_pattern: "provider_daemon_{instance_id}_tasks_consumer".into(),
            status_subject_prefix: "dante.tasks.status".into(),
            ack_wait_ms: 300_000,
            max_deliver: 5,
            fetch_batch: 1,
            fetch_expires_ms: 10_000,
            nak_delay_ms: 30_000,
            flush_timeout_ms: 5_000,
            reconnect_poll_ms: 2_000,
            connect_timeout_ms: 10_000,
            status_backlog: 256,
        }
    }
}

impl TransportConfig {
    pub fn dispatch_subject(&self, instance_id: &str) -> String {
        interpolate(&self.dispatch_subject_pattern, instance_id)
    }

    pub fn durable_name(&self, instance_id: &str) -> String {
        interpolate(&self.durable_name_pattern, instance_id)
    }

    pub fn ack_wait(&self) -> Duration {
        Duration::from_millis(self.ack_wait_ms)
    }

    /// Interval between in-progress acks for a running task.
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis((self.ack_wait_ms / 2).max(1_000))
    }

    pub fn fetch_expires(&self) -> Duration {
        Duration::from_millis(self.fetch_expires_ms)
    }

    pub fn nak_delay(&self) -> Duration {
        Duration::from_millis(self.nak_delay_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn reconnect_poll(&self) -> Duration {
        Duration::from_millis(self.reconnect_poll_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Substitutes `instance_id` for `{instance_id}` (or a legacy `%s`) in `pattern`.
pub fn interpolate(pattern: &str, instance_id: &str) -> String {
    if pattern.contains(INSTANCE_PLACEHOLDER) {
        pattern.replace(INSTANCE_PLACEHOLDER, instance_id)
    } else {
        pattern.replace("%s", instance_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_for_instance() {
        let cfg = TransportConfig::default();
        assert_eq!(cfg.dispatch_subject("provider-a"), "dante.tasks.dispatch.provider-a.>");
        assert_eq!(cfg.durable_name("provider-a"), "provider_daemon_provider-a_tasks_consumer");
    }

    #[test]
    fn legacy_placeholder() {
        assert_eq!(interpolate("tasks.%s.>", "p1"), "tasks.p1.>");
        assert_eq!(interpolate("static.subject", "p1"), "static.subject");
    }

    #[test]
    fn progress_interval_is_half_ack_wait() {
        let cfg = TransportConfig {
            ack_wait_ms: 60_000,
            ..Default::default()
        };
        assert_eq!(cfg.progress_interval(), Duration::from_secs(30));

        let tiny = TransportConfig {
            ack_wait_ms: 10,
            ..Default::default()
        };
        assert_eq!(tiny.progress_interval(), Duration::from_secs(1));
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: TransportConfig = serde_json::from_str(r#"{"url":"nats://bus:4222","fetch_batch":4}"#).unwrap();
        assert_eq!(cfg.url, "nats://bus:4222");
        assert_eq!(cfg.fetch_batch, 4);
        assert_eq!(cfg.max_deliver, 5);
    }
}
