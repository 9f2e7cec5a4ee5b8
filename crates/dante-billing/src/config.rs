use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Prefix for every endpoint, e.g. `http://billing:8081/api/v1/billing`.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout_ms: u64,
    /// When false the daemon meters nothing and every call succeeds locally.
    pub enabled: bool,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081/api/v1/billing".into(),
            timeout_ms: 30_000,
            enabled: true,
        }
    }
}

impl BillingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        let cfg = BillingConfig {
            base_url: "http://b/api/v1/billing/".into(),
            ..Default::default()
        };
        assert_eq!(cfg.endpoint("usage-update"), "http://b/api/v1/billing/usage-update");
    }

    #[test]
    fn missing_keys_take_defaults() {
        let cfg: BillingConfig = serde_json::from_str(r#"{"timeout_ms": 500}"#).unwrap();
        assert_eq!(cfg.timeout(), Duration::from_millis(500));
        assert!(cfg.enabled);
        assert!(cfg.base_url.ends_with("/api/v1/billing"));
    }
}
