use std::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};

/// Scheduler-assigned job identifier.
///
/// Opaque to the daemon; used as the key of the active-jobs table, the suffix of
/// status subjects and a component of workspace directory names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for JobId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_plain_string() {
        let id = JobId::from("job-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""job-42""#);
    }

    #[test]
    fn blank_is_empty() {
        assert!(JobId::from("  ").is_empty());
        assert!(!JobId::from("j1").is_empty());
    }
}
