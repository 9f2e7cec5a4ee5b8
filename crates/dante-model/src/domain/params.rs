use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form job parameters carried by a dispatch message.
///
/// The scheduler sends an open JSON object; the accessors below read the keys
/// the executors understand and tolerate the loose typing that arrives over the
/// wire (numbers as strings, single strings where lists are expected).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobParams(Map<String, Value>);

impl JobParams {
    pub const SCRIPT_CONTENT: &'static str = "script_content";
    pub const SCRIPT_INTERPRETER: &'static str = "script_interpreter";
    pub const SCRIPT_FILENAME: &'static str = "script_filename";
    pub const TIMEOUT_SECONDS: &'static str = "timeout_seconds";
    pub const DOCKER_IMAGE: &'static str = "docker_image";
    pub const DOCKER_COMMAND: &'static str = "docker_command";
    pub const DOCKER_ENV_VARS: &'static str = "docker_env_vars";
    pub const DOCKER_GPUS: &'static str = "docker_gpus";
    pub const SESSION_ID: &'static str = "session_id";

    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert, mostly useful in tests and fixtures.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Non-empty string value for `key`; blank strings count as absent.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    pub fn script_content(&self) -> Option<&str> {
        self.str(Self::SCRIPT_CONTENT)
    }

    pub fn script_interpreter(&self) -> Option<&str> {
        self.str(Self::SCRIPT_INTERPRETER)
    }

    pub fn script_filename(&self) -> Option<&str> {
        self.str(Self::SCRIPT_FILENAME)
    }

    pub fn docker_image(&self) -> Option<&str> {
        self.str(Self::DOCKER_IMAGE)
    }

    pub fn docker_gpus(&self) -> Option<&str> {
        self.str(Self::DOCKER_GPUS)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.str(Self::SESSION_ID)
    }

    /// Job-provided timeout. Accepts a JSON number or a numeric string;
    /// zero, negative, unparsable and out-of-range values mean "no timeout".
    pub fn timeout(&self) -> Option<Duration> {
        let secs = match self.0.get(Self::TIMEOUT_SECONDS)? {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        if secs > 0.0 {
            Duration::try_from_secs_f64(secs).ok()
        } else {
            None
        }
    }

    /// Container command. A JSON list yields its string items; a single
    /// string becomes a one-element command.
    pub fn docker_command(&self) -> Vec<String> {
        match self.0.get(Self::DOCKER_COMMAND) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    Value::Bool(b) => Some(b.to_string()),
                    _ => None,
                })
                .collect(),
            Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// Container environment, ordered by key. Non-string values are rendered as JSON text.
    pub fn docker_env_vars(&self) -> BTreeMap<String, String> {
        let Some(Value::Object(map)) = self.0.get(Self::DOCKER_ENV_VARS) else {
            return BTreeMap::new();
        };
        map.iter()
            .filter(|(k, _)| !k.is_empty())
            .map(|(k, v)| {
                let rendered = match v {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                (k.clone(), rendered)
            })
            .collect()
    }
}

impl From<Map<String, Value>> for JobParams {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}
