use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;

/// One metering tick, as posted to `usage-update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    pub session_id: String,
    pub gpu_utilization_percent: u8,
    pub vram_utilization_percent: u8,
    pub power_draw_w: u32,
    pub temperature_c: u8,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Lifecycle marker posted to `end-session` when a task exits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEnd {
    pub session_id: String,
    pub job_id: String,
    pub reason: String,
    /// Wall-clock hours between execution start and exit.
    pub duration_hours: f64,
}

/// The part of `current-usage/{session}` that decides whether a task may keep running.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "CurrentUsage")]
pub struct SessionStatus {
    pub state: String,
    pub remaining_balance: f64,
    pub current_cost: f64,
}

impl SessionStatus {
    pub const ACTIVE: &'static str = "active";

    pub fn active(remaining_balance: f64) -> Self {
        Self {
            state: Self::ACTIVE.into(),
            remaining_balance,
            current_cost: 0.0,
        }
    }

    pub fn inactive(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            remaining_balance: 0.0,
            current_cost: 0.0,
        }
    }

    /// The session is active and still has a positive balance.
    pub fn is_funded(&self) -> bool {
        self.state == Self::ACTIVE && self.remaining_balance > 0.0
    }
}

#[derive(Deserialize)]
struct CurrentUsage {
    #[serde(default)]
    session: SessionRecord,
    #[serde(default, deserialize_with = "decimal")]
    remaining_balance: f64,
    #[serde(default, deserialize_with = "decimal")]
    current_cost: f64,
}

#[derive(Deserialize, Default)]
struct SessionRecord {
    #[serde(default)]
    status: String,
}

impl From<CurrentUsage> for SessionStatus {
    fn from(raw: CurrentUsage) -> Self {
        Self {
            state: raw.session.status,
            remaining_balance: raw.remaining_balance,
            current_cost: raw.current_cost,
        }
    }
}

/// Money fields arrive either as JSON numbers or as decimal strings.
fn decimal<'de, D>(d: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Str(String),
    }

    match Option::<Raw>::deserialize(d)? {
        None => Ok(0.0),
        Some(Raw::Num(n)) => Ok(n),
        Some(Raw::Str(s)) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid decimal {s:?}"))),
    }
}
