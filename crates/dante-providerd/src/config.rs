//! Daemon configuration file.
//!
//! The file is YAML, created with defaults on first run. Every section is
//! optional and unknown keys are ignored. After boot the configuration is a
//! read-only snapshot, apart from the GPU rental entries held by [`RentalBook`].

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use dante_billing::BillingConfig;
use dante_core::{HandlerConfig, MeteringConfig};
use dante_exec::{ContainerConfig, RlimitConfig, ScriptConfig};
use dante_observe::{LoggerConfig, LoggerFormat};
use dante_probe::ProbeConfig;
use dante_transport::TransportConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("config parse: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    fn io(path: &Path, source: io::Error) -> Self {
        ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Rental terms for one local GPU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuRentalConfig {
    pub gpu_id: String,
    #[serde(default)]
    pub is_available_for_rent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_hourly_rate_dgpu: Option<f64>,
}

/// Executor settings shared by the script and container executors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    pub docker_endpoint: Option<String>,
    pub pull_timeout_ms: u64,
    pub log_timeout_ms: u64,
    pub remove_timeout_ms: u64,
    pub stop_grace_secs: u64,
    pub kill_grace_ms: u64,
    pub gpu_driver: String,
    pub default_interpreter: String,
    pub max_output_bytes: usize,
    pub rlimits: RlimitConfig,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        let script = ScriptConfig::default();
        let container = ContainerConfig::default();
        Self {
            docker_endpoint: container.docker_endpoint,
            pull_timeout_ms: container.pull_timeout_ms,
            log_timeout_ms: container.log_timeout_ms,
            remove_timeout_ms: container.remove_timeout_ms,
            stop_grace_secs: container.stop_grace_secs,
            kill_grace_ms: script.kill_grace_ms,
            gpu_driver: container.gpu_driver,
            default_interpreter: script.default_interpreter,
            max_output_bytes: script.max_output_bytes,
            rlimits: script.rlimits,
        }
    }
}

impl ExecutorSettings {
    pub fn script(&self) -> ScriptConfig {
        ScriptConfig {
            default_interpreter: self.default_interpreter.clone(),
            kill_grace_ms: self.kill_grace_ms,
            max_output_bytes: self.max_output_bytes,
            rlimits: self.rlimits.clone(),
        }
    }

    pub fn container(&self) -> ContainerConfig {
        ContainerConfig {
            docker_endpoint: self.docker_endpoint.clone(),
            pull_timeout_ms: self.pull_timeout_ms,
            log_timeout_ms: self.log_timeout_ms,
            remove_timeout_ms: self.remove_timeout_ms,
            stop_grace_secs: self.stop_grace_secs,
            gpu_driver: self.gpu_driver.clone(),
            default_interpreter: self.default_interpreter.clone(),
            max_output_bytes: self.max_output_bytes,
            ..ContainerConfig::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub enabled: bool,
    pub listen: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: "127.0.0.1:8090".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub instance_id: String,
    pub log_level: String,
    pub log_format: LoggerFormat,
    /// Billing request timeout when `billing.timeout_ms` is zero.
    pub request_timeout_ms: u64,
    pub workspace_dir: PathBuf,
    pub max_concurrent_jobs: usize,

    pub preferred_currency: String,
    pub default_hourly_rate_dgpu: f64,
    pub min_job_duration_minutes: u32,
    pub gpu_rental_configs: Vec<GpuRentalConfig>,

    pub probe: ProbeConfig,
    pub executor: ExecutorSettings,
    pub billing: BillingConfig,
    pub metering: MeteringConfig,
    pub transport: TransportConfig,
    pub api: ApiSettings,
    pub shutdown_timeout_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            log_level: "info".into(),
            log_format: LoggerFormat::Text,
            request_timeout_ms: 30_000,
            workspace_dir: std::env::temp_dir().join("dante_tasks"),
            max_concurrent_jobs: 1,
            preferred_currency: "DGPU".into(),
            default_hourly_rate_dgpu: 0.0,
            min_job_duration_minutes: 0,
            gpu_rental_configs: Vec::new(),
            probe: ProbeConfig::default(),
            executor: ExecutorSettings::default(),
            billing: BillingConfig::default(),
            metering: MeteringConfig::default(),
            transport: TransportConfig::default(),
            api: ApiSettings::default(),
            shutdown_timeout_ms: 10_000,
        }
    }
}

/// `provider-<hostname>`, or `provider-unknown` when the hostname is unavailable.
pub fn default_instance_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".into());
    format!("provider-{host}")
}

impl DaemonConfig {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        // An empty file is an empty mapping.
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut cfg: DaemonConfig = serde_yaml::from_str(raw)?;
        if cfg.instance_id.trim().is_empty() {
            cfg.instance_id = default_instance_id();
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid("max_concurrent_jobs must be at least 1".into()));
        }
        if self.default_hourly_rate_dgpu < 0.0 {
            return Err(ConfigError::Invalid("default_hourly_rate_dgpu must not be negative".into()));
        }
        if self.preferred_currency.trim().is_empty() {
            return Err(ConfigError::Invalid("preferred_currency must not be empty".into()));
        }
        Ok(())
    }

    pub fn logger(&self) -> LoggerConfig {
        LoggerConfig::new(self.log_format, self.log_level.clone())
    }

    pub fn billing(&self) -> BillingConfig {
        let mut billing = self.billing.clone();
        if billing.timeout_ms == 0 {
            billing.timeout_ms = self.request_timeout_ms;
        }
        billing
    }

    pub fn handler(&self) -> HandlerConfig {
        HandlerConfig {
            instance_id: self.instance_id.clone(),
            max_concurrent_jobs: self.max_concurrent_jobs,
            metering: self.metering.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn settings(&self) -> ProviderSettings {
        ProviderSettings {
            instance_id: self.instance_id.clone(),
            default_hourly_rate_dgpu: self.default_hourly_rate_dgpu,
            preferred_currency: self.preferred_currency.clone(),
            min_job_duration_minutes: self.min_job_duration_minutes,
            max_concurrent_jobs: self.max_concurrent_jobs,
        }
    }

    /// Merges `update` into the provider settings. Nothing changes when the result is invalid.
    pub fn apply(&mut self, update: SettingsUpdate) -> Result<(), ConfigError> {
        let mut next = self.clone();
        if let Some(rate) = update.default_hourly_rate_dgpu {
            next.default_hourly_rate_dgpu = rate;
        }
        if let Some(currency) = update.preferred_currency {
            next.preferred_currency = currency.trim().to_string();
        }
        if let Some(minutes) = update.min_job_duration_minutes {
            next.min_job_duration_minutes = minutes;
        }
        if let Some(jobs) = update.max_concurrent_jobs {
            next.max_concurrent_jobs = jobs;
        }
        next.validate()?;
        *self = next;
        Ok(())
    }
}

/// The operator-facing subset printed by `--get-settings-json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderSettings {
    pub instance_id: String,
    pub default_hourly_rate_dgpu: f64,
    pub preferred_currency: String,
    pub min_job_duration_minutes: u32,
    pub max_concurrent_jobs: usize,
}

/// Body of `--update-settings-json`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsUpdate {
    pub default_hourly_rate_dgpu: Option<f64>,
    pub preferred_currency: Option<String>,
    pub min_job_duration_minutes: Option<u32>,
    pub max_concurrent_jobs: Option<usize>,
}

/// Changes to one GPU's rental entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RentalUpdate {
    pub gpu_id: String,
    pub rate: Option<f64>,
    pub available: Option<bool>,
}

/// Mutable GPU rental entries. Reads are snapshot copies.
#[derive(Debug, Clone, Default)]
pub struct RentalBook {
    inner: Arc<Mutex<Vec<GpuRentalConfig>>>,
}

impl RentalBook {
    pub fn new(entries: Vec<GpuRentalConfig>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(entries)),
        }
    }

    pub fn snapshot(&self) -> Vec<GpuRentalConfig> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn get(&self, gpu_id: &str) -> Option<GpuRentalConfig> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|r| r.gpu_id == gpu_id)
            .cloned()
    }

    /// Inserts or updates the entry for `update.gpu_id` and returns it.
    pub fn upsert(&self, update: RentalUpdate) -> Result<GpuRentalConfig, ConfigError> {
        if update.gpu_id.trim().is_empty() {
            return Err(ConfigError::Invalid("gpu_id must not be empty".into()));
        }
        if update.rate.is_some_and(|r| r < 0.0 || !r.is_finite()) {
            return Err(ConfigError::Invalid("rate must be a non-negative number".into()));
        }

        let mut entries = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let idx = match entries.iter().position(|r| r.gpu_id == update.gpu_id) {
            Some(idx) => idx,
            None => {
                entries.push(GpuRentalConfig {
                    gpu_id: update.gpu_id.clone(),
                    is_available_for_rent: false,
                    current_hourly_rate_dgpu: None,
                });
                entries.len() - 1
            }
        };
        let entry = &mut entries[idx];
        if let Some(rate) = update.rate {
            entry.current_hourly_rate_dgpu = Some(rate);
        }
        if let Some(available) = update.available {
            entry.is_available_for_rent = available;
        }
        Ok(entry.clone())
    }
}

/// A loaded configuration file together with its rental book.
pub struct ConfigStore {
    path: PathBuf,
    config: DaemonConfig,
    rentals: RentalBook,
    created: bool,
}

impl ConfigStore {
    /// Loads `path`, writing a default file first if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let (config, created) = match fs::read_to_string(&path) {
            Ok(raw) => (DaemonConfig::parse(&raw)?, false),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let config = DaemonConfig::default();
                write_atomic(&path, &config)?;
                (config, true)
            }
            Err(e) => return Err(ConfigError::io(&path, e)),
        };
        let rentals = RentalBook::new(config.gpu_rental_configs.clone());
        Ok(Self {
            path,
            config,
            rentals,
            created,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn rentals(&self) -> &RentalBook {
        &self.rentals
    }

    /// True when [`ConfigStore::open`] wrote a fresh default file.
    pub fn was_created(&self) -> bool {
        self.created
    }

    pub fn update_settings(&mut self, update: SettingsUpdate) -> Result<ProviderSettings, ConfigError> {
        self.config.apply(update)?;
        self.save()?;
        Ok(self.config.settings())
    }

    pub fn update_rental(&mut self, update: RentalUpdate) -> Result<GpuRentalConfig, ConfigError> {
        let entry = self.rentals.upsert(update)?;
        self.save()?;
        Ok(entry)
    }

    /// Writes the config with the rental book's current entries.
    pub fn save(&mut self) -> Result<(), ConfigError> {
        self.config.gpu_rental_configs = self.rentals.snapshot();
        write_atomic(&self.path, &self.config)
    }
}

/// Serialises `config` to a sibling temp file and renames it over `path`.
fn write_atomic(path: &Path, config: &DaemonConfig) -> Result<(), ConfigError> {
    let yaml = serde_yaml::to_string(config)?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| ConfigError::io(&dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| ConfigError::io(&dir, e))?;
    tmp.write_all(yaml.as_bytes())
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| ConfigError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| ConfigError::io(path, e.error))?;
    Ok(())
}
