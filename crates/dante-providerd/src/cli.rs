use std::{io::Write, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use dante_probe::HardwareProbe;
use serde::Serialize;

use crate::{
    config::{ConfigStore, RentalUpdate, SettingsUpdate},
    inventory,
};

/// GPU provider daemon. Without a command flag it runs until SIGINT/SIGTERM.
#[derive(Debug, Parser)]
#[command(name = "dante-providerd", version)]
#[command(group(ArgGroup::new("command").multiple(false)))]
pub struct Cli {
    /// Configuration file; created with defaults when missing.
    #[arg(long, env = "DANTE_PROVIDER_CONFIG", default_value = "config.yaml")]
    pub config: PathBuf,

    /// Print detected GPUs with their rental status.
    #[arg(long, group = "command")]
    pub get_gpus_json: bool,

    /// Print provider settings.
    #[arg(long, group = "command")]
    pub get_settings_json: bool,

    /// Merge a JSON object into the provider settings.
    #[arg(long, group = "command", value_name = "JSON")]
    pub update_settings_json: Option<String>,

    /// Create or update one GPU's rental entry.
    #[arg(long, group = "command", requires = "gpu_id")]
    pub set_gpu_config_json: bool,

    #[arg(long, value_name = "ID")]
    pub gpu_id: Option<String>,

    /// Hourly rate in DGPU.
    #[arg(long)]
    pub rate: Option<f64>,

    #[arg(long, value_name = "BOOL")]
    pub available: Option<bool>,

    /// Ask the running daemon for its active jobs.
    #[arg(long, group = "command")]
    pub get_local_jobs_json: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Daemon,
    GetGpus,
    GetSettings,
    UpdateSettings(String),
    SetGpuConfig(RentalUpdate),
    GetLocalJobs,
}

impl Cli {
    pub fn command(&self) -> Command {
        if self.get_gpus_json {
            Command::GetGpus
        } else if self.get_settings_json {
            Command::GetSettings
        } else if let Some(json) = &self.update_settings_json {
            Command::UpdateSettings(json.clone())
        } else if self.set_gpu_config_json {
            Command::SetGpuConfig(RentalUpdate {
                gpu_id: self.gpu_id.clone().unwrap_or_default(),
                rate: self.rate,
                available: self.available,
            })
        } else if self.get_local_jobs_json {
            Command::GetLocalJobs
        } else {
            Command::Daemon
        }
    }
}

/// Runs a one-shot command, writing its JSON result to `out`.
pub async fn execute(command: Command, store: &mut ConfigStore, out: &mut impl Write) -> Result<()> {
    match command {
        Command::Daemon => anyhow::bail!("daemon mode is not a one-shot command"),
        Command::GetGpus => {
            let probe = Arc::new(HardwareProbe::new(&store.config().probe));
            let gpus = tokio::task::spawn_blocking(move || probe.detect_all())
                .await
                .context("gpu probe task failed")?;
            print_json(out, &inventory::listings(&gpus, &store.rentals().snapshot()))
        }
        Command::GetSettings => print_json(out, &store.config().settings()),
        Command::UpdateSettings(raw) => {
            let update: SettingsUpdate = serde_json::from_str(&raw).context("invalid settings json")?;
            let settings = store.update_settings(update)?;
            print_json(out, &settings)
        }
        Command::SetGpuConfig(update) => {
            let entry = store.update_rental(update)?;
            print_json(out, &entry)
        }
        Command::GetLocalJobs => {
            let jobs = local_jobs(store).await?;
            print_json(out, &jobs)
        }
    }
}

async fn local_jobs(store: &ConfigStore) -> Result<serde_json::Value> {
    let cfg = store.config();
    anyhow::ensure!(cfg.api.enabled, "control api is disabled in {}", store.path().display());

    let url = format!("http://{}/api/v1/jobs", loopback(&cfg.api.listen));
    let http = reqwest::Client::builder()
        .timeout(cfg.request_timeout())
        .build()
        .context("http client")?;
    let resp = http
        .get(&url)
        .send()
        .await
        .with_context(|| format!("daemon not reachable at {url}"))?
        .error_for_status()
        .context("daemon rejected the request")?;
    resp.json().await.context("invalid response from daemon")
}

/// Wildcard listen addresses are reached through loopback.
fn loopback(listen: &str) -> String {
    match listen.rsplit_once(':') {
        Some(("0.0.0.0", port)) => format!("127.0.0.1:{port}"),
        Some(("[::]", port)) => format!("[::1]:{port}"),
        _ => listen.to_string(),
    }
}

fn print_json(out: &mut impl Write, value: &impl Serialize) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
