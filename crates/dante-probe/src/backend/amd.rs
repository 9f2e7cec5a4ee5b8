use std::time::Duration;

use serde_json::{Map, Value};
use tracing::debug;

use super::{GpuBackend, field_f32, field_u64};
use crate::{GpuInfo, GpuVendor, ProbeError, command::run_tool};

const ARGS: &[&str] = &[
    "--showproductname",
    "--showmeminfo",
    "vram",
    "--showuse",
    "--showtemp",
    "--showpower",
    "--showdriverversion",
    "--json",
];

const MIB: u64 = 1024 * 1024;

/// `rocm-smi` backed probe.
pub struct AmdBackend {
    program: String,
    timeout: Duration,
}

impl AmdBackend {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl GpuBackend for AmdBackend {
    fn vendor(&self) -> GpuVendor {
        GpuVendor::Amd
    }

    fn detect(&self) -> Result<Vec<GpuInfo>, ProbeError> {
        let out = run_tool(&self.program, ARGS, self.timeout)?;
        parse_json(&out)
    }
}

/// Parses `rocm-smi --json`. The top level holds one object per `cardN` plus a
/// `system` object with the driver version.
pub(crate) fn parse_json(out: &str) -> Result<Vec<GpuInfo>, ProbeError> {
    let root: Map<String, Value> = serde_json::from_str(out).map_err(|e| ProbeError::Parse {
        tool: "rocm-smi".into(),
        msg: e.to_string(),
    })?;

    let driver = root
        .get("system")
        .and_then(|s| s.get("Driver version"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut cards: Vec<(u32, &Map<String, Value>)> = root
        .iter()
        .filter_map(|(key, value)| {
            let index = key.strip_prefix("card")?.parse::<u32>().ok()?;
            match value.as_object() {
                Some(obj) => Some((index, obj)),
                None => {
                    debug!(target: "dante.probe.amd", card = %key, "skipping non-object card entry");
                    None
                }
            }
        })
        .collect();
    cards.sort_by_key(|(i, _)| *i);

    Ok(cards
        .into_iter()
        .map(|(index, card)| parse_card(index, card, driver.clone()))
        .collect())
}

fn parse_card(index: u32, card: &Map<String, Value>, driver: Option<String>) -> GpuInfo {
    let name = text(card, |k| k == "Card series")
        .or_else(|| text(card, |k| k == "Card model"))
        .map(|n| {
            if n.to_ascii_uppercase().contains("AMD") {
                n.to_string()
            } else {
                format!("AMD {n}")
            }
        })
        .unwrap_or_else(|| "AMD GPU".to_string());

    let mut gpu = GpuInfo::new(GpuVendor::Amd.gpu_id(index), name, GpuVendor::Amd);
    gpu.vram_total_mb = text(card, |k| k == "VRAM Total Memory (B)")
        .and_then(field_u64)
        .map(|b| b / MIB);
    gpu.vram_used_mb = text(card, |k| k == "VRAM Total Used Memory (B)")
        .and_then(field_u64)
        .map(|b| b / MIB);
    gpu.vram_free_mb = gpu
        .vram_total_mb
        .zip(gpu.vram_used_mb)
        .map(|(t, u)| t.saturating_sub(u));
    gpu.utilization_percent = text(card, |k| k == "GPU use (%)").and_then(field_f32);
    gpu.temperature_c = text(card, |k| k.starts_with("Temperature") && k.contains("edge"))
        .or_else(|| text(card, |k| k.starts_with("Temperature")))
        .and_then(field_f32);
    gpu.power_draw_w = text(card, |k| {
        k.contains("Graphics Package Power") && !k.starts_with("Max")
    })
    .and_then(field_f32);
    gpu.power_limit_w = text(card, |k| k.starts_with("Max Graphics Package Power")).and_then(field_f32);
    gpu.driver_version = driver;
    gpu.pci_bus_id = text(card, |k| k == "PCI Bus").map(str::to_string);
    gpu.healthy = gpu.vram_total_mb.is_some() || gpu.utilization_percent.is_some();
    gpu
}

fn text<'a>(card: &'a Map<String, Value>, pred: impl Fn(&str) -> bool) -> Option<&'a str> {
    card.iter()
        .find(|(k, _)| pred(k))
        .and_then(|(_, v)| v.as_str())
}
