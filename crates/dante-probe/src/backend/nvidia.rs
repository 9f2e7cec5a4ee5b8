use std::time::Duration;

use tracing::debug;

use super::{GpuBackend, field, field_f32, field_u64};
use crate::{GpuInfo, GpuVendor, LiveMetrics, ProbeError, command::run_tool};

const QUERY: &str = "--query-gpu=index,name,uuid,memory.total,memory.used,memory.free,\
utilization.gpu,temperature.gpu,power.draw,power.limit,driver_version,pci.bus_id";
const FORMAT: &str = "--format=csv,noheader,nounits";
const COLUMNS: usize = 12;

/// `nvidia-smi` backed probe.
pub struct NvidiaBackend {
    program: String,
    timeout: Duration,
}

impl NvidiaBackend {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl GpuBackend for NvidiaBackend {
    fn vendor(&self) -> GpuVendor {
        GpuVendor::Nvidia
    }

    fn detect(&self) -> Result<Vec<GpuInfo>, ProbeError> {
        let out = run_tool(&self.program, &[QUERY, FORMAT], self.timeout)?;
        Ok(parse_csv(&out))
    }

    fn sample(&self, gpu_id: &str) -> Result<Option<LiveMetrics>, ProbeError> {
        let Some(index) = gpu_id.strip_prefix("nvidia-") else {
            return Ok(None);
        };
        let id_arg = format!("--id={index}");
        let out = run_tool(&self.program, &[&id_arg, QUERY, FORMAT], self.timeout)?;
        Ok(parse_csv(&out)
            .into_iter()
            .find(|g| g.id == gpu_id)
            .map(|g| g.live_metrics()))
    }
}

/// Parses `--format=csv,noheader,nounits` rows; malformed rows are skipped.
pub(crate) fn parse_csv(out: &str) -> Vec<GpuInfo> {
    out.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| {
            let row = parse_row(line);
            if row.is_none() {
                debug!(target: "dante.probe.nvidia", line, "skipping malformed row");
            }
            row
        })
        .collect()
}

fn parse_row(line: &str) -> Option<GpuInfo> {
    let cols: Vec<&str> = line.split(',').map(str::trim).collect();
    if cols.len() < COLUMNS {
        return None;
    }
    let index: u32 = cols[0].parse().ok()?;
    let name = field(cols[1])?.to_string();

    let mut gpu = GpuInfo::new(GpuVendor::Nvidia.gpu_id(index), name, GpuVendor::Nvidia);
    gpu.uuid = field(cols[2]).map(str::to_string);
    gpu.vram_total_mb = field_u64(cols[3]);
    gpu.vram_used_mb = field_u64(cols[4]);
    gpu.vram_free_mb = field_u64(cols[5]);
    gpu.utilization_percent = field_f32(cols[6]);
    gpu.temperature_c = field_f32(cols[7]);
    gpu.power_draw_w = field_f32(cols[8]);
    gpu.power_limit_w = field_f32(cols[9]);
    gpu.driver_version = field(cols[10]).map(str::to_string);
    gpu.pci_bus_id = field(cols[11]).map(str::to_string);
    gpu.healthy = gpu.vram_total_mb.is_some() || gpu.utilization_percent.is_some();
    Some(gpu)
}
