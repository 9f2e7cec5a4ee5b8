use std::time::Duration;

use serde_json::Value;

use super::GpuBackend;
use crate::{GpuInfo, GpuVendor, ProbeError, catalog::unified_memory_mb, command::run_tool};

/// Apple Silicon probe via `system_profiler SPDisplaysDataType -json`.
///
/// Only integrated Apple GPUs are reported. Their VRAM is unified memory, so the
/// total comes from the chip family table and free/used stay unknown.
pub struct AppleBackend {
    program: String,
    timeout: Duration,
}

impl AppleBackend {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl GpuBackend for AppleBackend {
    fn vendor(&self) -> GpuVendor {
        GpuVendor::Apple
    }

    fn detect(&self) -> Result<Vec<GpuInfo>, ProbeError> {
        if !cfg!(target_os = "macos") {
            return Err(ProbeError::ToolMissing(self.program.clone()));
        }
        let out = run_tool(&self.program, &["SPDisplaysDataType", "-json"], self.timeout)?;
        parse_profiler(&out)
    }
}

pub(crate) fn parse_profiler(out: &str) -> Result<Vec<GpuInfo>, ProbeError> {
    let root: Value = serde_json::from_str(out).map_err(|e| ProbeError::Parse {
        tool: "system_profiler".into(),
        msg: e.to_string(),
    })?;
    let Some(displays) = root.get("SPDisplaysDataType").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    Ok(displays
        .iter()
        .filter_map(|d| {
            d.get("sppci_model")
                .or_else(|| d.get("_name"))
                .and_then(Value::as_str)
        })
        .filter(|name| name.starts_with("Apple"))
        .enumerate()
        .map(|(i, name)| {
            let mut gpu = GpuInfo::new(GpuVendor::Apple.gpu_id(i), name.to_string(), GpuVendor::Apple);
            gpu.vram_total_mb = unified_memory_mb(name);
            gpu.healthy = true;
            gpu
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_apple_silicon() {
        let out = r#"{"SPDisplaysDataType": [
            {"_name": "kHW_AppleM2MaxItem", "sppci_model": "Apple M2 Max", "sppci_cores": "38"}
        ]}"#;
        let gpus = parse_profiler(out).unwrap();
        assert_eq!(gpus.len(), 1);
        assert_eq!(gpus[0].id, "apple-0");
        assert_eq!(gpus[0].model, "Apple M2 Max");
        assert_eq!(gpus[0].vram_total_mb, Some(96 * 1024));
        assert_eq!(gpus[0].vram_free_mb, None);
    }

    #[test]
    fn discrete_gpus_are_ignored() {
        let out = r#"{"SPDisplaysDataType": [
            {"_name": "AMD Radeon Pro 5500M", "sppci_model": "AMD Radeon Pro 5500M"},
            {"_name": "Intel UHD Graphics 630", "sppci_model": "Intel UHD Graphics 630"}
        ]}"#;
        assert!(parse_profiler(out).unwrap().is_empty());
    }

    #[test]
    fn unexpected_shape_is_empty() {
        assert!(parse_profiler(r#"{"other": 1}"#).unwrap().is_empty());
    }
}
