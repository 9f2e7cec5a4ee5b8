use std::time::Duration;

use super::GpuBackend;
use crate::{GpuInfo, GpuVendor, ProbeError, command::run_tool};

/// Intel probe via `intel_gpu_top -L`.
///
/// The listing only identifies devices; no memory or live metrics are reported.
pub struct IntelBackend {
    program: String,
    timeout: Duration,
}

impl IntelBackend {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl GpuBackend for IntelBackend {
    fn vendor(&self) -> GpuVendor {
        GpuVendor::Intel
    }

    fn detect(&self) -> Result<Vec<GpuInfo>, ProbeError> {
        let out = run_tool(&self.program, &["-L"], self.timeout)?;
        Ok(parse_listing(&out))
    }
}

/// Each device line looks like
/// `card0   Intel Alderlake_p (Gen12)   pci:vendor=8086,device=46A6,card=0`.
pub(crate) fn parse_listing(out: &str) -> Vec<GpuInfo> {
    out.lines()
        .filter_map(|line| {
            let line = line.trim();
            let rest = line.strip_prefix("card")?;
            let (index, rest) = rest.split_once(char::is_whitespace)?;
            let index: u32 = index.parse().ok()?;

            let (desc, pci) = match rest.find("pci:") {
                Some(pos) => (rest[..pos].trim(), Some(rest[pos..].trim())),
                None => (rest.trim(), None),
            };
            let name = if desc.is_empty() {
                "Intel GPU".to_string()
            } else {
                desc.to_string()
            };

            let mut gpu = GpuInfo::new(GpuVendor::Intel.gpu_id(index), name, GpuVendor::Intel);
            gpu.pci_bus_id = pci.map(str::to_string);
            Some(gpu)
        })
        .collect()
}
