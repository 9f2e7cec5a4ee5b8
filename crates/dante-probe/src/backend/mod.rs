mod amd;
mod apple;
mod intel;
mod nvidia;

pub use amd::AmdBackend;
pub use apple::AppleBackend;
pub use intel::IntelBackend;
pub use nvidia::NvidiaBackend;

use crate::{GpuInfo, GpuVendor, LiveMetrics, ProbeError};

/// One vendor path of the hardware probe.
///
/// Implementations are synchronous and may block on a subprocess for up to
/// their configured timeout.
pub trait GpuBackend: Send + Sync {
    fn vendor(&self) -> GpuVendor;

    /// Static inventory with whatever live fields the tool returns alongside.
    fn detect(&self) -> Result<Vec<GpuInfo>, ProbeError>;

    /// Live metrics for a single GPU owned by this backend.
    ///
    /// The default re-runs detection and slices out the requested device.
    fn sample(&self, gpu_id: &str) -> Result<Option<LiveMetrics>, ProbeError> {
        Ok(self
            .detect()?
            .into_iter()
            .find(|g| g.id == gpu_id)
            .map(|g| g.live_metrics()))
    }
}

/// Reads a tool field, treating the usual "not available" spellings as absent.
pub(crate) fn field(raw: &str) -> Option<&str> {
    let v = raw.trim();
    let lower = v.to_ascii_lowercase();
    if v.is_empty()
        || lower == "n/a"
        || lower == "[n/a]"
        || lower.starts_with("[not supported")
        || lower.starts_with("[unknown")
        || lower == "unknown"
    {
        None
    } else {
        Some(v)
    }
}

pub(crate) fn field_u64(raw: &str) -> Option<u64> {
    let v = field(raw)?;
    v.parse::<u64>()
        .ok()
        .or_else(|| v.parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64))
}

pub(crate) fn field_f32(raw: &str) -> Option<f32> {
    field(raw)?.parse::<f32>().ok().filter(|f| f.is_finite())
}
