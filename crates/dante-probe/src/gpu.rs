use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GpuVendor {
    #[serde(rename = "NVIDIA")]
    Nvidia,
    #[serde(rename = "AMD")]
    Amd,
    Apple,
    Intel,
}

impl GpuVendor {
    /// Prefix of the stable GPU ID (`nvidia-0`, `amd-1`, ...).
    pub fn id_prefix(&self) -> &'static str {
        match self {
            GpuVendor::Nvidia => "nvidia",
            GpuVendor::Amd => "amd",
            GpuVendor::Apple => "apple",
            GpuVendor::Intel => "intel",
        }
    }

    pub fn gpu_id(&self, index: impl fmt::Display) -> String {
        format!("{}-{index}", self.id_prefix())
    }

    /// Vendor owning `gpu_id`, judged by its prefix.
    pub fn of_id(gpu_id: &str) -> Option<GpuVendor> {
        let (prefix, _) = gpu_id.split_once('-')?;
        [
            GpuVendor::Nvidia,
            GpuVendor::Amd,
            GpuVendor::Apple,
            GpuVendor::Intel,
        ]
        .into_iter()
        .find(|v| v.id_prefix() == prefix)
    }
}

impl fmt::Display for GpuVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GpuVendor::Nvidia => "NVIDIA",
            GpuVendor::Amd => "AMD",
            GpuVendor::Apple => "Apple",
            GpuVendor::Intel => "Intel",
        })
    }
}

/// One GPU as seen by the last probe cycle.
///
/// Every measured field is optional: a value the tool did not report stays
/// `None` instead of being zero-filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuInfo {
    pub id: String,
    /// Name as reported by the vendor tool.
    pub name: String,
    /// Canonical catalog model, or `name` when the model is not in the catalog.
    pub model: String,
    pub vendor: GpuVendor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vram_total_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vram_used_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vram_free_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utilization_percent: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_draw_w: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_limit_w: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pci_bus_id: Option<String>,
    pub healthy: bool,
}

impl GpuInfo {
    /// Bare entry; callers fill in whatever the tool reported.
    pub fn new(id: String, name: String, vendor: GpuVendor) -> Self {
        let model = crate::canonical_model(&name)
            .map(|e| e.canonical.to_string())
            .unwrap_or_else(|| name.clone());
        Self {
            id,
            name,
            model,
            vendor,
            uuid: None,
            vram_total_mb: None,
            vram_used_mb: None,
            vram_free_mb: None,
            utilization_percent: None,
            temperature_c: None,
            power_draw_w: None,
            power_limit_w: None,
            driver_version: None,
            pci_bus_id: None,
            healthy: true,
        }
    }

    /// Live slice of this entry, stamped now.
    pub fn live_metrics(&self) -> LiveMetrics {
        let vram_used_mb = self.vram_used_mb.or_else(|| {
            self.vram_total_mb
                .zip(self.vram_free_mb)
                .map(|(t, f)| t.saturating_sub(f))
        });
        LiveMetrics {
            gpu_id: self.id.clone(),
            utilization_percent: self.utilization_percent,
            vram_used_mb,
            vram_total_mb: self.vram_total_mb,
            temperature_c: self.temperature_c,
            power_draw_w: self.power_draw_w,
            sampled_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Point-in-time utilisation of one GPU, consumed by the metering loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveMetrics {
    pub gpu_id: String,
    pub utilization_percent: Option<f32>,
    pub vram_used_mb: Option<u64>,
    pub vram_total_mb: Option<u64>,
    pub temperature_c: Option<f32>,
    pub power_draw_w: Option<f32>,
    #[serde(with = "time::serde::rfc3339")]
    pub sampled_at: OffsetDateTime,
}

impl LiveMetrics {
    /// VRAM in use as a percentage of total, when both are known.
    pub fn vram_utilization_percent(&self) -> Option<f32> {
        match (self.vram_used_mb, self.vram_total_mb) {
            (Some(used), Some(total)) if total > 0 => {
                Some(((used as f64 / total as f64) * 100.0).clamp(0.0, 100.0) as f32)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_from_id_prefix() {
        assert_eq!(GpuVendor::of_id("nvidia-0"), Some(GpuVendor::Nvidia));
        assert_eq!(GpuVendor::of_id("amd-3"), Some(GpuVendor::Amd));
        assert_eq!(GpuVendor::of_id("gpu-abc"), None);
        assert_eq!(GpuVendor::of_id("nvidia"), None);
    }

    #[test]
    fn new_entry_uses_catalog_model() {
        let gpu = GpuInfo::new(
            "nvidia-0".into(),
            "NVIDIA GeForce RTX 4090".into(),
            GpuVendor::Nvidia,
        );
        assert_eq!(gpu.model, "RTX 4090");

        let odd = GpuInfo::new("nvidia-1".into(), "Mystery X1".into(), GpuVendor::Nvidia);
        assert_eq!(odd.model, "Mystery X1");
    }

    #[test]
    fn live_metrics_derive_used_from_free() {
        let mut gpu = GpuInfo::new("amd-0".into(), "AMD Instinct MI210".into(), GpuVendor::Amd);
        gpu.vram_total_mb = Some(1000);
        gpu.vram_free_mb = Some(250);
        let m = gpu.live_metrics();
        assert_eq!(m.vram_used_mb, Some(750));
        assert_eq!(m.vram_utilization_percent(), Some(75.0));
    }

    #[test]
    fn vram_percent_absent_without_total() {
        let gpu = GpuInfo::new("intel-0".into(), "Intel GPU".into(), GpuVendor::Intel);
        assert_eq!(gpu.live_metrics().vram_utilization_percent(), None);
    }

    #[test]
    fn vendor_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&GpuVendor::Nvidia).unwrap(), r#""NVIDIA""#);
        assert_eq!(serde_json::to_string(&GpuVendor::Apple).unwrap(), r#""Apple""#);
    }
}
