use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};

use crate::{
    AmdBackend, AppleBackend, GpuBackend, GpuInfo, GpuVendor, IntelBackend, LiveMetrics,
    NvidiaBackend, ProbeError,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub nvidia_smi_path: String,
    pub rocm_smi_path: String,
    pub system_profiler_path: String,
    pub intel_gpu_top_path: String,
    /// Per-invocation deadline for the vendor tools.
    pub command_timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            nvidia_smi_path: "nvidia-smi".into(),
            rocm_smi_path: "rocm-smi".into(),
            system_profiler_path: "system_profiler".into(),
            intel_gpu_top_path: "intel_gpu_top".into(),
            command_timeout_ms: 10_000,
        }
    }
}

/// Source of live GPU metrics for the metering loop.
///
/// Sampling is synchronous and may block on a subprocess; async callers run it
/// on a blocking thread.
pub trait MetricsSampler: Send + Sync {
    fn sample(&self, gpu_id: &str) -> Option<LiveMetrics>;
}

/// Chain of vendor backends.
pub struct HardwareProbe {
    backends: Vec<Box<dyn GpuBackend>>,
}

impl HardwareProbe {
    /// Probe with every known vendor backend.
    pub fn new(cfg: &ProbeConfig) -> Self {
        let timeout = Duration::from_millis(cfg.command_timeout_ms.max(1));
        Self::with_backends(vec![
            Box::new(NvidiaBackend::new(cfg.nvidia_smi_path.clone(), timeout)),
            Box::new(AmdBackend::new(cfg.rocm_smi_path.clone(), timeout)),
            Box::new(AppleBackend::new(cfg.system_profiler_path.clone(), timeout)),
            Box::new(IntelBackend::new(cfg.intel_gpu_top_path.clone(), timeout)),
        ])
    }

    pub fn with_backends(backends: Vec<Box<dyn GpuBackend>>) -> Self {
        Self { backends }
    }

    /// One-shot inventory across all vendors.
    #[instrument(level = "debug", skip(self))]
    pub fn detect_all(&self) -> Vec<GpuInfo> {
        let mut gpus = Vec::new();
        for backend in &self.backends {
            let found = settle(backend.vendor(), backend.detect()).unwrap_or_default();
            trace!(target: "dante.probe", vendor = %backend.vendor(), count = found.len(), "backend detection done");
            gpus.extend(found);
        }
        debug!(target: "dante.probe", count = gpus.len(), "gpu detection finished");
        gpus
    }

    /// Live metrics for `gpu_id`.
    ///
    /// IDs with a known vendor prefix go to that vendor's backend. Any other ID
    /// (e.g. a registry-level instance ID) is answered by the first local GPU that
    /// reports metrics.
    pub fn sample(&self, gpu_id: &str) -> Option<LiveMetrics> {
        if let Some(vendor) = GpuVendor::of_id(gpu_id) {
            let backend = self.backends.iter().find(|b| b.vendor() == vendor)?;
            return settle(vendor, backend.sample(gpu_id)).flatten();
        }

        self.backends.iter().find_map(|backend| {
            let gpus = settle(backend.vendor(), backend.detect())?;
            let first = gpus.first()?;
            trace!(target: "dante.probe", requested = gpu_id, local = %first.id, "sampling first local gpu for foreign id");
            Some(first.live_metrics())
        })
    }
}

impl MetricsSampler for HardwareProbe {
    fn sample(&self, gpu_id: &str) -> Option<LiveMetrics> {
        HardwareProbe::sample(self, gpu_id)
    }
}

/// Turns a backend result into a best-effort value: a missing tool is silent,
/// any other failure is a warning.
fn settle<T>(vendor: GpuVendor, res: Result<T, ProbeError>) -> Option<T> {
    match res {
        Ok(v) => Some(v),
        Err(ProbeError::ToolMissing(tool)) => {
            trace!(target: "dante.probe", %vendor, %tool, "vendor tool not installed");
            None
        }
        Err(e) => {
            warn!(target: "dante.probe", %vendor, error = %e, "gpu probe failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        vendor: GpuVendor,
        result: fn() -> Result<Vec<GpuInfo>, ProbeError>,
    }

    impl GpuBackend for Fixed {
        fn vendor(&self) -> GpuVendor {
            self.vendor
        }

        fn detect(&self) -> Result<Vec<GpuInfo>, ProbeError> {
            (self.result)()
        }
    }

    fn fixed(vendor: GpuVendor, result: fn() -> Result<Vec<GpuInfo>, ProbeError>) -> Box<dyn GpuBackend> {
        Box::new(Fixed {
            vendor,
            result,
        })
    }

    fn one_nvidia() -> Result<Vec<GpuInfo>, ProbeError> {
        let mut g = GpuInfo::new("nvidia-0".into(), "NVIDIA GeForce RTX 4090".into(), GpuVendor::Nvidia);
        g.utilization_percent = Some(80.0);
        g.vram_total_mb = Some(24_000);
        g.vram_used_mb = Some(12_000);
        Ok(vec![g])
    }

    fn missing() -> Result<Vec<GpuInfo>, ProbeError> {
        Err(ProbeError::ToolMissing("rocm-smi".into()))
    }

    fn broken() -> Result<Vec<GpuInfo>, ProbeError> {
        Err(ProbeError::Failed {
            tool: "intel_gpu_top".into(),
            code: Some(1),
            stderr: "permission denied".into(),
        })
    }

    #[test]
    fn failing_backends_do_not_fail_detection() {
        let probe = HardwareProbe::with_backends(vec![
            fixed(GpuVendor::Amd, missing),
            fixed(GpuVendor::Nvidia, one_nvidia),
            fixed(GpuVendor::Intel, broken),
        ]);
        let gpus = probe.detect_all();
        assert_eq!(gpus.len(), 1);
        assert_eq!(gpus[0].id, "nvidia-0");
    }

    #[test]
    fn sample_routes_by_vendor_prefix() {
        let probe = HardwareProbe::with_backends(vec![fixed(GpuVendor::Nvidia, one_nvidia)]);
        let m = probe.sample("nvidia-0").unwrap();
        assert_eq!(m.utilization_percent, Some(80.0));
        assert_eq!(m.vram_utilization_percent(), Some(50.0));

        assert!(probe.sample("nvidia-7").is_none());
        assert!(probe.sample("amd-0").is_none());
    }

    #[test]
    fn foreign_id_falls_back_to_first_local_gpu() {
        let probe = HardwareProbe::with_backends(vec![
            fixed(GpuVendor::Amd, missing),
            fixed(GpuVendor::Nvidia, one_nvidia),
        ]);
        let m = probe.sample("gpu-instance-42").unwrap();
        assert_eq!(m.gpu_id, "nvidia-0");
    }

    #[test]
    fn empty_probe_samples_nothing() {
        let probe = HardwareProbe::with_backends(vec![fixed(GpuVendor::Amd, missing)]);
        assert!(probe.detect_all().is_empty());
        assert!(probe.sample("gpu-1").is_none());
    }

    #[derive(Clone, Default)]
    struct Targets(std::sync::Arc<std::sync::Mutex<Vec<String>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for Targets {
        fn on_event(&self, event: &tracing::Event<'_>, _: tracing_subscriber::layer::Context<'_, S>) {
            self.0.lock().unwrap().push(event.metadata().target().to_string());
        }
    }

    #[test]
    fn detection_events_are_logged_under_dante_target() {
        use tracing_subscriber::layer::SubscriberExt;

        let targets = Targets::default();
        let subscriber = tracing_subscriber::registry().with(targets.clone());
        tracing::subscriber::with_default(subscriber, || {
            let probe = HardwareProbe::with_backends(vec![
                fixed(GpuVendor::Amd, missing),
                fixed(GpuVendor::Nvidia, one_nvidia),
                fixed(GpuVendor::Intel, broken),
            ]);
            probe.detect_all();
            probe.sample("gpu-instance-42");
        });

        let seen = targets.0.lock().unwrap();
        assert!(seen.len() >= 5, "{seen:?}");
        assert!(seen.iter().all(|t| t.starts_with("dante.probe")), "{seen:?}");
    }

    #[test]
    fn config_defaults() {
        let cfg = ProbeConfig::default();
        assert_eq!(cfg.nvidia_smi_path, "nvidia-smi");
        assert_eq!(cfg.command_timeout_ms, 10_000);
    }
}
