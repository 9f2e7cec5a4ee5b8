use dante_probe::{GpuInfo, GpuVendor};
use serde::Serialize;

use crate::config::GpuRentalConfig;

/// One row of `--get-gpus-json`: probe data joined with rental terms.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuListing {
    pub id: String,
    pub name: String,
    pub model: String,
    pub vendor: GpuVendor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vram_total_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vram_free_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utilization_gpu_percent: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_draw_w: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_version: Option<String>,
    pub is_available_for_rent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_hourly_rate_dgpu: Option<f64>,
}

/// GPUs without a rental entry are listed as not rentable with no rate.
pub fn listings(gpus: &[GpuInfo], rentals: &[GpuRentalConfig]) -> Vec<GpuListing> {
    gpus.iter()
        .map(|gpu| {
            let rental = rentals.iter().find(|r| r.gpu_id == gpu.id);
            GpuListing {
                id: gpu.id.clone(),
                name: gpu.name.clone(),
                model: gpu.model.clone(),
                vendor: gpu.vendor,
                vram_total_mb: gpu.vram_total_mb,
                vram_free_mb: gpu.vram_free_mb,
                utilization_gpu_percent: gpu.utilization_percent,
                temperature_c: gpu.temperature_c,
                power_draw_w: gpu.power_draw_w,
                driver_version: gpu.driver_version.clone(),
                is_available_for_rent: rental.is_some_and(|r| r.is_available_for_rent),
                current_hourly_rate_dgpu: rental.and_then(|r| r.current_hourly_rate_dgpu),
            }
        })
        .collect()
}
