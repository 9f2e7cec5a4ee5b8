//! GPU discovery and live metrics.
//!
//! Each vendor is a [`GpuBackend`] that shells out to the vendor's query tool
//! and parses its machine-readable output. [`HardwareProbe`] chains the
//! backends; a failing vendor path never fails the probe as a whole.

mod backend;
mod catalog;
mod command;
mod error;
mod gpu;
mod probe;

pub use backend::{AmdBackend, AppleBackend, GpuBackend, IntelBackend, NvidiaBackend};
pub use catalog::{CatalogEntry, canonical_model, unified_memory_mb};
pub use error::ProbeError;
pub use gpu::{GpuInfo, GpuVendor, LiveMetrics};
pub use probe::{HardwareProbe, MetricsSampler, ProbeConfig};
