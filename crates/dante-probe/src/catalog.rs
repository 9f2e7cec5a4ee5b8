//! Canonical GPU model names.
//!
//! Vendor tools report the same card under different spellings
//! ("NVIDIA GeForce RTX 4090", "GeForce RTX 4090 24GB"). The catalog maps a
//! reported name to a short canonical model by case-insensitive substring match;
//! the longest matching pattern wins so `A100` is not swallowed by `A10`.

use crate::GpuVendor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub pattern: &'static str,
    pub canonical: &'static str,
    pub vendor: GpuVendor,
    /// Coarse family used for price matching when an exact model is not listed.
    pub family: &'static str,
}

const fn entry(
    pattern: &'static str,
    canonical: &'static str,
    vendor: GpuVendor,
    family: &'static str,
) -> CatalogEntry {
    CatalogEntry {
        pattern,
        canonical,
        vendor,
        family,
    }
}

use GpuVendor::{Amd, Apple, Intel, Nvidia};

static CATALOG: &[CatalogEntry] = &[
    // NVIDIA datacenter
    entry("H200", "H200", Nvidia, "Hopper"),
    entry("H100", "H100", Nvidia, "Hopper"),
    entry("GH200", "GH200", Nvidia, "Hopper"),
    entry("A100", "A100", Nvidia, "Ampere"),
    entry("A40", "A40", Nvidia, "Ampere"),
    entry("A30", "A30", Nvidia, "Ampere"),
    entry("A10", "A10", Nvidia, "Ampere"),
    entry("L40S", "L40S", Nvidia, "Ada"),
    entry("L40", "L40", Nvidia, "Ada"),
    entry("L4", "L4", Nvidia, "Ada"),
    entry("Tesla T4", "T4", Nvidia, "Turing"),
    entry("V100", "V100", Nvidia, "Volta"),
    // NVIDIA workstation
    entry("RTX 6000 Ada", "RTX 6000 Ada", Nvidia, "Ada"),
    entry("RTX A6000", "RTX A6000", Nvidia, "Ampere"),
    entry("RTX A5000", "RTX A5000", Nvidia, "Ampere"),
    entry("RTX A4000", "RTX A4000", Nvidia, "Ampere"),
    // NVIDIA consumer
    entry("RTX 5090", "RTX 5090", Nvidia, "RTX 50"),
    entry("RTX 5080", "RTX 5080", Nvidia, "RTX 50"),
    entry("RTX 4090", "RTX 4090", Nvidia, "RTX 40"),
    entry("RTX 4080", "RTX 4080", Nvidia, "RTX 40"),
    entry("RTX 4070 Ti", "RTX 4070 Ti", Nvidia, "RTX 40"),
    entry("RTX 4070", "RTX 4070", Nvidia, "RTX 40"),
    entry("RTX 4060 Ti", "RTX 4060 Ti", Nvidia, "RTX 40"),
    entry("RTX 4060", "RTX 4060", Nvidia, "RTX 40"),
    entry("RTX 3090 Ti", "RTX 3090 Ti", Nvidia, "RTX 30"),
    entry("RTX 3090", "RTX 3090", Nvidia, "RTX 30"),
    entry("RTX 3080 Ti", "RTX 3080 Ti", Nvidia, "RTX 30"),
    entry("RTX 3080", "RTX 3080", Nvidia, "RTX 30"),
    entry("RTX 3070", "RTX 3070", Nvidia, "RTX 30"),
    entry("RTX 3060", "RTX 3060", Nvidia, "RTX 30"),
    // AMD
    entry("MI300X", "Instinct MI300X", Amd, "Instinct"),
    entry("MI250X", "Instinct MI250X", Amd, "Instinct"),
    entry("MI250", "Instinct MI250", Amd, "Instinct"),
    entry("MI210", "Instinct MI210", Amd, "Instinct"),
    entry("MI100", "Instinct MI100", Amd, "Instinct"),
    entry("RX 7900 XTX", "Radeon RX 7900 XTX", Amd, "RX 7000"),
    entry("RX 7900 XT", "Radeon RX 7900 XT", Amd, "RX 7000"),
    entry("RX 6900 XT", "Radeon RX 6900 XT", Amd, "RX 6000"),
    entry("RX 6800 XT", "Radeon RX 6800 XT", Amd, "RX 6000"),
    // Apple
    entry("M1 Ultra", "Apple M1 Ultra", Apple, "M1"),
    entry("M1 Max", "Apple M1 Max", Apple, "M1"),
    entry("M1 Pro", "Apple M1 Pro", Apple, "M1"),
    entry("M2 Ultra", "Apple M2 Ultra", Apple, "M2"),
    entry("M2 Max", "Apple M2 Max", Apple, "M2"),
    entry("M2 Pro", "Apple M2 Pro", Apple, "M2"),
    entry("M3 Ultra", "Apple M3 Ultra", Apple, "M3"),
    entry("M3 Max", "Apple M3 Max", Apple, "M3"),
    entry("M3 Pro", "Apple M3 Pro", Apple, "M3"),
    entry("M4 Max", "Apple M4 Max", Apple, "M4"),
    entry("M4 Pro", "Apple M4 Pro", Apple, "M4"),
    // Intel
    entry("Arc A770", "Arc A770", Intel, "Arc"),
    entry("Arc A750", "Arc A750", Intel, "Arc"),
    entry("Max 1550", "Data Center GPU Max 1550", Intel, "Max"),
    entry("Max 1100", "Data Center GPU Max 1100", Intel, "Max"),
];

/// Catalog entry for a reported GPU name, if any pattern matches.
pub fn canonical_model(reported: &str) -> Option<&'static CatalogEntry> {
    let haystack = reported.to_ascii_lowercase();
    CATALOG
        .iter()
        .filter(|e| haystack.contains(&e.pattern.to_ascii_lowercase()))
        .max_by_key(|e| e.pattern.len())
}

/// Unified memory (MB) for Apple Silicon chips, looked up by chip family and tier.
///
/// Values are the largest configuration of each chip; the system tools do not
/// expose a GPU-visible share of unified memory.
pub fn unified_memory_mb(chip: &str) -> Option<u64> {
    const GB: u64 = 1024;
    let chip = chip.to_ascii_lowercase();
    let generation = ["m4", "m3", "m2", "m1"]
        .into_iter()
        .find(|g| chip.contains(g))?;
    let tier = if chip.contains("ultra") {
        "ultra"
    } else if chip.contains("max") {
        "max"
    } else if chip.contains("pro") {
        "pro"
    } else {
        "base"
    };

    let gb = match (generation, tier) {
        ("m1", "ultra") => 128,
        ("m1", "max") => 64,
        ("m1", "pro") => 32,
        ("m1", _) => 16,
        ("m2", "ultra") => 192,
        ("m2", "max") => 96,
        ("m2", "pro") => 32,
        ("m2", _) => 24,
        ("m3", "ultra") => 512,
        ("m3", "max") => 128,
        ("m3", "pro") => 36,
        ("m3", _) => 24,
        ("m4", "max") => 128,
        ("m4", "pro") => 64,
        ("m4", _) => 32,
        _ => return None,
    };
    Some(gb * GB)
}
