//! Static device description handed to the placement layer.

use serde::{Serialize, Deserialize};

/// Immutable snapshot of device identity and capacity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescription {
    pub name: String,
    pub vendor: String,
    pub platform_version: String,
    pub device_ordinal: usize,
    /// Logical cores available to the device
    pub core_count: usize,
    /// Nominal clock rate in GHz, if known
    pub clock_rate_ghz: Option<f32>,
    /// Total device memory in bytes
    pub device_memory_size: u64,
    /// Alignment guaranteed for top-level allocations
    pub memory_alignment: u64,
}

/// Builder for `DeviceDescription`. Unset fields fall back to neutral values.
#[derive(Debug, Default)]
pub struct DeviceDescriptionBuilder {
    name: Option<String>,
    vendor: Option<String>,
    platform_version: Option<String>,
    device_ordinal: usize,
    core_count: Option<usize>,
    clock_rate_ghz: Option<f32>,
    device_memory_size: u64,
    memory_alignment: u64,
}

impl DeviceDescriptionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    pub fn with_platform_version(mut self, version: impl Into<String>) -> Self {
        self.platform_version = Some(version.into());
        self
    }

    pub fn with_device_ordinal(mut self, ordinal: usize) -> Self {
        self.device_ordinal = ordinal;
        self
    }

    pub fn with_core_count(mut self, cores: usize) -> Self {
        self.core_count = Some(cores);
        self
    }

    pub fn with_clock_rate_ghz(mut self, ghz: Option<f32>) -> Self {
        self.clock_rate_ghz = ghz;
        self
    }

    pub fn with_device_memory_size(mut self, bytes: u64) -> Self {
        self.device_memory_size = bytes;
        self
    }

    pub fn with_memory_alignment(mut self, alignment: u64) -> Self {
        self.memory_alignment = alignment;
        self
    }

    pub fn build(self) -> DeviceDescription {
        DeviceDescription {
            name: self.name.unwrap_or_else(|| "<undefined>".to_string()),
            vendor: self.vendor.unwrap_or_else(|| "<undefined>".to_string()),
            platform_version: self.platform_version.unwrap_or_else(|| "<undefined>".to_string()),
            device_ordinal: self.device_ordinal,
            core_count: self.core_count.unwrap_or(1),
            clock_rate_ghz: self.clock_rate_ghz,
            device_memory_size: self.device_memory_size,
            memory_alignment: self.memory_alignment,
        }
    }
}

/// Logical core count of the host
pub fn host_core_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Nominal CPU frequency in GHz as reported by the OS, when available.
pub fn nominal_cpu_frequency_ghz() -> Option<f32> {
    let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").ok()?;
    parse_cpu_mhz(&cpuinfo).map(|mhz| mhz / 1000.0)
}

fn parse_cpu_mhz(cpuinfo: &str) -> Option<f32> {
    cpuinfo
        .lines()
        .filter(|line| line.starts_with("cpu MHz"))
        .filter_map(|line| line.split(':').nth(1))
        .filter_map(|value| value.trim().parse::<f32>().ok())
        .find(|mhz| *mhz > 0.0)
}
