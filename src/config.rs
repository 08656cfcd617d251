use std::path::Path;
use serde::{Serialize, Deserialize};

use crate::error::{ExecutorError, Result};

/// Immutable configuration captured when an executor is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub platform: PlatformConfig,
    pub memory: MemoryConfig,
    pub libraries: LibraryConfig,
    pub streams: StreamConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Device name reported in the device description
    pub name: String,

    /// Vendor string reported in the device description
    pub vendor: String,

    /// Platform version string
    pub platform_version: String,

    /// Clock rate override in GHz; detected from the host when unset
    pub clock_rate_ghz: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Total simulated device memory in bytes
    pub capacity_bytes: u64,

    /// Alignment of every top-level allocation
    pub alignment: u64,
}

/// Which math-library providers this platform variant should expose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryConfig {
    pub blas: bool,
    pub fft: bool,
    pub rng: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Prefix for stream worker thread names
    pub thread_name_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Log level
    pub log_level: LogLevel,

    /// Whether to include source locations in log output
    pub source_location: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            platform: PlatformConfig::default(),
            memory: MemoryConfig::default(),
            libraries: LibraryConfig::default(),
            streams: StreamConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            name: "Host".to_string(),
            vendor: "Host CPU".to_string(),
            platform_version: "host-plugin-0.1".to_string(),
            clock_rate_ghz: None,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 4 * 1024 * 1024 * 1024, // 4GB
            alignment: 64,
        }
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            blas: true,
            fft: true,
            rng: true,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "host-stream".to_string(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            source_location: false,
        }
    }
}

impl PluginConfig {
    /// Parse a configuration from JSON. Missing sections take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ExecutorError::ConfigurationError {
            message: format!("Failed to parse configuration: {}", e),
            parameter: "config".to_string(),
        })
    }

    /// Load a configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ExecutorError::ConfigurationError {
            message: format!("Failed to read {}: {}", path.display(), e),
            parameter: "config".to_string(),
        })?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.platform.name.trim().is_empty() {
            return Err(ExecutorError::ConfigurationError {
                message: "Platform name cannot be empty".to_string(),
                parameter: "platform.name".to_string(),
            });
        }

        if let Some(ghz) = self.platform.clock_rate_ghz {
            if !(ghz.is_finite() && ghz > 0.0) {
                return Err(ExecutorError::ConfigurationError {
                    message: "Clock rate must be a positive number".to_string(),
                    parameter: "platform.clock_rate_ghz".to_string(),
                });
            }
        }

        if self.memory.capacity_bytes == 0 {
            return Err(ExecutorError::ConfigurationError {
                message: "Device memory capacity must be non-zero".to_string(),
                parameter: "memory.capacity_bytes".to_string(),
            });
        }

        // Word-wide fills rely on every block starting 4-byte aligned.
        if self.memory.alignment < 4 || !self.memory.alignment.is_power_of_two() {
            return Err(ExecutorError::ConfigurationError {
                message: format!(
                    "Alignment must be a power of two of at least 4, got {}",
                    self.memory.alignment
                ),
                parameter: "memory.alignment".to_string(),
            });
        }

        if self.streams.thread_name_prefix.is_empty() {
            return Err(ExecutorError::ConfigurationError {
                message: "Thread name prefix cannot be empty".to_string(),
                parameter: "streams.thread_name_prefix".to_string(),
            });
        }

        Ok(())
    }
}
