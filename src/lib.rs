//! Device Executor - backend abstraction for stream-ordered device work
//!
//! This crate defines the contract a device backend implements to plug into
//! a stream-based execution layer: memory allocation, ordered asynchronous
//! copies and fills, stream dependencies, host callbacks, timers and optional
//! math-library providers. [`HostExecutor`] implements the contract on the
//! host CPU, with a simulated device address space and one worker thread per
//! stream.

use std::fmt;

// Public modules
pub mod capability;
pub mod config;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod stream;
pub mod utils;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const MIN_RUST_VERSION: &str = "1.70.0";

// Re-exports for public API
pub use capability::{CapabilityKind, ProviderRegistry};
pub use config::PluginConfig;
pub use device::{DeviceDescription, DeviceMemoryBase, HostMemory, MemoryUsage};
pub use diagnostics::{DiagnosticsSink, RecordingSink, TracingSink};
pub use error::{ExecutorError, Result, Status};
pub use executor::{ExecutorBuilder, HostExecutor, StreamExecutor};
pub use stream::{Event, EventStatus, Stream, Timer};
pub use utils::{setup_logging, LogConfig};

/// Feature detection for supported backends
pub struct Features {
    /// Whether the host backend is compiled in
    pub host: bool,
    /// Worker threads the host can run in parallel
    pub host_threads: usize,
    /// Devices exposed by the host platform
    pub host_devices: usize,
}

impl Features {
    /// Detect available features at runtime
    pub fn detect() -> Self {
        Self {
            host: cfg!(feature = "host"),
            host_threads: device::host_core_count(),
            host_devices: 1,
        }
    }
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Host backend: {}", if self.host { "yes" } else { "no" })?;
        if self.host {
            writeln!(f, "Host threads: {}", self.host_threads)?;
            writeln!(f, "Host devices: {}", self.host_devices)?;
        }
        Ok(())
    }
}
