//! Device memory handles, the simulated device heap, and device descriptions

mod description;
mod memory;
mod tracker;

pub use description::{
    host_core_count, nominal_cpu_frequency_ghz, DeviceDescription, DeviceDescriptionBuilder,
};
pub use memory::{DeviceMemoryBase, HostMemory, MemoryUsage};
pub use tracker::{AllocationSnapshot, AllocationTracker};

pub(crate) use memory::{
    copy_device_to_device, copy_device_to_host, copy_host_to_device, fill, fill32,
    validate_device_to_device, validate_device_to_host, validate_fill, validate_fill32,
    validate_host_to_device, DeviceHeap, Region,
};
