//! The device-executor interface and its host implementation

mod builder;
mod host;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub use builder::ExecutorBuilder;
pub use host::HostExecutor;

use crate::capability::{BlasSupport, DnnSupport, FftSupport, RngSupport};
use crate::device::{DeviceDescription, DeviceMemoryBase, HostMemory, MemoryUsage};
use crate::error::Status;
use crate::stream::{Event, EventStatus, HostStream, HostTimer, Stream, Timer};

static NEXT_EXECUTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of an executor instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutorId(u64);

impl ExecutorId {
    pub(crate) fn next() -> Self {
        Self(NEXT_EXECUTOR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ExecutorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "executor-{}", self.0)
    }
}

/// Per-device options passed to `init`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceOptions {
    pub flags: u32,
}

/// Shared-memory banking mode of GPU-style devices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SharedMemoryConfig {
    #[default]
    Default,
    FourByteBankSize,
    EightByteBankSize,
}

/// Launch geometry: threads per block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadDim {
    pub x: u64,
    pub y: u64,
    pub z: u64,
}

/// Launch geometry: blocks per grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDim {
    pub x: u64,
    pub y: u64,
    pub z: u64,
}

impl Default for ThreadDim {
    fn default() -> Self {
        Self { x: 1, y: 1, z: 1 }
    }
}

impl Default for BlockDim {
    fn default() -> Self {
        Self { x: 1, y: 1, z: 1 }
    }
}

/// Loader specification for a device kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSpec {
    pub name: String,
    pub arity: usize,
}

/// Kinds of backing context an executor can produce for a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Stream,
    Timer,
    Event,
    Kernel,
}

/// Owned backing context for a stream, timer, event or kernel handle
pub enum BackingResource {
    Stream(HostStream),
    Timer(Arc<HostTimer>),
}

impl BackingResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            BackingResource::Stream(_) => ResourceKind::Stream,
            BackingResource::Timer(_) => ResourceKind::Timer,
        }
    }
}

/// Host-side closure run in stream order
pub type HostCallback = Box<dyn FnOnce() -> Status + Send + 'static>;

/// Everything a backend must provide for the stream layer to drive it.
///
/// Queued operations return `true` once the work has been accepted onto the
/// stream, not once it has run; completion is observed through
/// `block_host_until_done`. Synchronous operations run on the calling thread
/// and report a `Status`.
pub trait StreamExecutor: Send + Sync {
    fn id(&self) -> ExecutorId;

    /// Bind to a device ordinal. Required before allocating memory or streams.
    fn init(&self, device_ordinal: usize, device_options: DeviceOptions) -> Status;

    fn device_ordinal(&self) -> usize;

    fn get_kernel(&self, spec: &KernelSpec) -> bool;

    fn launch(
        &self,
        stream: &Stream,
        thread_dims: ThreadDim,
        block_dims: BlockDim,
        kernel: &KernelSpec,
    ) -> bool;

    /// `None` on exhaustion
    fn allocate(&self, size: u64) -> Option<DeviceMemoryBase>;

    /// View of `size_bytes` at `offset_bytes` inside `parent`
    fn allocate_sub_buffer(
        &self,
        parent: &DeviceMemoryBase,
        offset_bytes: u64,
        size_bytes: u64,
    ) -> Option<DeviceMemoryBase>;

    /// Free a top-level allocation. Sub-buffer handles are rejected.
    fn deallocate(&self, mem: &DeviceMemoryBase) -> Status;

    fn host_memory_allocate(&self, size: u64) -> Option<HostMemory>;

    fn host_memory_deallocate(&self, mem: HostMemory);

    fn host_memory_register(&self, mem: &HostMemory) -> bool;

    fn host_memory_unregister(&self, mem: &HostMemory) -> bool;

    fn memcpy_device_to_host(
        &self,
        stream: &Stream,
        host_dst: &HostMemory,
        gpu_src: &DeviceMemoryBase,
        size: u64,
    ) -> bool;

    fn memcpy_host_to_device(
        &self,
        stream: &Stream,
        gpu_dst: &DeviceMemoryBase,
        host_src: &HostMemory,
        size: u64,
    ) -> bool;

    fn memcpy_device_to_device(
        &self,
        stream: &Stream,
        gpu_dst: &DeviceMemoryBase,
        gpu_src: &DeviceMemoryBase,
        size: u64,
    ) -> bool;

    fn mem_zero(&self, stream: &Stream, location: &DeviceMemoryBase, size: u64) -> bool;

    fn memset(&self, stream: &Stream, location: &DeviceMemoryBase, pattern: u8, size: u64) -> bool;

    /// `size` and the destination address must both be multiples of 4
    fn memset32(&self, stream: &Stream, location: &DeviceMemoryBase, pattern: u32, size: u64)
        -> bool;

    fn synchronize_all_activity(&self) -> bool;

    fn synchronous_mem_zero(&self, location: &DeviceMemoryBase, size: u64) -> Status;

    fn synchronous_memset(&self, location: &DeviceMemoryBase, value: u8, size: u64) -> Status;

    fn synchronous_memset32(&self, location: &DeviceMemoryBase, pattern: u32, size: u64)
        -> Status;

    fn synchronous_memcpy_host_to_device(
        &self,
        gpu_dst: &DeviceMemoryBase,
        host_src: &[u8],
        size: u64,
    ) -> Status;

    fn synchronous_memcpy_device_to_host(
        &self,
        host_dst: &mut [u8],
        gpu_src: &DeviceMemoryBase,
        size: u64,
    ) -> Status;

    fn synchronous_memcpy_device_to_device(
        &self,
        gpu_dst: &DeviceMemoryBase,
        gpu_src: &DeviceMemoryBase,
        size: u64,
    ) -> Status;

    /// Run `callback` in stream order. Its failure is recorded, not fatal.
    fn host_callback(&self, stream: &Stream, callback: HostCallback) -> bool;

    fn allocate_event(&self, event: &Event) -> Status;

    fn deallocate_event(&self, event: &Event) -> Status;

    fn record_event(&self, stream: &Stream, event: &Event) -> Status;

    fn wait_for_event(&self, stream: &Stream, event: &Event) -> Status;

    fn poll_for_event_status(&self, event: &Event) -> EventStatus;

    fn allocate_stream(&self, stream: &Stream) -> bool;

    fn deallocate_stream(&self, stream: &Stream);

    /// Future work on `dependent` waits for work currently queued on `other`
    fn create_stream_dependency(&self, dependent: &Stream, other: &Stream) -> bool;

    fn allocate_timer(&self, timer: &Timer) -> bool;

    fn deallocate_timer(&self, timer: &Timer);

    fn start_timer(&self, stream: &Stream, timer: &Timer) -> bool;

    fn stop_timer(&self, stream: &Stream, timer: &Timer) -> bool;

    fn block_host_until_done(&self, stream: &Stream) -> Status;

    fn platform_device_count(&self) -> usize;

    fn device_memory_usage(&self) -> Option<MemoryUsage>;

    fn populate_device_description(&self) -> DeviceDescription;

    fn enable_peer_access_to(&self, other: &dyn StreamExecutor) -> Status;

    fn can_enable_peer_access_to(&self, other: &dyn StreamExecutor) -> bool;

    fn get_device_shared_memory_config(&self) -> SharedMemoryConfig;

    fn set_device_shared_memory_config(&self, config: SharedMemoryConfig) -> Status;

    fn supports_blas(&self) -> bool;

    fn create_blas(&self) -> Option<Arc<dyn BlasSupport>>;

    fn supports_dnn(&self) -> bool;

    fn create_dnn(&self) -> Option<Arc<dyn DnnSupport>>;

    fn supports_fft(&self) -> bool;

    fn create_fft(&self) -> Option<Arc<dyn FftSupport>>;

    fn supports_rng(&self) -> bool;

    fn create_rng(&self) -> Option<Arc<dyn RngSupport>>;

    /// Build the backing context for a handle of `kind`, if this backend has one
    fn create_backing_resource(&self, kind: ResourceKind) -> Option<BackingResource>;
}
