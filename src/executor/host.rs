use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::capability::{
    BlasSupport, CapabilityKind, DnnSupport, FftSupport, Provider, ProviderCache,
    ProviderRegistry, RngSupport,
};
use crate::config::PluginConfig;
use crate::device::{
    self, host_core_count, nominal_cpu_frequency_ghz, AllocationSnapshot, DeviceDescription,
    DeviceDescriptionBuilder, DeviceHeap, DeviceMemoryBase, HostMemory, MemoryUsage,
};
use crate::diagnostics::DiagnosticsSink;
use crate::error::{ExecutorError, Result, Status};
use crate::stream::{
    Event, EventStatus, HostStream, HostTimer, Stream, StreamId, StreamStats, Task, Timer,
};

use super::{
    BackingResource, BlockDim, DeviceOptions, ExecutorId, HostCallback, KernelSpec,
    ResourceKind, SharedMemoryConfig, StreamExecutor, ThreadDim,
};

const SHARED_MEMORY_UNSUPPORTED: &str =
    "Shared memory configuration is unsupported for host executors.";

/// Executor for a host-simulated device.
///
/// Device memory lives in a host-backed heap; every stream is served by its
/// own worker thread.
pub struct HostExecutor {
    id: ExecutorId,
    config: Arc<PluginConfig>,
    sink: Arc<dyn DiagnosticsSink>,
    heap: DeviceHeap,
    streams: DashMap<StreamId, Arc<HostStream>>,
    providers: ProviderCache,
    device_ordinal: AtomicUsize,
    initialized: AtomicBool,
}

impl HostExecutor {
    pub(crate) fn new(
        config: Arc<PluginConfig>,
        sink: Arc<dyn DiagnosticsSink>,
        registry: ProviderRegistry,
    ) -> Self {
        let id = ExecutorId::next();
        Self {
            id,
            heap: DeviceHeap::new(&config.memory),
            config,
            sink,
            streams: DashMap::new(),
            providers: ProviderCache::new(id, registry),
            device_ordinal: AtomicUsize::new(0),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Allocation statistics of the device heap
    pub fn allocation_snapshot(&self) -> AllocationSnapshot {
        self.heap.snapshot()
    }

    /// Size and age of a live top-level allocation. `None` for sub-buffers
    /// and released handles.
    pub fn allocation_info(&self, mem: &DeviceMemoryBase) -> Option<(u64, Duration)> {
        self.heap.allocation_info(mem)
    }

    /// Failures captured from queued work on `stream`, oldest first
    pub fn take_callback_errors(&self, stream: &Stream) -> Vec<ExecutorError> {
        self.streams
            .get(&stream.id())
            .map(|ctx| ctx.take_errors())
            .unwrap_or_default()
    }

    pub fn stream_stats(&self, stream: &Stream) -> Option<StreamStats> {
        self.streams.get(&stream.id()).map(|ctx| ctx.stats())
    }

    /// Number of streams with a live backing context
    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    fn spawn_stream_context(&self, id: StreamId) -> Result<HostStream> {
        let name = format!("{}-{}", self.config.streams.thread_name_prefix, id);
        HostStream::spawn(id, name, Arc::clone(&self.sink))
    }

    // Clone the context out so no map guard is held while enqueueing or waiting.
    fn stream_context(&self, stream: &Stream) -> Result<Arc<HostStream>> {
        self.streams
            .get(&stream.id())
            .map(|ctx| Arc::clone(ctx.value()))
            .ok_or_else(|| ExecutorError::StreamError {
                stream_id: stream.id(),
                message: "no backing context; the stream is not allocated".to_string(),
            })
    }

    /// Validate with `prepare`, then enqueue the task it returns.
    fn enqueue_checked<F>(&self, stream: &Stream, prepare: F) -> bool
    where
        F: FnOnce() -> Result<Task>,
    {
        let ctx = match self.stream_context(stream) {
            Ok(ctx) => ctx,
            Err(_) => return false,
        };
        match prepare() {
            Ok(task) => ctx.enqueue(task).is_ok(),
            Err(_) => false,
        }
    }

    fn fill_task(&self, location: &DeviceMemoryBase, pattern: u8, size: u64) -> Result<Task> {
        let dst = self.heap.resolve(location)?;
        let size = device::validate_fill(&dst, size)?;
        Ok(Box::new(move || {
            device::fill(&dst, pattern, size);
            Ok(())
        }))
    }

    fn provider(&self, kind: CapabilityKind) -> Option<Provider> {
        self.providers.get_or_construct(kind)
    }
}

impl StreamExecutor for HostExecutor {
    fn id(&self) -> ExecutorId {
        self.id
    }

    fn init(&self, device_ordinal: usize, _device_options: DeviceOptions) -> Status {
        self.device_ordinal.store(device_ordinal, Ordering::SeqCst);
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn device_ordinal(&self) -> usize {
        self.device_ordinal.load(Ordering::SeqCst)
    }

    fn get_kernel(&self, _spec: &KernelSpec) -> bool {
        false
    }

    fn launch(
        &self,
        _stream: &Stream,
        _thread_dims: ThreadDim,
        _block_dims: BlockDim,
        _kernel: &KernelSpec,
    ) -> bool {
        false
    }

    fn allocate(&self, size: u64) -> Option<DeviceMemoryBase> {
        if !self.is_initialized() {
            return None;
        }
        self.heap.allocate(size)
    }

    fn allocate_sub_buffer(
        &self,
        parent: &DeviceMemoryBase,
        offset_bytes: u64,
        size_bytes: u64,
    ) -> Option<DeviceMemoryBase> {
        if !self.is_initialized() {
            return None;
        }
        self.heap.allocate_sub_buffer(parent, offset_bytes, size_bytes)
    }

    fn deallocate(&self, mem: &DeviceMemoryBase) -> Status {
        self.heap.deallocate(mem)
    }

    fn host_memory_allocate(&self, size: u64) -> Option<HostMemory> {
        HostMemory::try_new(size)
    }

    fn host_memory_deallocate(&self, mem: HostMemory) {
        drop(mem);
    }

    fn host_memory_register(&self, _mem: &HostMemory) -> bool {
        true
    }

    fn host_memory_unregister(&self, _mem: &HostMemory) -> bool {
        true
    }

    fn memcpy_device_to_host(
        &self,
        stream: &Stream,
        host_dst: &HostMemory,
        gpu_src: &DeviceMemoryBase,
        size: u64,
    ) -> bool {
        self.enqueue_checked(stream, || {
            let src = self.heap.resolve(gpu_src)?;
            let size = device::validate_device_to_host(&src, host_dst.len(), size)?;
            let host_dst = host_dst.clone();
            Ok(Box::new(move || {
                device::copy_device_to_host(&mut host_dst.lock(), &src, size);
                Ok(())
            }))
        })
    }

    fn memcpy_host_to_device(
        &self,
        stream: &Stream,
        gpu_dst: &DeviceMemoryBase,
        host_src: &HostMemory,
        size: u64,
    ) -> bool {
        self.enqueue_checked(stream, || {
            let dst = self.heap.resolve(gpu_dst)?;
            let size = device::validate_host_to_device(&dst, host_src.len(), size)?;
            let host_src = host_src.clone();
            Ok(Box::new(move || {
                device::copy_host_to_device(&dst, &host_src.lock(), size);
                Ok(())
            }))
        })
    }

    fn memcpy_device_to_device(
        &self,
        stream: &Stream,
        gpu_dst: &DeviceMemoryBase,
        gpu_src: &DeviceMemoryBase,
        size: u64,
    ) -> bool {
        self.enqueue_checked(stream, || {
            let dst = self.heap.resolve(gpu_dst)?;
            let src = self.heap.resolve(gpu_src)?;
            let size = device::validate_device_to_device(&dst, &src, size)?;
            Ok(Box::new(move || {
                device::copy_device_to_device(&dst, &src, size);
                Ok(())
            }))
        })
    }

    fn mem_zero(&self, stream: &Stream, location: &DeviceMemoryBase, size: u64) -> bool {
        self.enqueue_checked(stream, || self.fill_task(location, 0, size))
    }

    fn memset(&self, stream: &Stream, location: &DeviceMemoryBase, pattern: u8, size: u64) -> bool {
        self.enqueue_checked(stream, || self.fill_task(location, pattern, size))
    }

    fn memset32(
        &self,
        stream: &Stream,
        location: &DeviceMemoryBase,
        pattern: u32,
        size: u64,
    ) -> bool {
        self.enqueue_checked(stream, || {
            let dst = self.heap.resolve(location)?;
            let size = device::validate_fill32(&dst, size)?;
            Ok(Box::new(move || {
                device::fill32(&dst, pattern, size);
                Ok(())
            }))
        })
    }

    fn synchronize_all_activity(&self) -> bool {
        let contexts: Vec<Arc<HostStream>> = self
            .streams
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        contexts
            .iter()
            .map(|ctx| ctx.block_until_done())
            .fold(true, |all_ok, status| all_ok && status.is_ok())
    }

    fn synchronous_mem_zero(&self, location: &DeviceMemoryBase, size: u64) -> Status {
        self.synchronous_memset(location, 0, size)
    }

    fn synchronous_memset(&self, location: &DeviceMemoryBase, value: u8, size: u64) -> Status {
        let dst = self.heap.resolve(location)?;
        let size = device::validate_fill(&dst, size)?;
        device::fill(&dst, value, size);
        Ok(())
    }

    fn synchronous_memset32(
        &self,
        location: &DeviceMemoryBase,
        pattern: u32,
        size: u64,
    ) -> Status {
        let dst = self.heap.resolve(location)?;
        let size = device::validate_fill32(&dst, size)?;
        device::fill32(&dst, pattern, size);
        Ok(())
    }

    fn synchronous_memcpy_host_to_device(
        &self,
        gpu_dst: &DeviceMemoryBase,
        host_src: &[u8],
        size: u64,
    ) -> Status {
        let dst = self.heap.resolve(gpu_dst)?;
        let size = device::validate_host_to_device(&dst, host_src.len(), size)?;
        device::copy_host_to_device(&dst, host_src, size);
        Ok(())
    }

    fn synchronous_memcpy_device_to_host(
        &self,
        host_dst: &mut [u8],
        gpu_src: &DeviceMemoryBase,
        size: u64,
    ) -> Status {
        let src = self.heap.resolve(gpu_src)?;
        let size = device::validate_device_to_host(&src, host_dst.len(), size)?;
        device::copy_device_to_host(host_dst, &src, size);
        Ok(())
    }

    fn synchronous_memcpy_device_to_device(
        &self,
        gpu_dst: &DeviceMemoryBase,
        gpu_src: &DeviceMemoryBase,
        size: u64,
    ) -> Status {
        let dst = self.heap.resolve(gpu_dst)?;
        let src = self.heap.resolve(gpu_src)?;
        let size = device::validate_device_to_device(&dst, &src, size)?;
        device::copy_device_to_device(&dst, &src, size);
        Ok(())
    }

    fn host_callback(&self, stream: &Stream, callback: HostCallback) -> bool {
        self.enqueue_checked(stream, || Ok(callback))
    }

    fn allocate_event(&self, _event: &Event) -> Status {
        Err(ExecutorError::unimplemented("AllocateEvent"))
    }

    fn deallocate_event(&self, _event: &Event) -> Status {
        Err(ExecutorError::unimplemented("DeallocateEvent"))
    }

    fn record_event(&self, _stream: &Stream, _event: &Event) -> Status {
        Err(ExecutorError::unimplemented("RecordEvent"))
    }

    fn wait_for_event(&self, _stream: &Stream, _event: &Event) -> Status {
        Err(ExecutorError::unimplemented("WaitForEvent"))
    }

    fn poll_for_event_status(&self, _event: &Event) -> EventStatus {
        EventStatus::Error
    }

    fn allocate_stream(&self, stream: &Stream) -> bool {
        if !self.is_initialized() {
            return false;
        }

        match self.streams.entry(stream.id()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => match self.spawn_stream_context(stream.id()) {
                Ok(ctx) => {
                    slot.insert(Arc::new(ctx));
                    true
                }
                Err(e) => {
                    self.sink.warning(&e.to_string());
                    false
                }
            },
        }
    }

    fn deallocate_stream(&self, stream: &Stream) {
        let Some((id, ctx)) = self.streams.remove(&stream.id()) else {
            return;
        };

        let pending = ctx.pending();
        if pending > 0 {
            self.sink.warning(&format!(
                "Stream {} deallocated with {} operations in flight; draining before teardown",
                id, pending
            ));
        }
        ctx.shutdown();
    }

    fn create_stream_dependency(&self, dependent: &Stream, other: &Stream) -> bool {
        let (dependent_ctx, other_ctx) =
            match (self.stream_context(dependent), self.stream_context(other)) {
                (Ok(d), Ok(o)) => (d, o),
                _ => return false,
            };

        if dependent_ctx.id() == other_ctx.id() {
            return true;
        }

        let (signal_tx, signal_rx) = crossbeam_channel::bounded::<()>(1);
        let signal: Task = Box::new(move || {
            let _ = signal_tx.send(());
            Ok(())
        });
        if other_ctx.enqueue(signal).is_err() {
            return false;
        }

        let other_id = other_ctx.id();
        let wait: Task = Box::new(move || {
            signal_rx.recv().map_err(|_| ExecutorError::StreamError {
                stream_id: other_id,
                message: "dependency was dropped before it signalled".to_string(),
            })
        });
        dependent_ctx.enqueue(wait).is_ok()
    }

    fn allocate_timer(&self, _timer: &Timer) -> bool {
        true
    }

    fn deallocate_timer(&self, _timer: &Timer) {}

    fn start_timer(&self, stream: &Stream, timer: &Timer) -> bool {
        let backing = timer.backing();
        self.enqueue_checked(stream, move || {
            Ok(Box::new(move || {
                backing.mark_start();
                Ok(())
            }))
        })
    }

    fn stop_timer(&self, stream: &Stream, timer: &Timer) -> bool {
        let backing = timer.backing();
        self.enqueue_checked(stream, move || {
            Ok(Box::new(move || {
                backing.mark_stop();
                Ok(())
            }))
        })
    }

    fn block_host_until_done(&self, stream: &Stream) -> Status {
        self.stream_context(stream)?.block_until_done()
    }

    fn platform_device_count(&self) -> usize {
        1
    }

    fn device_memory_usage(&self) -> Option<MemoryUsage> {
        Some(self.heap.usage())
    }

    fn populate_device_description(&self) -> DeviceDescription {
        let platform = &self.config.platform;
        DeviceDescriptionBuilder::new()
            .with_name(platform.name.clone())
            .with_vendor(platform.vendor.clone())
            .with_platform_version(platform.platform_version.clone())
            .with_device_ordinal(self.device_ordinal())
            .with_core_count(host_core_count())
            .with_clock_rate_ghz(platform.clock_rate_ghz.or_else(nominal_cpu_frequency_ghz))
            .with_device_memory_size(self.heap.capacity())
            .with_memory_alignment(self.heap.alignment())
            .build()
    }

    fn enable_peer_access_to(&self, _other: &dyn StreamExecutor) -> Status {
        Ok(())
    }

    fn can_enable_peer_access_to(&self, _other: &dyn StreamExecutor) -> bool {
        true
    }

    fn get_device_shared_memory_config(&self) -> SharedMemoryConfig {
        self.sink.advisory(SHARED_MEMORY_UNSUPPORTED);
        SharedMemoryConfig::Default
    }

    fn set_device_shared_memory_config(&self, _config: SharedMemoryConfig) -> Status {
        self.sink.advisory(SHARED_MEMORY_UNSUPPORTED);
        Err(ExecutorError::Unimplemented {
            operation: "SetDeviceSharedMemoryConfig",
            message: SHARED_MEMORY_UNSUPPORTED.to_string(),
        })
    }

    fn supports_blas(&self) -> bool {
        self.config.libraries.blas && self.providers.has_factory(CapabilityKind::Blas)
    }

    fn create_blas(&self) -> Option<Arc<dyn BlasSupport>> {
        if !self.supports_blas() {
            return None;
        }
        match self.provider(CapabilityKind::Blas)? {
            Provider::Blas(blas) => Some(blas),
            _ => None,
        }
    }

    fn supports_dnn(&self) -> bool {
        false
    }

    fn create_dnn(&self) -> Option<Arc<dyn DnnSupport>> {
        None
    }

    fn supports_fft(&self) -> bool {
        self.config.libraries.fft && self.providers.has_factory(CapabilityKind::Fft)
    }

    fn create_fft(&self) -> Option<Arc<dyn FftSupport>> {
        if !self.supports_fft() {
            return None;
        }
        match self.provider(CapabilityKind::Fft)? {
            Provider::Fft(fft) => Some(fft),
            _ => None,
        }
    }

    fn supports_rng(&self) -> bool {
        self.config.libraries.rng && self.providers.has_factory(CapabilityKind::Rng)
    }

    fn create_rng(&self) -> Option<Arc<dyn RngSupport>> {
        if !self.supports_rng() {
            return None;
        }
        match self.provider(CapabilityKind::Rng)? {
            Provider::Rng(rng) => Some(rng),
            _ => None,
        }
    }

    fn create_backing_resource(&self, kind: ResourceKind) -> Option<BackingResource> {
        match kind {
            ResourceKind::Stream => self
                .spawn_stream_context(StreamId::next())
                .ok()
                .map(BackingResource::Stream),
            ResourceKind::Timer => Some(BackingResource::Timer(Arc::new(HostTimer::new()))),
            ResourceKind::Event => {
                self.sink.warning("Events not currently supported by HostExecutor.");
                None
            }
            ResourceKind::Kernel => None,
        }
    }
}

impl Drop for HostExecutor {
    fn drop(&mut self) {
        for entry in self.streams.iter() {
            entry.value().shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityProvider, ProviderFactory};
    use crate::config::LibraryConfig;
    use crate::diagnostics::{RecordingSink, Severity};
    use crate::error::ErrorExt;
    use crate::executor::ExecutorBuilder;
    use pretty_assertions::assert_eq;
    use std::thread;
    use std::time::Duration;
    use parking_lot::Mutex;

    fn test_executor_with(config: PluginConfig) -> (HostExecutor, RecordingSink) {
        let sink = RecordingSink::new();
        let executor = ExecutorBuilder::new()
            .with_config(config)
            .with_diagnostics(Arc::new(sink.clone()))
            .build()
            .unwrap();
        executor.init(0, DeviceOptions::default()).unwrap();
        (executor, sink)
    }

    fn test_executor() -> (HostExecutor, RecordingSink) {
        test_executor_with(PluginConfig::default())
    }

    fn test_stream(executor: &HostExecutor) -> Stream {
        let stream = Stream::new();
        assert!(executor.allocate_stream(&stream));
        stream
    }

    fn read_back(executor: &HostExecutor, mem: &DeviceMemoryBase) -> Vec<u8> {
        let mut out = vec![0u8; mem.size() as usize];
        executor
            .synchronous_memcpy_device_to_host(&mut out, mem, mem.size())
            .unwrap();
        out
    }

    #[test]
    fn test_memset_then_copy_back() {
        let (executor, _) = test_executor();
        let stream = test_stream(&executor);
        let mem = executor.allocate(1024).unwrap();

        assert!(executor.memset(&stream, &mem, 0xAB, 1024));
        executor.block_host_until_done(&stream).unwrap();

        let mut host = vec![0u8; 1024];
        executor
            .synchronous_memcpy_device_to_host(&mut host, &mem, 1024)
            .unwrap();
        assert!(host.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_alloc_free_cycle() {
        let mut config = PluginConfig::default();
        config.memory.capacity_bytes = 4096;
        let (executor, _) = test_executor_with(config);

        for size in [4096u64, 1, 2048, 4096] {
            let mem = executor.allocate(size).unwrap();
            executor.deallocate(&mem).unwrap();
        }
        let mem = executor.allocate(4096).unwrap();
        assert!(executor.allocate(1).is_none());
        executor.deallocate(&mem).unwrap();
        assert!(executor.allocate(1).is_some());
    }

    #[test]
    fn test_concurrent_alloc_free() {
        let mut config = PluginConfig::default();
        config.memory.capacity_bytes = 64 * 1024;
        let (executor, _) = test_executor_with(config);

        thread::scope(|scope| {
            for worker in 0..8u64 {
                let executor = &executor;
                scope.spawn(move || {
                    for round in 0..500u64 {
                        let size = 64 + (worker * 97 + round * 31) % 4096;
                        let mem = executor.allocate(size).unwrap();
                        executor.synchronous_memset(&mem, worker as u8, size).unwrap();
                        executor.deallocate(&mem).unwrap();
                    }
                });
            }
        });

        let usage = executor.device_memory_usage().unwrap();
        assert_eq!(usage.free_bytes, usage.total_bytes);
        let snapshot = executor.allocation_snapshot();
        assert_eq!(snapshot.live_allocations, 0);
        assert_eq!(snapshot.current_bytes, 0);
        assert_eq!(snapshot.total_allocations, 8 * 500);
        assert_eq!(snapshot.failed_allocations, 0);
    }

    #[test]
    fn test_allocation_info() {
        let (executor, _) = test_executor();
        let mem = executor.allocate(300).unwrap();
        let sub = executor.allocate_sub_buffer(&mem, 0, 100).unwrap();

        let (size, _age) = executor.allocation_info(&mem).unwrap();
        assert_eq!(size, 300);
        assert!(executor.allocation_info(&sub).is_none());

        executor.deallocate(&mem).unwrap();
        assert!(executor.allocation_info(&mem).is_none());
    }

    #[test]
    fn test_requires_init() {
        let executor = ExecutorBuilder::new().build().unwrap();
        assert!(!executor.is_initialized());
        assert!(executor.allocate(64).is_none());
        assert!(!executor.allocate_stream(&Stream::new()));

        executor.init(0, DeviceOptions::default()).unwrap();
        executor.init(0, DeviceOptions::default()).unwrap();
        assert!(executor.allocate(64).is_some());
    }

    #[test]
    fn test_sub_buffer_isolation() {
        let (executor, _) = test_executor();
        let stream = test_stream(&executor);
        let parent = executor.allocate(64).unwrap();

        assert!(executor.allocate_sub_buffer(&parent, 48, 17).is_none());
        let sub = executor.allocate_sub_buffer(&parent, 16, 16).unwrap();

        assert!(executor.memset(&stream, &sub, 0xFF, 16));
        assert!(!executor.memset(&stream, &sub, 0xFF, 17));
        executor.block_host_until_done(&stream).unwrap();

        let bytes = read_back(&executor, &parent);
        assert!(bytes[..16].iter().all(|&b| b == 0));
        assert!(bytes[16..32].iter().all(|&b| b == 0xFF));
        assert!(bytes[32..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_deallocate_sub_buffer_is_rejected() {
        let (executor, _) = test_executor();
        let parent = executor.allocate(64).unwrap();
        let sub = executor.allocate_sub_buffer(&parent, 0, 32).unwrap();

        let status = executor.deallocate(&sub);
        assert!(matches!(status, Err(ExecutorError::InvalidArgument { .. })));

        executor.synchronous_memset(&parent, 7, 64).unwrap();
        assert_eq!(read_back(&executor, &parent), vec![7u8; 64]);
        executor.deallocate(&parent).unwrap();
    }

    #[test]
    fn test_memset32_rejects_bad_size_without_mutation() {
        let (executor, _) = test_executor();
        let stream = test_stream(&executor);
        let mem = executor.allocate(16).unwrap();

        assert!(!executor.memset32(&stream, &mem, 0xFFFF_FFFF, 6));
        let misaligned = executor.allocate_sub_buffer(&mem, 2, 8).unwrap();
        assert!(!executor.memset32(&stream, &misaligned, 0xFFFF_FFFF, 8));
        assert!(executor.synchronous_memset32(&mem, 1, 7).is_err());
        executor.block_host_until_done(&stream).unwrap();
        assert_eq!(read_back(&executor, &mem), vec![0u8; 16]);

        assert!(executor.memset32(&stream, &mem, 0x0102_0304, 16));
        executor.block_host_until_done(&stream).unwrap();
        assert_eq!(read_back(&executor, &mem)[..4], 0x0102_0304u32.to_ne_bytes());
    }

    #[test]
    fn test_queued_copies_in_order() {
        let (executor, _) = test_executor();
        let stream = test_stream(&executor);
        let mem = executor.allocate(256).unwrap();

        let first = HostMemory::from_vec(vec![0x11; 256]);
        let second = HostMemory::from_vec(vec![0x22; 256]);
        let out_a = HostMemory::new(256);
        let out_b = HostMemory::new(256);

        assert!(executor.memcpy_host_to_device(&stream, &mem, &first, 256));
        assert!(executor.memcpy_device_to_host(&stream, &out_a, &mem, 256));
        assert!(executor.memcpy_host_to_device(&stream, &mem, &second, 256));
        assert!(executor.memcpy_device_to_host(&stream, &out_b, &mem, 256));
        executor.block_host_until_done(&stream).unwrap();

        assert_eq!(out_a.to_vec(), vec![0x11; 256]);
        assert_eq!(out_b.to_vec(), vec![0x22; 256]);
    }

    #[test]
    fn test_copy_capacity_validation() {
        let (executor, _) = test_executor();
        let stream = test_stream(&executor);
        let small = executor.allocate(8).unwrap();
        let large = executor.allocate(32).unwrap();
        let host = HostMemory::new(4);

        assert!(!executor.memcpy_host_to_device(&stream, &small, &host, 8));
        assert!(!executor.memcpy_device_to_host(&stream, &host, &small, 8));
        assert!(!executor.memcpy_device_to_device(&stream, &small, &large, 32));
        assert!(executor.memcpy_device_to_device(&stream, &large, &small, 8));
        executor.block_host_until_done(&stream).unwrap();

        let mut out = [0u8; 4];
        assert!(executor.synchronous_memcpy_device_to_host(&mut out, &small, 8).is_err());
        assert!(executor
            .synchronous_memcpy_host_to_device(&small, &[1, 2, 3, 4], 8)
            .is_err());
    }

    #[test]
    fn test_device_to_device_overlap() {
        let (executor, _) = test_executor();
        let parent = executor.allocate(64).unwrap();
        let a = executor.allocate_sub_buffer(&parent, 0, 32).unwrap();
        let b = executor.allocate_sub_buffer(&parent, 16, 32).unwrap();
        let c = executor.allocate_sub_buffer(&parent, 32, 32).unwrap();

        executor.synchronous_memset(&a, 9, 32).unwrap();
        let status = executor.synchronous_memcpy_device_to_device(&b, &a, 32);
        assert!(matches!(status, Err(ExecutorError::InvalidArgument { .. })));

        executor.synchronous_memcpy_device_to_device(&c, &a, 32).unwrap();
        assert_eq!(read_back(&executor, &parent), vec![9u8; 64]);
    }

    #[test]
    fn test_fifo_with_concurrent_producers() {
        let (executor, _) = test_executor();
        let stream = test_stream(&executor);
        let log = Arc::new(Mutex::new(Vec::new()));

        thread::scope(|scope| {
            for producer in 0..4 {
                let executor = &executor;
                let stream = &stream;
                let log = Arc::clone(&log);
                scope.spawn(move || {
                    for seq in 0..50 {
                        let log = Arc::clone(&log);
                        assert!(executor.host_callback(
                            stream,
                            Box::new(move || {
                                log.lock().push((producer, seq));
                                Ok(())
                            })
                        ));
                    }
                });
            }
        });
        executor.block_host_until_done(&stream).unwrap();

        let log = log.lock();
        assert_eq!(log.len(), 200);
        for producer in 0..4 {
            let seqs: Vec<_> = log
                .iter()
                .filter(|(p, _)| *p == producer)
                .map(|(_, s)| *s)
                .collect();
            assert_eq!(seqs, (0..50).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_stream_dependency_barrier() {
        let (executor, _) = test_executor();
        let dependent = test_stream(&executor);
        let other = test_stream(&executor);
        let finished = Arc::new(AtomicBool::new(false));
        let observed = Arc::new(AtomicBool::new(false));

        {
            let finished = Arc::clone(&finished);
            assert!(executor.host_callback(
                &other,
                Box::new(move || {
                    thread::sleep(Duration::from_millis(50));
                    finished.store(true, Ordering::SeqCst);
                    Ok(())
                })
            ));
        }

        assert!(executor.create_stream_dependency(&dependent, &other));

        {
            let finished = Arc::clone(&finished);
            let observed = Arc::clone(&observed);
            assert!(executor.host_callback(
                &dependent,
                Box::new(move || {
                    observed.store(finished.load(Ordering::SeqCst), Ordering::SeqCst);
                    Ok(())
                })
            ));
        }

        executor.block_host_until_done(&dependent).unwrap();
        assert!(observed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_dependency_is_point_in_time() {
        let (executor, _) = test_executor();
        let dependent = test_stream(&executor);
        let other = test_stream(&executor);

        assert!(executor.create_stream_dependency(&dependent, &other));

        // Work added to `other` after the barrier must not hold up `dependent`.
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
        assert!(executor.host_callback(
            &other,
            Box::new(move || {
                let _ = release_rx.recv();
                Ok(())
            })
        ));
        assert!(executor.host_callback(&dependent, Box::new(|| Ok(()))));

        executor.block_host_until_done(&dependent).unwrap();
        release_tx.send(()).unwrap();
        executor.block_host_until_done(&other).unwrap();
    }

    #[test]
    fn test_dependency_requires_allocated_streams() {
        let (executor, _) = test_executor();
        let stream = test_stream(&executor);
        assert!(!executor.create_stream_dependency(&stream, &Stream::new()));
        assert!(executor.create_stream_dependency(&stream, &stream));
    }

    #[test]
    fn test_block_on_idle_and_unknown_streams() {
        let (executor, _) = test_executor();
        let stream = test_stream(&executor);
        assert!(executor.block_host_until_done(&stream).is_ok());

        let unknown = Stream::new();
        assert!(matches!(
            executor.block_host_until_done(&unknown),
            Err(ExecutorError::StreamError { .. })
        ));
        let mem = executor.allocate(8).unwrap();
        assert!(!executor.mem_zero(&unknown, &mem, 8));
    }

    #[test]
    fn test_stream_lifecycle() {
        let (executor, sink) = test_executor();
        let stream = Stream::new();

        assert!(executor.allocate_stream(&stream));
        assert!(!executor.allocate_stream(&stream));
        assert_eq!(executor.active_streams(), 1);

        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let ran = Arc::clone(&ran);
            assert!(executor.host_callback(
                &stream,
                Box::new(move || {
                    thread::sleep(Duration::from_millis(10));
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            ));
        }

        executor.deallocate_stream(&stream);
        assert_eq!(ran.load(Ordering::SeqCst), 5);
        assert_eq!(executor.active_streams(), 0);
        assert!(sink.contains("in flight"));
        assert!(!executor.host_callback(&stream, Box::new(|| Ok(()))));

        // A released handle can be bound again.
        assert!(executor.allocate_stream(&stream));
    }

    #[test]
    fn test_callback_failure_is_not_fatal() {
        let (executor, sink) = test_executor();
        let stream = test_stream(&executor);
        let mem = executor.allocate(4).unwrap();

        assert!(executor.host_callback(
            &stream,
            Box::new(|| Err(ExecutorError::CallbackError {
                message: "checksum mismatch".to_string()
            }))
        ));
        assert!(executor.memset(&stream, &mem, 3, 4));
        executor.block_host_until_done(&stream).unwrap();

        assert_eq!(read_back(&executor, &mem), vec![3u8; 4]);
        let errors = executor.take_callback_errors(&stream);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("checksum mismatch"));
        assert_eq!(sink.count(Severity::Warning), 1);
        assert_eq!(
            executor.stream_stats(&stream),
            Some(StreamStats {
                enqueued: 2,
                completed: 2,
                failed: 1
            })
        );
    }

    #[test]
    fn test_events_are_unimplemented() {
        let (executor, _) = test_executor();
        let stream = test_stream(&executor);
        let mem = executor.allocate(16).unwrap();
        executor.synchronous_memset(&mem, 5, 16).unwrap();
        let event = Event::new();

        assert!(executor.allocate_event(&event).is_unimplemented());
        assert!(executor.record_event(&stream, &event).is_unimplemented());
        assert!(executor.wait_for_event(&stream, &event).is_unimplemented());
        assert!(executor.deallocate_event(&event).is_unimplemented());
        assert_eq!(executor.poll_for_event_status(&event), EventStatus::Error);

        executor.block_host_until_done(&stream).unwrap();
        assert_eq!(read_back(&executor, &mem), vec![5u8; 16]);
    }

    #[test]
    fn test_timer_measures_queued_work() {
        let (executor, _) = test_executor();
        let stream = test_stream(&executor);
        let timer = Timer::new();

        assert!(executor.allocate_timer(&timer));
        assert!(executor.start_timer(&stream, &timer));
        assert!(executor.host_callback(
            &stream,
            Box::new(|| {
                thread::sleep(Duration::from_millis(5));
                Ok(())
            })
        ));
        assert!(executor.stop_timer(&stream, &timer));
        executor.block_host_until_done(&stream).unwrap();

        assert!(timer.elapsed().unwrap() >= Duration::from_millis(5));
        executor.deallocate_timer(&timer);
    }

    #[test]
    fn test_capability_queries() {
        let (executor, _) = test_executor();
        assert!(executor.supports_blas());
        let blas = executor.create_blas().unwrap();
        assert_eq!(blas.executor_id(), executor.id());
        assert!(Arc::ptr_eq(&blas, &executor.create_blas().unwrap()));

        assert!(executor.create_fft().is_some());
        assert!(executor.create_rng().is_some());
        assert!(!executor.supports_dnn());
        assert!(executor.create_dnn().is_none());

        let mut config = PluginConfig::default();
        config.libraries = LibraryConfig {
            blas: false,
            fft: false,
            rng: true,
        };
        let (executor, _) = test_executor_with(config);
        assert!(!executor.supports_blas());
        assert!(executor.create_blas().is_none());
        assert!(!executor.supports_fft());
        assert!(executor.create_fft().is_none());
        assert_eq!(executor.create_rng().unwrap().executor_id(), executor.id());
    }

    #[derive(Debug)]
    struct TunedBlas {
        executor_id: ExecutorId,
    }

    impl CapabilityProvider for TunedBlas {
        fn kind(&self) -> CapabilityKind {
            CapabilityKind::Blas
        }

        fn executor_id(&self) -> ExecutorId {
            self.executor_id
        }

        fn name(&self) -> &str {
            "tuned-blas"
        }
    }

    impl BlasSupport for TunedBlas {}

    fn assert_support_matches_creation(executor: &HostExecutor) {
        assert_eq!(executor.supports_blas(), executor.create_blas().is_some());
        assert_eq!(executor.supports_fft(), executor.create_fft().is_some());
        assert_eq!(executor.supports_rng(), executor.create_rng().is_some());
        assert_eq!(executor.supports_dnn(), executor.create_dnn().is_some());
    }

    #[test]
    fn test_custom_provider_table_keeps_support_consistent() {
        let executor = ExecutorBuilder::new()
            .with_provider_factory(ProviderFactory::Blas(Arc::new(
                |id: ExecutorId| -> Arc<dyn BlasSupport> { Arc::new(TunedBlas { executor_id: id }) },
            )))
            .without_provider(CapabilityKind::Fft)
            .build()
            .unwrap();
        executor.init(0, DeviceOptions::default()).unwrap();

        assert_support_matches_creation(&executor);
        let blas = executor.create_blas().unwrap();
        assert_eq!(blas.name(), "tuned-blas");
        assert_eq!(blas.executor_id(), executor.id());
        assert!(!executor.supports_fft());

        let mut config = PluginConfig::default();
        config.libraries.rng = false;
        let (executor, _) = test_executor_with(config);
        assert_support_matches_creation(&executor);
        assert!(!executor.supports_rng());
    }

    #[test]
    fn test_shared_memory_config_is_advisory() {
        let (executor, sink) = test_executor();
        assert_eq!(executor.get_device_shared_memory_config(), SharedMemoryConfig::Default);

        let status = executor.set_device_shared_memory_config(SharedMemoryConfig::EightByteBankSize);
        assert!(status.is_unimplemented());
        assert_eq!(sink.count(Severity::Advisory), 2);
        assert!(sink.contains("unsupported for host executors"));
    }

    #[test]
    fn test_device_description() {
        let mut config = PluginConfig::default();
        config.platform.name = "SimDevice".to_string();
        config.platform.clock_rate_ghz = Some(3.0);
        config.memory.capacity_bytes = 1 << 20;
        let (executor, _) = test_executor_with(config);

        let description = executor.populate_device_description();
        assert_eq!(description.name, "SimDevice");
        assert_eq!(description.vendor, "Host CPU");
        assert_eq!(description.clock_rate_ghz, Some(3.0));
        assert_eq!(description.device_memory_size, 1 << 20);
        assert_eq!(description.memory_alignment, 64);
        assert!(description.core_count >= 1);
        assert_eq!(executor.platform_device_count(), 1);
    }

    #[test]
    fn test_memory_usage_and_host_memory() {
        let mut config = PluginConfig::default();
        config.memory.capacity_bytes = 1000;
        let (executor, _) = test_executor_with(config);

        let mem = executor.allocate(600).unwrap();
        assert_eq!(
            executor.device_memory_usage(),
            Some(MemoryUsage {
                free_bytes: 400,
                total_bytes: 1000
            })
        );
        assert_eq!(executor.allocation_snapshot().live_allocations, 1);
        executor.deallocate(&mem).unwrap();

        let staging = executor.host_memory_allocate(128).unwrap();
        assert_eq!(staging.len(), 128);
        assert!(executor.host_memory_register(&staging));
        assert!(executor.host_memory_unregister(&staging));
        executor.host_memory_deallocate(staging);
    }

    #[test]
    fn test_peer_access_and_kernels() {
        let (first, _) = test_executor();
        let (second, _) = test_executor();
        assert_ne!(first.id(), second.id());
        assert!(first.can_enable_peer_access_to(&second));
        assert!(first.enable_peer_access_to(&second).is_ok());

        let stream = test_stream(&first);
        let spec = KernelSpec {
            name: "saxpy".to_string(),
            arity: 3,
        };
        assert!(!first.get_kernel(&spec));
        assert!(!first.launch(&stream, ThreadDim::default(), BlockDim::default(), &spec));
    }

    #[test]
    fn test_synchronize_all_activity() {
        let (executor, _) = test_executor();
        let streams: Vec<_> = (0..3).map(|_| test_stream(&executor)).collect();
        let count = Arc::new(AtomicUsize::new(0));

        for stream in &streams {
            let count = Arc::clone(&count);
            assert!(executor.host_callback(
                stream,
                Box::new(move || {
                    thread::sleep(Duration::from_millis(5));
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            ));
        }

        assert!(executor.synchronize_all_activity());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backing_resources() {
        let (executor, sink) = test_executor();

        match executor.create_backing_resource(ResourceKind::Stream) {
            Some(BackingResource::Stream(ctx)) => {
                assert!(ctx.is_running());
                ctx.block_until_done().unwrap();
            }
            _ => panic!("expected a stream context"),
        }
        assert_eq!(
            executor.create_backing_resource(ResourceKind::Timer).map(|r| r.kind()),
            Some(ResourceKind::Timer)
        );
        assert!(executor.create_backing_resource(ResourceKind::Event).is_none());
        assert!(executor.create_backing_resource(ResourceKind::Kernel).is_none());
        assert!(sink.contains("Events not currently supported"));
    }

    #[test]
    fn test_executor_as_trait_object() {
        let (executor, _) = test_executor();
        let executor: Box<dyn StreamExecutor> = Box::new(executor);
        let stream = Stream::new();
        assert!(executor.allocate_stream(&stream));

        let mem = executor.allocate(32).unwrap();
        assert!(executor.mem_zero(&stream, &mem, 32));
        assert!(executor.block_host_until_done(&stream).is_ok());
        executor.deallocate_stream(&stream);
        executor.deallocate(&mem).unwrap();
    }
}
