use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use parking_lot::{Mutex, MutexGuard};

use crate::config::MemoryConfig;
use crate::error::{ExecutorError, Result, Status};
use super::tracker::{AllocationSnapshot, AllocationTracker};

/// Opaque handle to a range of device memory.
///
/// Handles are plain values: copying one does not extend the lifetime of the
/// memory it names, and freeing is the caller's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceMemoryBase {
    address: u64,
    size: u64,
    sub_buffer: bool,
}

impl DeviceMemoryBase {
    /// Wrap a raw device address. The executor validates it on use.
    pub fn from_raw(address: u64, size: u64) -> Self {
        Self {
            address,
            size,
            sub_buffer: false,
        }
    }

    /// The empty handle
    pub fn null() -> Self {
        Self::from_raw(0, 0)
    }

    pub fn is_null(&self) -> bool {
        self.address == 0
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether this handle is a view produced by `allocate_sub_buffer`
    pub fn is_sub_buffer(&self) -> bool {
        self.sub_buffer
    }
}

impl Default for DeviceMemoryBase {
    fn default() -> Self {
        Self::null()
    }
}

/// Host-side staging buffer shared between the caller and queued work.
#[derive(Clone)]
pub struct HostMemory {
    bytes: Arc<Mutex<Box<[u8]>>>,
}

impl HostMemory {
    /// Zero-filled buffer of `size` bytes
    pub fn new(size: usize) -> Self {
        Self::from_vec(vec![0; size])
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(bytes.into_boxed_slice())),
        }
    }

    pub(crate) fn try_new(size: u64) -> Option<Self> {
        let size = usize::try_from(size).ok()?;
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(size).ok()?;
        bytes.resize(size, 0);
        Some(Self::from_vec(bytes))
    }

    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lock the buffer. Do not hold the guard across `block_host_until_done`
    /// on a stream that copies into this buffer.
    pub fn lock(&self) -> MutexGuard<'_, Box<[u8]>> {
        self.bytes.lock()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.lock().to_vec()
    }
}

impl fmt::Debug for HostMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostMemory").field("len", &self.len()).finish()
    }
}

/// Backing storage for one top-level allocation
struct Block {
    base: u64,
    len: u64,
    bytes: Mutex<Box<[u8]>>,
}

/// A validated byte range inside a live block.
#[derive(Clone)]
pub(crate) struct Region {
    block: Arc<Block>,
    offset: usize,
    len: usize,
    address: u64,
}

impl Region {
    pub(crate) fn address(&self) -> u64 {
        self.address
    }

    fn check_size(&self, parameter: &'static str, size: u64) -> Result<usize> {
        match usize::try_from(size) {
            Ok(size) if size <= self.len => Ok(size),
            _ => Err(ExecutorError::invalid_argument(
                parameter,
                format!(
                    "{} bytes requested but the region at {:#x} holds {}",
                    size, self.address, self.len
                ),
            )),
        }
    }

    fn same_block(&self, other: &Region) -> bool {
        Arc::ptr_eq(&self.block, &other.block)
    }
}

fn check_host(parameter: &'static str, size: usize, available: usize) -> Status {
    if size > available {
        return Err(ExecutorError::invalid_argument(
            parameter,
            format!("{} bytes requested but the host buffer holds {}", size, available),
        ));
    }
    Ok(())
}

/// Validation for a host-to-device copy of `size` bytes
pub(crate) fn validate_host_to_device(dst: &Region, host_len: usize, size: u64) -> Result<usize> {
    let size = dst.check_size("gpu_dst", size)?;
    check_host("host_src", size, host_len)?;
    Ok(size)
}

/// Validation for a device-to-host copy of `size` bytes
pub(crate) fn validate_device_to_host(src: &Region, host_len: usize, size: u64) -> Result<usize> {
    let size = src.check_size("gpu_src", size)?;
    check_host("host_dst", size, host_len)?;
    Ok(size)
}

pub(crate) fn validate_device_to_device(dst: &Region, src: &Region, size: u64) -> Result<usize> {
    let size = dst.check_size("gpu_dst", size)?;
    src.check_size("gpu_src", size as u64)?;
    if size > 0 && dst.same_block(src) {
        let dst_range = dst.offset..dst.offset + size;
        let src_range = src.offset..src.offset + size;
        if dst_range.start < src_range.end && src_range.start < dst_range.end {
            return Err(ExecutorError::invalid_argument(
                "gpu_dst",
                format!(
                    "device-to-device copy of {} bytes overlaps within the block at {:#x}",
                    size, dst.block.base
                ),
            ));
        }
    }
    Ok(size)
}

/// Validation for a 32-bit pattern fill
pub(crate) fn validate_fill32(dst: &Region, size: u64) -> Result<usize> {
    if size % 4 != 0 {
        return Err(ExecutorError::invalid_argument(
            "size",
            format!("{} is not a multiple of 4", size),
        ));
    }
    if dst.address % 4 != 0 {
        return Err(ExecutorError::invalid_argument(
            "location",
            format!("address {:#x} is not 4-byte aligned", dst.address),
        ));
    }
    dst.check_size("location", size)
}

pub(crate) fn validate_fill(dst: &Region, size: u64) -> Result<usize> {
    dst.check_size("location", size)
}

pub(crate) fn copy_host_to_device(dst: &Region, src: &[u8], size: usize) {
    let mut bytes = dst.block.bytes.lock();
    bytes[dst.offset..dst.offset + size].copy_from_slice(&src[..size]);
}

pub(crate) fn copy_device_to_host(dst: &mut [u8], src: &Region, size: usize) {
    let bytes = src.block.bytes.lock();
    dst[..size].copy_from_slice(&bytes[src.offset..src.offset + size]);
}

pub(crate) fn copy_device_to_device(dst: &Region, src: &Region, size: usize) {
    if dst.same_block(src) {
        let mut bytes = dst.block.bytes.lock();
        bytes.copy_within(src.offset..src.offset + size, dst.offset);
        return;
    }

    // Lock in address order so concurrent copies between the same pair of
    // blocks cannot deadlock.
    let mut dst_bytes;
    let src_bytes;
    if dst.block.base < src.block.base {
        dst_bytes = dst.block.bytes.lock();
        src_bytes = src.block.bytes.lock();
    } else {
        src_bytes = src.block.bytes.lock();
        dst_bytes = dst.block.bytes.lock();
    }
    dst_bytes[dst.offset..dst.offset + size]
        .copy_from_slice(&src_bytes[src.offset..src.offset + size]);
}

pub(crate) fn fill(dst: &Region, pattern: u8, size: usize) {
    let mut bytes = dst.block.bytes.lock();
    bytes[dst.offset..dst.offset + size].fill(pattern);
}

pub(crate) fn fill32(dst: &Region, pattern: u32, size: usize) {
    let word = pattern.to_ne_bytes();
    let mut bytes = dst.block.bytes.lock();
    for chunk in bytes[dst.offset..dst.offset + size].chunks_exact_mut(4) {
        chunk.copy_from_slice(&word);
    }
}

/// Free/total view of device memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub free_bytes: u64,
    pub total_bytes: u64,
}

struct HeapState {
    blocks: BTreeMap<u64, Arc<Block>>,
    next_address: u64,
    reserved_bytes: u64,
}

/// Simulated device address space backed by host memory.
pub(crate) struct DeviceHeap {
    capacity: u64,
    alignment: u64,
    state: Mutex<HeapState>,
    tracker: AllocationTracker,
}

impl DeviceHeap {
    pub(crate) fn new(config: &MemoryConfig) -> Self {
        Self {
            capacity: config.capacity_bytes,
            alignment: config.alignment,
            state: Mutex::new(HeapState {
                blocks: BTreeMap::new(),
                // Address 0 is the null handle
                next_address: config.alignment,
                reserved_bytes: 0,
            }),
            tracker: AllocationTracker::new(),
        }
    }

    pub(crate) fn allocate(&self, size: u64) -> Option<DeviceMemoryBase> {
        if size == 0 {
            self.tracker.track_failed_allocation(size, "zero-sized request");
            return None;
        }

        let address = {
            let mut state = self.state.lock();
            let available = self.capacity - state.reserved_bytes;
            if size > available {
                drop(state);
                let error = ExecutorError::OutOfMemory {
                    requested: size,
                    available,
                };
                self.tracker.track_failed_allocation(size, &error.to_string());
                return None;
            }
            let stride = size.checked_add(self.alignment - 1)? & !(self.alignment - 1);
            let address = state.next_address;
            state.next_address = address.checked_add(stride)?;
            state.reserved_bytes += size;
            address
        };

        let bytes = match usize::try_from(size).ok().and_then(|size| {
            let mut bytes = Vec::new();
            bytes.try_reserve_exact(size).ok()?;
            bytes.resize(size, 0);
            Some(bytes)
        }) {
            Some(bytes) => bytes,
            None => {
                self.state.lock().reserved_bytes -= size;
                let error = ExecutorError::internal("host allocation failed");
                self.tracker.track_failed_allocation(size, &error.to_string());
                return None;
            }
        };

        let block = Arc::new(Block {
            base: address,
            len: size,
            bytes: Mutex::new(bytes.into_boxed_slice()),
        });
        self.state.lock().blocks.insert(address, block);
        self.tracker.track_allocation(address, size);

        Some(DeviceMemoryBase::from_raw(address, size))
    }

    pub(crate) fn allocate_sub_buffer(
        &self,
        parent: &DeviceMemoryBase,
        offset_bytes: u64,
        size_bytes: u64,
    ) -> Option<DeviceMemoryBase> {
        let end = offset_bytes.checked_add(size_bytes)?;
        if end > parent.size {
            return None;
        }
        self.resolve(parent).ok()?;

        Some(DeviceMemoryBase {
            address: parent.address + offset_bytes,
            size: size_bytes,
            sub_buffer: true,
        })
    }

    pub(crate) fn deallocate(&self, mem: &DeviceMemoryBase) -> Status {
        if mem.is_sub_buffer() {
            return Err(ExecutorError::invalid_argument(
                "mem",
                format!(
                    "{:#x} is a sub-buffer; deallocate its parent allocation instead",
                    mem.address
                ),
            ));
        }

        let mut state = self.state.lock();
        let matches = state
            .blocks
            .get(&mem.address)
            .map(|block| block.len == mem.size)
            .unwrap_or(false);
        if !matches {
            return Err(ExecutorError::invalid_argument(
                "mem",
                format!("{:#x} ({} bytes) is not a live allocation", mem.address, mem.size),
            ));
        }

        state.blocks.remove(&mem.address);
        state.reserved_bytes -= mem.size;
        drop(state);
        self.tracker.track_release(mem.address);
        Ok(())
    }

    /// Map a handle onto the live block that contains it.
    pub(crate) fn resolve(&self, mem: &DeviceMemoryBase) -> Result<Region> {
        if mem.is_null() {
            return Err(ExecutorError::invalid_argument("mem", "null device memory handle"));
        }

        let state = self.state.lock();
        let block = state
            .blocks
            .range(..=mem.address)
            .next_back()
            .map(|(_, block)| Arc::clone(block))
            .filter(|block| {
                mem.address
                    .checked_add(mem.size)
                    .map(|end| end <= block.base + block.len)
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                ExecutorError::invalid_argument(
                    "mem",
                    format!(
                        "{:#x} ({} bytes) does not lie inside a live allocation",
                        mem.address, mem.size
                    ),
                )
            })?;

        Ok(Region {
            offset: (mem.address - block.base) as usize,
            len: mem.size as usize,
            address: mem.address,
            block,
        })
    }

    pub(crate) fn usage(&self) -> MemoryUsage {
        let reserved = self.state.lock().reserved_bytes;
        MemoryUsage {
            free_bytes: self.capacity - reserved,
            total_bytes: self.capacity,
        }
    }

    pub(crate) fn capacity(&self) -> u64 {
        self.capacity
    }

    pub(crate) fn alignment(&self) -> u64 {
        self.alignment
    }

    pub(crate) fn snapshot(&self) -> AllocationSnapshot {
        self.tracker.snapshot()
    }

    /// Size and age of the top-level allocation `mem` refers to
    pub(crate) fn allocation_info(&self, mem: &DeviceMemoryBase) -> Option<(u64, Duration)> {
        if mem.sub_buffer {
            return None;
        }
        self.tracker.allocation_info(mem.address)
    }
}
