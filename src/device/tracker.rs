use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Tracks live device allocations for one executor
#[derive(Clone)]
pub struct AllocationTracker {
    stats: Arc<AllocationStats>,
    allocations: Arc<RwLock<HashMap<u64, AllocationInfo>>>,
}

struct AllocationStats {
    current_bytes: AtomicU64,
    peak_bytes: AtomicU64,
    total_allocations: AtomicUsize,
    failed_allocations: AtomicUsize,
}

#[derive(Debug, Clone)]
struct AllocationInfo {
    size: u64,
    timestamp: Instant,
}

/// Snapshot of allocation statistics
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationSnapshot {
    pub current_bytes: u64,
    pub peak_bytes: u64,
    pub live_allocations: usize,
    pub total_allocations: usize,
    pub failed_allocations: usize,
    pub largest_allocation: u64,
}

impl AllocationTracker {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(AllocationStats {
                current_bytes: AtomicU64::new(0),
                peak_bytes: AtomicU64::new(0),
                total_allocations: AtomicUsize::new(0),
                failed_allocations: AtomicUsize::new(0),
            }),
            allocations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record a successful allocation at `address`
    pub fn track_allocation(&self, address: u64, size: u64) {
        let current = self.stats.current_bytes.fetch_add(size, Ordering::SeqCst);
        self.stats.peak_bytes.fetch_max(current + size, Ordering::SeqCst);
        self.stats.total_allocations.fetch_add(1, Ordering::SeqCst);

        self.allocations.write().insert(address, AllocationInfo {
            size,
            timestamp: Instant::now(),
        });
    }

    pub fn track_failed_allocation(&self, size: u64, reason: &str) {
        self.stats.failed_allocations.fetch_add(1, Ordering::SeqCst);

        tracing::debug!(
            size_bytes = size,
            reason = reason,
            "Device allocation failed"
        );
    }

    /// Record a release. Returns false if `address` was not tracked.
    pub fn track_release(&self, address: u64) -> bool {
        match self.allocations.write().remove(&address) {
            Some(info) => {
                self.stats.current_bytes.fetch_sub(info.size, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn current_usage(&self) -> u64 {
        self.stats.current_bytes.load(Ordering::SeqCst)
    }

    pub fn peak_usage(&self) -> u64 {
        self.stats.peak_bytes.load(Ordering::SeqCst)
    }

    /// Size and age of a live allocation
    pub fn allocation_info(&self, address: u64) -> Option<(u64, Duration)> {
        self.allocations
            .read()
            .get(&address)
            .map(|info| (info.size, info.timestamp.elapsed()))
    }

    pub fn snapshot(&self) -> AllocationSnapshot {
        let allocations = self.allocations.read();
        let largest_allocation = allocations.values()
            .map(|info| info.size)
            .max()
            .unwrap_or(0);

        AllocationSnapshot {
            current_bytes: self.stats.current_bytes.load(Ordering::SeqCst),
            peak_bytes: self.stats.peak_bytes.load(Ordering::SeqCst),
            live_allocations: allocations.len(),
            total_allocations: self.stats.total_allocations.load(Ordering::SeqCst),
            failed_allocations: self.stats.failed_allocations.load(Ordering::SeqCst),
            largest_allocation,
        }
    }
}

impl Default for AllocationTracker {
    fn default() -> Self {
        Self::new()
    }
}
