use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// Result of polling an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Unknown,
    Error,
    Pending,
    Complete,
}

/// Cross-stream synchronization marker.
///
/// The host backend has no event support; the handle exists so callers can
/// hold one and receive `Unimplemented` from every operation on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Event {
    id: u64,
}

impl Event {
    pub fn new() -> Self {
        Self {
            id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}
