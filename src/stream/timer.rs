use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::Mutex;

/// Host timer backing context. Timestamps are captured on the stream worker.
#[derive(Debug, Default)]
pub struct HostTimer {
    marks: Mutex<Marks>,
}

#[derive(Debug, Default)]
struct Marks {
    start: Option<Instant>,
    stop: Option<Instant>,
}

impl HostTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn mark_start(&self) {
        let mut marks = self.marks.lock();
        marks.start = Some(Instant::now());
        marks.stop = None;
    }

    pub(crate) fn mark_stop(&self) {
        self.marks.lock().stop = Some(Instant::now());
    }

    /// Stop minus start, once both marks have executed in order
    pub fn elapsed(&self) -> Option<Duration> {
        let marks = self.marks.lock();
        match (marks.start, marks.stop) {
            (Some(start), Some(stop)) if stop >= start => Some(stop - start),
            _ => None,
        }
    }

    pub fn microseconds(&self) -> Option<u64> {
        self.elapsed().map(|d| d.as_micros() as u64)
    }

    pub fn nanoseconds(&self) -> Option<u64> {
        self.elapsed().map(|d| d.as_nanos() as u64)
    }
}

/// Caller-side timer handle bound to its host backing context
#[derive(Debug, Clone, Default)]
pub struct Timer {
    inner: Arc<HostTimer>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn backing(&self) -> Arc<HostTimer> {
        Arc::clone(&self.inner)
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.inner.elapsed()
    }

    pub fn microseconds(&self) -> Option<u64> {
        self.inner.microseconds()
    }

    pub fn nanoseconds(&self) -> Option<u64> {
        self.inner.nanoseconds()
    }
}
