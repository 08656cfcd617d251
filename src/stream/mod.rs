//! Stream, timer and event handles and their host backing contexts

mod event;
mod host_stream;
mod timer;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use serde::{Serialize, Deserialize};

pub use event::{Event, EventStatus};
pub use host_stream::{HostStream, StreamStats, Task};
pub use timer::{HostTimer, Timer};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(u64);

impl StreamId {
    pub(crate) fn next() -> Self {
        Self(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-side handle for an ordered queue of device work.
///
/// The handle carries no resources; an executor attaches a backing context to
/// it in `allocate_stream` and releases it in `deallocate_stream`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Stream {
    id: StreamId,
}

impl Stream {
    pub fn new() -> Self {
        Self { id: StreamId::next() }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}
