use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::diagnostics::DiagnosticsSink;
use crate::error::{ExecutorError, Result, Status};
use super::StreamId;

/// A unit of queued work. Its status is captured, never propagated.
pub type Task = Box<dyn FnOnce() -> Status + Send + 'static>;

enum Work {
    Task(Task),
    /// Signals the waiter once everything ahead of it has run
    Marker(Sender<()>),
}

/// Single-worker FIFO execution context backing one stream
pub struct HostStream {
    id: StreamId,
    sender: RwLock<Option<Sender<Work>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_thread: ThreadId,
    shared: Arc<StreamShared>,
}

struct StreamShared {
    pending: AtomicUsize,
    stats: Mutex<StreamStats>,
    errors: Mutex<Vec<ExecutorError>>,
    sink: Arc<dyn DiagnosticsSink>,
}

/// Counters for work that passed through a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub enqueued: usize,
    pub completed: usize,
    pub failed: usize,
}

impl HostStream {
    /// Spawn the worker thread for `id`
    pub fn spawn(id: StreamId, thread_name: String, sink: Arc<dyn DiagnosticsSink>) -> Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Work>();
        let shared = Arc::new(StreamShared {
            pending: AtomicUsize::new(0),
            stats: Mutex::new(StreamStats::default()),
            errors: Mutex::new(Vec::new()),
            sink,
        });

        let worker = thread::Builder::new()
            .name(thread_name)
            .spawn({
                let shared = Arc::clone(&shared);
                move || Self::run_worker(id, receiver, shared)
            })
            .map_err(|e| ExecutorError::StreamError {
                stream_id: id,
                message: format!("Failed to spawn stream worker: {}", e),
            })?;

        Ok(Self {
            id,
            sender: RwLock::new(Some(sender)),
            worker_thread: worker.thread().id(),
            worker: Mutex::new(Some(worker)),
            shared,
        })
    }

    fn run_worker(id: StreamId, receiver: Receiver<Work>, shared: Arc<StreamShared>) {
        debug!(stream = %id, "Stream worker started");

        // Ends once the sender is dropped and the queue has drained.
        for work in receiver.iter() {
            let task = match work {
                Work::Task(task) => task,
                Work::Marker(done) => {
                    let _ = done.send(());
                    continue;
                }
            };

            let outcome = match panic::catch_unwind(AssertUnwindSafe(task)) {
                Ok(status) => status,
                Err(payload) => Err(ExecutorError::CallbackError {
                    message: format!("queued work panicked: {}", panic_message(&*payload)),
                }),
            };

            {
                let mut stats = shared.stats.lock();
                stats.completed += 1;
                if outcome.is_err() {
                    stats.failed += 1;
                }
            }

            if let Err(e) = outcome {
                shared
                    .sink
                    .warning(&format!("Stream {}: queued work failed: {}", id, e));
                shared.errors.lock().push(e);
            }

            shared.pending.fetch_sub(1, Ordering::SeqCst);
        }

        debug!(stream = %id, "Stream worker stopped");
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Append work. Thread-safe; fails once the stream is shut down.
    pub fn enqueue(&self, task: Task) -> Status {
        let sender = self.sender.read();
        let sender = sender.as_ref().ok_or_else(|| self.shut_down_error())?;

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        self.shared.stats.lock().enqueued += 1;
        if sender.send(Work::Task(task)).is_err() {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            self.shared.stats.lock().enqueued -= 1;
            return Err(ExecutorError::StreamError {
                stream_id: self.id,
                message: "stream worker is no longer running".to_string(),
            });
        }
        Ok(())
    }

    /// Block the calling thread until everything enqueued so far has run.
    pub fn block_until_done(&self) -> Status {
        if thread::current().id() == self.worker_thread {
            return Err(ExecutorError::StreamError {
                stream_id: self.id,
                message: "cannot wait on a stream from its own worker".to_string(),
            });
        }

        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        {
            let sender = self.sender.read();
            let sender = sender.as_ref().ok_or_else(|| self.shut_down_error())?;
            sender
                .send(Work::Marker(done_tx))
                .map_err(|_| self.shut_down_error())?;
        }

        done_rx.recv().map_err(|_| ExecutorError::StreamError {
            stream_id: self.id,
            message: "stream worker exited before draining".to_string(),
        })
    }

    fn shut_down_error(&self) -> ExecutorError {
        ExecutorError::StreamError {
            stream_id: self.id,
            message: "stream has been shut down".to_string(),
        }
    }

    /// Number of enqueued tasks that have not finished yet
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.sender.read().is_some()
    }

    pub fn stats(&self) -> StreamStats {
        *self.shared.stats.lock()
    }

    /// Drain failures captured from queued work
    pub fn take_errors(&self) -> Vec<ExecutorError> {
        std::mem::take(&mut *self.shared.errors.lock())
    }

    /// Stop accepting work, let the worker drain, and join it.
    pub fn shutdown(&self) {
        let sender = self.sender.write().take();
        drop(sender);

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if thread::current().id() == self.worker_thread {
                // Joining ourselves would deadlock; the worker exits after
                // this task returns.
                return;
            }
            if worker.join().is_err() {
                self.shared
                    .sink
                    .warning(&format!("Stream {}: worker thread panicked", self.id));
            }
        }
    }
}

impl Drop for HostStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
