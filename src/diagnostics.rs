//! Diagnostics sink injected into executors at construction.
//!
//! The executor never logs through a global on its own behalf; advisory
//! notices (unsupported capabilities) and warnings (captured callback
//! failures, busy stream teardown) go through the sink it was built with.

use std::sync::Arc;
use parking_lot::Mutex;

/// Severity of a diagnostic message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Advisory,
    Warning,
}

pub trait DiagnosticsSink: Send + Sync {
    /// Informational notice, e.g. a capability this backend lacks
    fn advisory(&self, message: &str);

    /// Something went wrong but execution continues
    fn warning(&self, message: &str);
}

/// Forwards diagnostics to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn advisory(&self, message: &str) {
        tracing::info!(target: "device_executor", "{}", message);
    }

    fn warning(&self, message: &str) {
        tracing::warn!(target: "device_executor", "{}", message);
    }
}

/// Keeps every message in memory
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    messages: Arc<Mutex<Vec<(Severity, String)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(Severity, String)> {
        self.messages.lock().clone()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.messages.lock().iter().filter(|(s, _)| *s == severity).count()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages.lock().iter().any(|(_, m)| m.contains(needle))
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

impl DiagnosticsSink for RecordingSink {
    fn advisory(&self, message: &str) {
        self.messages.lock().push((Severity::Advisory, message.to_string()));
    }

    fn warning(&self, message: &str) {
        self.messages.lock().push((Severity::Warning, message.to_string()));
    }
}
