use std::sync::Arc;

use crate::capability::{CapabilityKind, ProviderFactory, ProviderRegistry};
use crate::config::PluginConfig;
use crate::diagnostics::{DiagnosticsSink, TracingSink};
use crate::error::Result;

use super::host::HostExecutor;

/// Builder for constructing a HostExecutor instance
pub struct ExecutorBuilder {
    config: Option<PluginConfig>,
    sink: Option<Arc<dyn DiagnosticsSink>>,
    registry: ProviderRegistry,
}

impl ExecutorBuilder {
    /// Create a new builder with the host provider table
    pub fn new() -> Self {
        Self {
            config: None,
            sink: None,
            registry: ProviderRegistry::host(),
        }
    }

    /// Set the plugin configuration
    pub fn with_config(mut self, config: PluginConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Route advisory notices and warnings to `sink` instead of `tracing`
    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Register or replace the factory for the capability `factory` builds
    pub fn with_provider_factory(mut self, factory: ProviderFactory) -> Self {
        self.registry.register(factory);
        self
    }

    /// Drop the factory for one capability
    pub fn without_provider(mut self, kind: CapabilityKind) -> Self {
        self.registry.unregister(kind);
        self
    }

    /// Build the executor. Configuration errors are the only failure.
    pub fn build(self) -> Result<HostExecutor> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let sink = self.sink.unwrap_or_else(|| Arc::new(TracingSink));
        Ok(HostExecutor::new(Arc::new(config), sink, self.registry))
    }
}

impl Default for ExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
