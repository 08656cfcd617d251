//! Optional math-library providers and the factory table that builds them.
//!
//! The executor decides whether a provider exists and constructs it; what a
//! provider computes is the provider's business.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use parking_lot::Mutex;

use crate::executor::ExecutorId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    Blas,
    Fft,
    Rng,
    Dnn,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CapabilityKind::Blas => "BLAS",
            CapabilityKind::Fft => "FFT",
            CapabilityKind::Rng => "RNG",
            CapabilityKind::Dnn => "DNN",
        };
        f.write_str(name)
    }
}

/// Common surface of every provider: what it is and which executor owns it.
pub trait CapabilityProvider: fmt::Debug + Send + Sync {
    fn kind(&self) -> CapabilityKind;
    fn executor_id(&self) -> ExecutorId;
    fn name(&self) -> &str;
}

pub trait BlasSupport: CapabilityProvider {}
pub trait FftSupport: CapabilityProvider {}
pub trait RngSupport: CapabilityProvider {}
pub trait DnnSupport: CapabilityProvider {}

/// A constructed provider of any kind
#[derive(Debug, Clone)]
pub enum Provider {
    Blas(Arc<dyn BlasSupport>),
    Fft(Arc<dyn FftSupport>),
    Rng(Arc<dyn RngSupport>),
    Dnn(Arc<dyn DnnSupport>),
}

impl Provider {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Provider::Blas(_) => CapabilityKind::Blas,
            Provider::Fft(_) => CapabilityKind::Fft,
            Provider::Rng(_) => CapabilityKind::Rng,
            Provider::Dnn(_) => CapabilityKind::Dnn,
        }
    }
}

pub type BlasFactory = Arc<dyn Fn(ExecutorId) -> Arc<dyn BlasSupport> + Send + Sync>;
pub type FftFactory = Arc<dyn Fn(ExecutorId) -> Arc<dyn FftSupport> + Send + Sync>;
pub type RngFactory = Arc<dyn Fn(ExecutorId) -> Arc<dyn RngSupport> + Send + Sync>;
pub type DnnFactory = Arc<dyn Fn(ExecutorId) -> Arc<dyn DnnSupport> + Send + Sync>;

/// Constructor for one capability. The variant fixes which kind it builds.
#[derive(Clone)]
pub enum ProviderFactory {
    Blas(BlasFactory),
    Fft(FftFactory),
    Rng(RngFactory),
    Dnn(DnnFactory),
}

impl ProviderFactory {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            ProviderFactory::Blas(_) => CapabilityKind::Blas,
            ProviderFactory::Fft(_) => CapabilityKind::Fft,
            ProviderFactory::Rng(_) => CapabilityKind::Rng,
            ProviderFactory::Dnn(_) => CapabilityKind::Dnn,
        }
    }

    fn construct(&self, executor_id: ExecutorId) -> Provider {
        match self {
            ProviderFactory::Blas(factory) => Provider::Blas(factory(executor_id)),
            ProviderFactory::Fft(factory) => Provider::Fft(factory(executor_id)),
            ProviderFactory::Rng(factory) => Provider::Rng(factory(executor_id)),
            ProviderFactory::Dnn(factory) => Provider::Dnn(factory(executor_id)),
        }
    }
}

impl fmt::Debug for ProviderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProviderFactory({})", self.kind())
    }
}

/// Host reference provider. One type serves every kind it is registered for.
#[derive(Debug, Clone)]
pub struct HostProvider {
    kind: CapabilityKind,
    executor_id: ExecutorId,
    name: String,
}

impl HostProvider {
    pub fn new(kind: CapabilityKind, executor_id: ExecutorId) -> Self {
        Self {
            kind,
            executor_id,
            name: format!("host-{}", kind.to_string().to_lowercase()),
        }
    }
}

impl CapabilityProvider for HostProvider {
    fn kind(&self) -> CapabilityKind {
        self.kind
    }

    fn executor_id(&self) -> ExecutorId {
        self.executor_id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl BlasSupport for HostProvider {}
impl FftSupport for HostProvider {}
impl RngSupport for HostProvider {}

/// Capability-keyed factory table
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: HashMap<CapabilityKind, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the host BLAS, FFT and RNG providers
    pub fn host() -> Self {
        let mut registry = Self::new();
        registry.register(ProviderFactory::Blas(Arc::new(|id: ExecutorId| -> Arc<dyn BlasSupport> {
            Arc::new(HostProvider::new(CapabilityKind::Blas, id))
        })));
        registry.register(ProviderFactory::Fft(Arc::new(|id: ExecutorId| -> Arc<dyn FftSupport> {
            Arc::new(HostProvider::new(CapabilityKind::Fft, id))
        })));
        registry.register(ProviderFactory::Rng(Arc::new(|id: ExecutorId| -> Arc<dyn RngSupport> {
            Arc::new(HostProvider::new(CapabilityKind::Rng, id))
        })));
        registry
    }

    /// Register `factory` under the kind it builds, replacing any previous one
    pub fn register(&mut self, factory: ProviderFactory) {
        self.factories.insert(factory.kind(), factory);
    }

    pub fn unregister(&mut self, kind: CapabilityKind) {
        self.factories.remove(&kind);
    }

    pub fn contains(&self, kind: CapabilityKind) -> bool {
        self.factories.contains_key(&kind)
    }

    fn construct(&self, kind: CapabilityKind, executor_id: ExecutorId) -> Option<Provider> {
        self.factories
            .get(&kind)
            .map(|factory| factory.construct(executor_id))
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Lazily constructed providers for one executor
pub(crate) struct ProviderCache {
    executor_id: ExecutorId,
    registry: ProviderRegistry,
    built: Mutex<HashMap<CapabilityKind, Provider>>,
}

impl ProviderCache {
    pub(crate) fn new(executor_id: ExecutorId, registry: ProviderRegistry) -> Self {
        Self {
            executor_id,
            registry,
            built: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn has_factory(&self, kind: CapabilityKind) -> bool {
        self.registry.contains(kind)
    }

    /// Construct on first request, then hand out the same instance.
    pub(crate) fn get_or_construct(&self, kind: CapabilityKind) -> Option<Provider> {
        let mut built = self.built.lock();
        if let Some(provider) = built.get(&kind) {
            return Some(provider.clone());
        }
        let provider = self.registry.construct(kind, self.executor_id)?;
        built.insert(kind, provider.clone());
        Some(provider)
    }
}
