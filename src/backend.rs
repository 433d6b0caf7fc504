use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BackendError;

/// Pluggable text-generation backend used by [`crate::summary::SummaryEngine`].
///
/// A generator turns one prompt into one completion. Implementations classify their own
/// failures: anything worth retrying (timeouts, rate limits, dropped connections) must come
/// back as [`BackendError::Transient`], everything else as [`BackendError::Permanent`].
///
/// Generators must be safe to call concurrently; the engine bounds how many calls are in
/// flight. Backends that cannot be entered twice implement [`LocalModel`] instead.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Short provider name used in logs.
    fn name(&self) -> &str;

    /// Complete `prompt` and return the generated text.
    async fn complete(&self, prompt: &str) -> Result<String, BackendError>;

    /// Cheap reachability/credential probe.
    async fn health_check(&self) -> Result<(), BackendError>;
}

/// A non-reentrant, blocking model (for example a single local model instance).
///
/// The summary engine takes exclusive ownership of it and feeds it one request at a time from
/// a dedicated worker thread; nothing else can reach it once handed over.
pub trait LocalModel: Send + 'static {
    fn name(&self) -> &str;

    fn complete(&mut self, prompt: &str) -> Result<String, BackendError>;

    fn health_check(&mut self) -> Result<(), BackendError>;
}

/// The generation backend a pipeline is built with, chosen once at construction.
pub enum GenerationBackend {
    /// A reentrant backend (typically an HTTP API) shared behind an admission gate.
    Shared(Arc<dyn Generator>),
    /// A local model that must be serialized behind the engine's own queue.
    Local(Box<dyn LocalModel>),
}

impl GenerationBackend {
    pub fn shared(generator: impl Generator + 'static) -> Self {
        Self::Shared(Arc::new(generator))
    }

    pub fn local(model: impl LocalModel) -> Self {
        Self::Local(Box::new(model))
    }
}
