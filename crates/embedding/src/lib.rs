//! `EmbeddingProvider` contract (component used by C4's embedding step) plus
//! a deterministic noop implementation and a dimension-validating wrapper.
//!
//! Concrete Ollama/OpenAI clients are external collaborators and out of
//! scope here; this crate only needs the contract, a provider that always
//! works for development and tests, and the validation every real provider
//! must also satisfy.
//!
//! Grounded on `crates/intelligence/src/expand/mod.rs`'s `QueryExpander`
//! trait (a small sync trait with one required method) and
//! `crates/intelligence/src/expand/mock.rs`'s deterministic mock pattern.

use akashi_core::config::EmbeddingConfig;
use akashi_core::{Error, Result};

/// A pluggable text-embedding backend.
pub trait EmbeddingProvider: Send + Sync {
    /// Short identifier surfaced in logs and the observability header named
    /// by the search fallback chain.
    fn name(&self) -> &str;

    /// Vector length this provider always returns.
    fn dimensions(&self) -> usize;

    /// Embed one string.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several strings in one call. The default does them one at a
    /// time; a real provider overrides this to batch the network call.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Always-available provider used when no real backend is configured.
/// Returns the zero vector for every input — the sentinel the search
/// fallback chain already treats as "no embedding, fall through to the next
/// leg" (specification §4.5 step 1).
pub struct NoopEmbeddingProvider {
    dimensions: usize,
}

impl NoopEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl EmbeddingProvider for NoopEmbeddingProvider {
    fn name(&self) -> &str {
        "noop"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.0; self.dimensions])
    }
}

/// Wraps any [`EmbeddingProvider`] and enforces that every vector it returns
/// matches the configured dimension count. A mismatch is a fatal
/// configuration error, not a per-call failure — it means the process was
/// pointed at the wrong model, not that one request misbehaved.
pub struct ValidatingProvider<P> {
    inner: P,
    expected_dimensions: usize,
}

impl<P: EmbeddingProvider> ValidatingProvider<P> {
    pub fn new(inner: P, expected_dimensions: usize) -> Self {
        Self { inner, expected_dimensions }
    }

    fn check(&self, vector: Vec<f32>) -> Result<Vec<f32>> {
        if vector.len() != self.expected_dimensions {
            return Err(Error::Fatal(format!(
                "embedding provider {:?} returned {} dimensions, expected {} \
                 (check embedding.dimensions in configuration)",
                self.inner.name(),
                vector.len(),
                self.expected_dimensions
            )));
        }
        Ok(vector)
    }
}

impl<P: EmbeddingProvider> EmbeddingProvider for ValidatingProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn dimensions(&self) -> usize {
        self.expected_dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.check(self.inner.embed(text)?)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.inner
            .embed_batch(texts)?
            .into_iter()
            .map(|v| self.check(v))
            .collect()
    }
}

/// Build the provider named by `config`. `auto` and `noop` both resolve to
/// [`NoopEmbeddingProvider`] here — a real `auto` probe (try Ollama, then
/// OpenAI, then fall back) belongs to whichever binary wires in those
/// external clients. Requesting a named provider this crate doesn't carry
/// is a fatal startup error rather than a silent downgrade.
pub fn build_provider(config: &EmbeddingConfig) -> Result<ValidatingProvider<NoopEmbeddingProvider>> {
    use akashi_core::config::EmbeddingProviderKind;
    match config.provider {
        EmbeddingProviderKind::Auto | EmbeddingProviderKind::Noop => {
            Ok(ValidatingProvider::new(NoopEmbeddingProvider::new(config.dimensions), config.dimensions))
        }
        EmbeddingProviderKind::Ollama | EmbeddingProviderKind::Openai => Err(Error::Fatal(format!(
            "embedding provider {:?} has no client in this build",
            config.provider
        ))),
    }
}
