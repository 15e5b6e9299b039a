//! SYNAPSE LLM - Embedding Abstraction Layer
//!
//! Provider-agnostic trait for embedding generation, plus a registry that
//! selects providers by model identifier. Unknown identifiers are rejected,
//! never silently defaulted. Concrete HTTP providers live in [`providers`].

pub mod providers;

pub use providers::{OllamaEmbeddingProvider, OpenAiEmbeddingProvider};

use async_trait::async_trait;
use synapse_core::{
    ContentHash, EmbeddingError, EmbeddingVector, SynapseError, SynapseResult,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

// ============================================================================
// EMBEDDING PROVIDER TRAIT
// ============================================================================

/// Trait for embedding providers.
/// Implementations must be thread-safe (Send + Sync).
///
/// # Example
/// ```ignore
/// struct MyProvider { /* ... */ }
///
/// #[async_trait]
/// impl EmbeddingProvider for MyProvider {
///     async fn embed(&self, text: &str) -> SynapseResult<EmbeddingVector> {
///         // Call the embedding API
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text.
    ///
    /// # Returns
    /// * `Ok(EmbeddingVector)` - The embedding vector
    /// * `Err(SynapseError::Embedding)` - If the provider call fails
    async fn embed(&self, text: &str) -> SynapseResult<EmbeddingVector>;

    /// Generate embeddings for multiple texts in a batch.
    /// More efficient than calling embed() repeatedly where the provider
    /// supports it.
    async fn embed_batch(&self, texts: &[&str]) -> SynapseResult<Vec<EmbeddingVector>>;

    /// The number of dimensions this provider produces (e.g., 384, 768, 1536).
    fn dimensions(&self) -> i32;

    /// Stable model identifier for this provider (e.g., "nomic-embed-text").
    fn model_id(&self) -> &str;
}

// ============================================================================
// PROVIDER REGISTRY
// ============================================================================

/// Registry of embedding providers keyed by model identifier.
///
/// Providers must be explicitly registered - no auto-discovery. Lookups for
/// an unregistered model fail with `ModelNotRegistered` rather than falling
/// back to some other model, because vectors from different models live in
/// incompatible spaces.
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn EmbeddingProvider>>>,
}

impl ProviderRegistry {
    /// Create a new empty provider registry.
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a provider under its own `model_id`.
    /// Replaces any previously registered provider for the same model.
    pub fn register(&self, provider: Arc<dyn EmbeddingProvider>) {
        let model_id = provider.model_id().to_string();
        if let Ok(mut providers) = self.providers.write() {
            providers.insert(model_id, provider);
        }
    }

    /// Get the provider for a model identifier.
    ///
    /// # Returns
    /// * `Ok(Arc<dyn EmbeddingProvider>)` - The registered provider
    /// * `Err(EmbeddingError::ModelNotRegistered)` - If no provider is registered
    pub fn get(&self, model_id: &str) -> SynapseResult<Arc<dyn EmbeddingProvider>> {
        self.providers
            .read()
            .ok()
            .and_then(|providers| providers.get(model_id).cloned())
            .ok_or_else(|| {
                SynapseError::Embedding(EmbeddingError::ModelNotRegistered {
                    model_id: model_id.to_string(),
                })
            })
    }

    /// Check whether a model identifier has a registered provider.
    pub fn contains(&self, model_id: &str) -> bool {
        self.providers
            .read()
            .map(|providers| providers.contains_key(model_id))
            .unwrap_or(false)
    }

    /// List registered model identifiers.
    pub fn model_ids(&self) -> Vec<String> {
        self.providers
            .read()
            .map(|providers| providers.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove a provider registration.
    pub fn unregister(&self, model_id: &str) {
        if let Ok(mut providers) = self.providers.write() {
            providers.remove(model_id);
        }
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("models", &self.model_ids())
            .finish()
    }
}

// ============================================================================
// EMBEDDING CACHE
// ============================================================================

/// Cache for embedding vectors to avoid redundant provider calls.
/// Keyed by (content hash, model id); thread-safe via RwLock.
pub struct EmbeddingCache {
    cache: RwLock<HashMap<(ContentHash, String), EmbeddingVector>>,
    max_size: usize,
}

impl EmbeddingCache {
    /// Create a new embedding cache with the given maximum entry count.
    pub fn new(max_size: usize) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            max_size,
        }
    }

    /// Get a cached embedding by content hash and model.
    pub fn get(&self, hash: &ContentHash, model_id: &str) -> Option<EmbeddingVector> {
        self.cache
            .read()
            .ok()?
            .get(&(*hash, model_id.to_string()))
            .cloned()
    }

    /// Insert an embedding into the cache.
    /// If the cache is full, this is a no-op (simple eviction strategy).
    pub fn insert(&self, hash: ContentHash, embedding: EmbeddingVector) {
        if let Ok(mut cache) = self.cache.write() {
            if cache.len() < self.max_size {
                let key = (hash, embedding.model_id.clone());
                cache.insert(key, embedding);
            }
        }
    }

    /// Clear all cached entries.
    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    /// Current number of cached entries.
    pub fn len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for EmbeddingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingCache")
            .field("max_size", &self.max_size)
            .field("current_size", &self.len())
            .finish()
    }
}

// ============================================================================
// COST TRACKER
// ============================================================================

/// Tracks embedding token throughput for cost accounting.
/// Thread-safe via atomic operations.
pub struct CostTracker {
    embedding_tokens: std::sync::atomic::AtomicI64,
    requests: std::sync::atomic::AtomicI64,
}

impl CostTracker {
    /// Create a new cost tracker with zero counts.
    pub fn new() -> Self {
        Self {
            embedding_tokens: std::sync::atomic::AtomicI64::new(0),
            requests: std::sync::atomic::AtomicI64::new(0),
        }
    }

    /// Record one embedding request and its token count.
    pub fn record_embedding(&self, tokens: i64) {
        self.embedding_tokens
            .fetch_add(tokens, std::sync::atomic::Ordering::Relaxed);
        self.requests
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    /// Total embedding tokens processed.
    pub fn embedding_tokens(&self) -> i64 {
        self.embedding_tokens
            .load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Total provider requests issued.
    pub fn requests(&self) -> i64 {
        self.requests.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.embedding_tokens
            .store(0, std::sync::atomic::Ordering::Relaxed);
        self.requests.store(0, std::sync::atomic::Ordering::Relaxed);
    }
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CostTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostTracker")
            .field("embedding_tokens", &self.embedding_tokens())
            .field("requests", &self.requests())
            .finish()
    }
}

// ============================================================================
// MOCK PROVIDER FOR TESTING
// ============================================================================

/// Mock embedding provider for testing.
/// Generates deterministic, unit-normalized embeddings from text content.
#[derive(Debug, Clone)]
pub struct MockEmbeddingProvider {
    model_id: String,
    dimensions: i32,
}

impl MockEmbeddingProvider {
    /// Create a new mock embedding provider.
    pub fn new(model_id: impl Into<String>, dimensions: i32) -> Self {
        Self {
            model_id: model_id.into(),
            dimensions,
        }
    }

    /// Generate a deterministic embedding from text.
    /// Uses a simple byte-accumulation approach for reproducibility.
    fn generate_embedding(&self, text: &str) -> Vec<f32> {
        let mut data = vec![0.0f32; self.dimensions as usize];

        for (i, byte) in text.bytes().enumerate() {
            let idx = i % self.dimensions as usize;
            data[idx] += (byte as f32) / 255.0;
        }

        // Normalize to unit vector
        let norm: f32 = data.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut data {
                *x /= norm;
            }
        }

        data
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> SynapseResult<EmbeddingVector> {
        let data = self.generate_embedding(text);
        Ok(EmbeddingVector::new(data, self.model_id.clone()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> SynapseResult<Vec<EmbeddingVector>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    fn dimensions(&self) -> i32 {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
