#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use content_memory::config::ProviderKind;
use content_memory::embedding::{
    EmbeddingProvider, HashEmbeddingProvider, ProviderError, RetryPolicy,
};
use content_memory::{ContentStore, EmbeddingGenerator, MemoryService, Settings, VectorDimension};

/// Dimension used by every test store.
pub const DIM: usize = 32;

pub fn dimension() -> VectorDimension {
    VectorDimension::new(DIM).expect("non-zero dimension")
}

/// In-memory service backed by the offline hash provider.
pub fn hash_service() -> MemoryService {
    let generator = EmbeddingGenerator::new(Arc::new(HashEmbeddingProvider::new(DIM)), dimension());
    MemoryService::new(ContentStore::in_memory(dimension()), generator)
        .expect("matching dimensions")
}

/// Settings for a persistent hash-provider store under `dir`.
pub fn hash_settings(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.store.path = dir.join("store");
    settings.store.dimension = DIM;
    settings.store.save_every = 1;
    settings.embedding.provider = ProviderKind::Hash;
    settings
}

/// In-memory service whose provider always fails with `error`.
pub fn failing_service(error: ProviderError) -> (MemoryService, Arc<FailingProvider>) {
    let provider = Arc::new(FailingProvider::new(error));
    let generator = EmbeddingGenerator::new(provider.clone(), dimension())
        .with_retry_policy(RetryPolicy::none());
    let service = MemoryService::new(ContentStore::in_memory(dimension()), generator)
        .expect("matching dimensions");
    (service, provider)
}

/// Provider that fails every call.
pub struct FailingProvider {
    error: ProviderError,
    calls: AtomicUsize,
}

impl FailingProvider {
    pub fn new(error: ProviderError) -> Self {
        Self {
            error,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FailingProvider {
    async fn embed_texts(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}

/// In-memory service whose provider sleeps `delay` before answering.
pub fn slow_service(delay: Duration) -> (MemoryService, Arc<SlowProvider>) {
    let provider = Arc::new(SlowProvider::new(delay));
    let generator = EmbeddingGenerator::new(provider.clone(), dimension());
    let service = MemoryService::new(ContentStore::in_memory(dimension()), generator)
        .expect("matching dimensions");
    (service, provider)
}

/// Hash provider behind an artificial delay.
pub struct SlowProvider {
    inner: HashEmbeddingProvider,
    delay: Duration,
    started: AtomicUsize,
}

impl SlowProvider {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: HashEmbeddingProvider::new(DIM),
            delay,
            started: AtomicUsize::new(0),
        }
    }

    /// Number of requests that began, finished or not.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for SlowProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.embed_texts(texts).await
    }

    fn model_name(&self) -> &str {
        "slow"
    }
}

/// Deterministic pseudo-random vector, deliberately not unit length.
pub fn vector_for(seed: u64) -> Vec<f32> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..DIM)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            // Top bits mapped into [-2.0, 2.0)
            ((state >> 40) as f32 / (1u64 << 24) as f32) * 4.0 - 2.0
        })
        .collect()
}

/// Unit vector along `axis`.
pub fn axis(axis: usize) -> Vec<f32> {
    let mut vector = vec![0.0; DIM];
    vector[axis] = 1.0;
    vector
}
