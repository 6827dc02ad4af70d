//! Text → unit vector, single or batched.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{EmbeddingConfig, ProviderKind};
use crate::embedding::{
    DEFAULT_MAX_CHARS, EmbeddingError, EmbeddingProvider, HashEmbeddingProvider, OpenAiProvider,
    RetryPolicy, preprocess,
};
use crate::vector::{VectorDimension, normalize};

/// Default number of texts per provider request.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Upper bound on texts per request accepted by OpenAI-compatible APIs.
pub const MAX_BATCH_SIZE: usize = 2048;

/// Generates validated, L2-normalized embeddings through a provider.
pub struct EmbeddingGenerator {
    provider: Arc<dyn EmbeddingProvider>,
    dimension: VectorDimension,
    max_chars: usize,
    batch_size: usize,
    retry: RetryPolicy,
}

impl std::fmt::Debug for EmbeddingGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingGenerator")
            .field("model", &self.provider.model_name())
            .field("dimension", &self.dimension)
            .field("max_chars", &self.max_chars)
            .field("batch_size", &self.batch_size)
            .field("retry", &self.retry)
            .finish()
    }
}

impl EmbeddingGenerator {
    /// Creates a generator with default limits and retry policy.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, dimension: VectorDimension) -> Self {
        Self {
            provider,
            dimension,
            max_chars: DEFAULT_MAX_CHARS,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
        }
    }

    /// Builds the provider named in the settings and wraps it.
    pub fn from_config(
        config: &EmbeddingConfig,
        dimension: VectorDimension,
    ) -> Result<Self, EmbeddingError> {
        let provider: Arc<dyn EmbeddingProvider> = match config.provider {
            ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(config, dimension.get())?),
            ProviderKind::Hash => Arc::new(HashEmbeddingProvider::new(dimension.get())),
        };

        Ok(Self::new(provider, dimension)
            .with_max_chars(config.max_chars)
            .with_batch_size(config.batch_size)
            .with_retry_policy(RetryPolicy::from(&config.retry)))
    }

    /// Sets the character budget applied during preprocessing.
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars.max(1);
        self
    }

    /// Sets the default request size used by [`Self::embed_texts`].
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Cleans up `text` the same way every embedding path does.
    #[must_use]
    pub fn preprocess(&self, text: &str) -> Option<String> {
        preprocess(text, self.max_chars)
    }

    /// Embeds a single text.
    ///
    /// # Errors
    /// `EmptyInput` when nothing survives preprocessing, `RequestFailed` when
    /// the provider keeps failing, and a validation error when the returned
    /// vector has the wrong dimension, NaN components or zero magnitude.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let cleaned = self.preprocess(text).ok_or(EmbeddingError::EmptyInput)?;
        let mut vectors = self.request(std::slice::from_ref(&cleaned)).await?;
        let raw = vectors.pop().ok_or_else(|| EmbeddingError::ResponseMismatch {
            expected: 1,
            actual: 0,
        })?;
        self.validate(raw)
    }

    /// Embeds texts using the configured batch size.
    pub async fn embed_texts<S>(&self, texts: &[S]) -> Vec<Option<Vec<f32>>>
    where
        S: AsRef<str> + Sync,
    {
        self.embed_batch(texts, self.batch_size).await
    }

    /// Embeds many texts in requests of at most `batch_size` items.
    ///
    /// The output has one slot per input, in input order. A slot is `None`
    /// when its text was empty after preprocessing, when its vector failed
    /// validation, or when the request carrying it failed after retries.
    /// None of these abort the rest of the batch.
    pub async fn embed_batch<S>(&self, texts: &[S], batch_size: usize) -> Vec<Option<Vec<f32>>>
    where
        S: AsRef<str> + Sync,
    {
        let batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];

        let pending: Vec<(usize, String)> = texts
            .iter()
            .enumerate()
            .filter_map(|(position, text)| match self.preprocess(text.as_ref()) {
                Some(cleaned) => Some((position, cleaned)),
                None => {
                    debug!(position, "Skipping text that is empty after preprocessing");
                    None
                }
            })
            .collect();

        for chunk in pending.chunks(batch_size) {
            let chunk_texts: Vec<String> = chunk.iter().map(|(_, text)| text.clone()).collect();

            let vectors = match self.request(&chunk_texts).await {
                Ok(vectors) => vectors,
                Err(e) => {
                    warn!(
                        items = chunk.len(),
                        error = %e,
                        "Embedding request failed, marking its items as missing"
                    );
                    continue;
                }
            };

            for ((position, _), raw) in chunk.iter().zip(vectors) {
                match self.validate(raw) {
                    Ok(vector) => results[*position] = Some(vector),
                    Err(e) => warn!(position, error = %e, "Discarding invalid embedding"),
                }
            }
        }

        results
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let vectors = self
            .retry
            .run(|| self.provider.embed_texts(texts))
            .await
            .map_err(|exhausted| EmbeddingError::RequestFailed {
                attempts: exhausted.attempts,
                source: exhausted.last_error,
            })?;

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::ResponseMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            });
        }
        Ok(vectors)
    }

    fn validate(&self, raw: Vec<f32>) -> Result<Vec<f32>, EmbeddingError> {
        if raw.len() != self.dimension.get() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension.get(),
                actual: raw.len(),
            });
        }
        let (vector, _) =
            normalize(&raw).map_err(|e| EmbeddingError::InvalidVector(e.to_string()))?;
        Ok(vector)
    }
}
