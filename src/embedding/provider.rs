//! Embedding provider abstraction.
//!
//! A provider turns already-preprocessed texts into raw vectors, one per input
//! and in input order. Validation, normalization and retries live in
//! [`EmbeddingGenerator`](super::EmbeddingGenerator); providers only report
//! what went wrong in a way the retry policy can act on.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Failure classes reported by a provider.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// The provider asked us to slow down
    #[error("Rate limited by embedding provider: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Timeouts, connection resets, 5xx responses
    #[error("Transient embedding provider failure: {0}")]
    Transient(String),

    /// Bad request, authentication failure, malformed response
    #[error("Embedding provider rejected the request: {0}")]
    Fatal(String),
}

impl ProviderError {
    /// Whether the retry policy may try the request again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal(_))
    }
}

/// Trait for remote (or local) text embedding models.
///
/// Implementations must be thread-safe; the generator shares one provider
/// across concurrent requests.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds a batch of texts.
    ///
    /// # Returns
    /// One vector per input text, in input order
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Name of the model producing the vectors.
    fn model_name(&self) -> &str;
}

/// Offline provider based on feature hashing.
///
/// Each lowercase alphanumeric token is hashed (FNV-1a) into one of
/// `dimension` buckets with a hash-derived sign. Texts that share words get
/// similar vectors, which is enough for development setups and tests that
/// must not touch the network.
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dimension: usize,
}

impl HashEmbeddingProvider {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Embeds one text synchronously.
    #[must_use]
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for raw_token in text.split(|c: char| !c.is_alphanumeric()) {
            if raw_token.is_empty() {
                continue;
            }
            let hash = fnv1a_hash(raw_token.to_lowercase().as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }

    fn model_name(&self) -> &str {
        "feature-hash"
    }
}

fn fnv1a_hash(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    bytes.iter().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}
