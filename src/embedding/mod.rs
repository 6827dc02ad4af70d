//! Embedding generation.
//!
//! Turns raw text into unit-normalized vectors through a remote text
//! embedding model. The generator owns preprocessing, request batching,
//! retry/backoff and output validation; providers only move bytes.

mod generator;
mod openai;
mod preprocess;
mod provider;
mod retry;

pub use generator::{DEFAULT_BATCH_SIZE, EmbeddingGenerator, MAX_BATCH_SIZE};
pub use openai::OpenAiProvider;
pub use preprocess::{DEFAULT_MAX_CHARS, preprocess};
pub use provider::{EmbeddingProvider, HashEmbeddingProvider, ProviderError};
pub use retry::{RetryExhausted, RetryPolicy};

use thiserror::Error;

/// Errors produced while turning text into a vector.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("Text is empty after preprocessing")]
    EmptyInput,

    #[error("Embedding request failed after {attempts} attempt(s): {source}")]
    RequestFailed {
        attempts: u32,
        source: ProviderError,
    },

    #[error("Embedding provider returned {actual} vectors for {expected} texts")]
    ResponseMismatch { expected: usize, actual: usize },

    #[error(
        "Embedding dimension mismatch: expected {expected}, got {actual}\nSuggestion: Check that 'store.dimension' matches the embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding failed validation: {0}")]
    InvalidVector(String),

    #[error("Invalid embedding configuration: {0}")]
    Configuration(String),
}
