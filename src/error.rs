//! Error types for the content memory
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages.

use crate::embedding::EmbeddingError;
use crate::vector::VectorError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for memory operations
#[derive(Error, Debug)]
pub enum MemoryError {
    /// Embedding failed validation or exhausted its retries
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Vector validation errors
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors use the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector: {reason}")]
    InvalidVector { reason: String },

    #[error(
        "Batch argument '{field}' has {actual} entries but {expected} vectors were given"
    )]
    BatchLengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Index state errors
    #[error("Store is in an inconsistent state: {reason}")]
    InconsistentState { reason: String },

    #[error("Failed to create internal id: maximum record count reached")]
    IdSpaceExhausted,

    /// Storage errors
    #[error("Failed to persist store to '{path}': {source}")]
    PersistenceError {
        path: PathBuf,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Configuration errors
    #[error("Invalid configuration: {reason}")]
    ConfigError { reason: String },
}

impl From<VectorError> for MemoryError {
    fn from(error: VectorError) -> Self {
        match error {
            VectorError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            VectorError::IdSpaceExhausted => Self::IdSpaceExhausted,
            other => Self::InvalidVector {
                reason: other.to_string(),
            },
        }
    }
}

impl MemoryError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::Embedding(_) => "EMBEDDING_ERROR",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::InvalidVector { .. } => "INVALID_VECTOR",
            Self::BatchLengthMismatch { .. } => "BATCH_LENGTH_MISMATCH",
            Self::InconsistentState { .. } => "INCONSISTENT_STATE",
            Self::IdSpaceExhausted => "ID_SPACE_EXHAUSTED",
            Self::PersistenceError { .. } => "PERSISTENCE_ERROR",
            Self::ConfigError { .. } => "CONFIG_ERROR",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::Embedding(EmbeddingError::EmptyInput) => {
                vec!["Provide text with at least one non-whitespace character"]
            }
            Self::Embedding(_) => vec![
                "Check the embedding provider URL and API key",
                "Try the operation again, rate limits are usually temporary",
            ],
            Self::DimensionMismatch { .. } => vec![
                "Ensure all vectors come from the same embedding model",
                "Check 'store.dimension' in settings.toml",
            ],
            Self::InconsistentState { .. } | Self::IdSpaceExhausted => vec![
                "Run 'content-memory rebuild' to renumber and reindex live records",
            ],
            Self::PersistenceError { .. } => vec![
                "The in-memory state is intact, retry the save once the disk issue is fixed",
                "Check disk space and permissions in the store directory",
            ],
            Self::ConfigError { .. } => {
                vec!["Run 'content-memory init --force' to regenerate settings.toml"]
            }
            _ => vec![],
        }
    }
}

/// Result type alias for memory operations
pub type MemoryResult<T> = Result<T, MemoryError>;
