//! Type-safe wrappers and core types for the vector layer.
//!
//! This module provides newtypes, normalization helpers and the error type
//! shared by the index engine and the content store.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Output dimension of `text-embedding-3-small` and `text-embedding-ada-002`.
pub const VECTOR_DIMENSION_1536: usize = 1536;

/// Output dimension of `text-embedding-3-large`.
pub const VECTOR_DIMENSION_3072: usize = 3072;

/// Maximum allowed deviation of a stored vector's L2 norm from 1.0.
pub const NORM_TOLERANCE: f32 = 1e-3;

/// Dense position of a vector inside the index engine.
///
/// Internal ids start at 0 and grow by one per insertion. They double as the
/// engine slot number, so they are never handed out to callers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct InternalId(u32);

impl InternalId {
    /// Creates a new `InternalId`.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the underlying u32 value.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Returns the engine slot this id addresses.
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.0 as usize
    }

    /// Returns the id following this one.
    ///
    /// Returns `None` once the id space is exhausted.
    #[must_use]
    pub fn next(&self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }

    /// Builds an id from an engine slot.
    pub fn from_slot(slot: usize) -> Result<Self, VectorError> {
        u32::try_from(slot)
            .map(Self)
            .map_err(|_| VectorError::IdSpaceExhausted)
    }

    /// Parses the string form used as a key in the persisted maps.
    #[must_use]
    pub fn parse_key(key: &str) -> Option<Self> {
        key.parse::<u32>().ok().map(Self)
    }
}

impl std::fmt::Display for InternalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type-safe wrapper for vector dimensions.
///
/// A store instance is created with one dimension and every vector it accepts
/// must have exactly that length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        if dim == 0 {
            return Err(VectorError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        Ok(Self(dim))
    }

    /// Creates the 1536-dimensional default.
    #[must_use]
    pub const fn dimension_1536() -> Self {
        Self(VECTOR_DIMENSION_1536)
    }

    /// Returns the underlying dimension value.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.0 {
            return Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

impl TryFrom<usize> for VectorDimension {
    type Error = VectorError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VectorDimension> for usize {
    fn from(value: VectorDimension) -> Self {
        value.0
    }
}

/// Euclidean norm of a vector.
///
/// Squares are accumulated in f64 so large or tiny finite components neither
/// overflow nor underflow.
#[must_use]
pub fn l2_norm(vector: &[f32]) -> f32 {
    wide_norm(vector) as f32
}

fn wide_norm(vector: &[f32]) -> f64 {
    vector
        .iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt()
}

/// Inner product of two equally sized vectors.
#[must_use]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Rejects NaN/infinite components and all-zero vectors.
fn checked_norm(vector: &[f32]) -> Result<f64, VectorError> {
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(VectorError::NonFinite);
    }
    let norm = wide_norm(vector);
    if norm == 0.0 {
        return Err(VectorError::ZeroVector);
    }
    Ok(norm)
}

/// Scales a vector to unit length.
///
/// Returns the normalized vector together with the norm it had on input, so
/// callers can decide whether the deviation deserves a warning.
pub fn normalize(vector: &[f32]) -> Result<(Vec<f32>, f32), VectorError> {
    let norm = checked_norm(vector)?;
    let normalized = vector
        .iter()
        .map(|&v| (f64::from(v) / norm) as f32)
        .collect();
    Ok((normalized, norm.min(f64::from(f32::MAX)) as f32))
}

/// Returns true when the norm is within [`NORM_TOLERANCE`] of 1.0.
#[must_use]
pub fn is_unit_norm(norm: f32) -> bool {
    (norm - 1.0).abs() <= NORM_TOLERANCE
}

/// Errors that can occur during vector operations.
///
/// All error messages include actionable suggestions for resolution.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors use the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector dimension: {dimension}\nReason: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    #[error(
        "Vector contains NaN or infinite components\nSuggestion: Check the embedding provider output"
    )]
    NonFinite,

    #[error(
        "Vector has zero magnitude and cannot be normalized\nSuggestion: Check the embedding provider output"
    )]
    ZeroVector,

    #[error("Storage error: {0}\nSuggestion: Check disk space and file permissions")]
    Storage(#[from] std::io::Error),

    #[error("Invalid index format: {0}\nSuggestion: Rebuild the index from the stored vectors")]
    InvalidFormat(String),

    #[error(
        "Invalid index version: expected {expected}, got {actual}\nSuggestion: Rebuild the index from the stored vectors"
    )]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Internal id space exhausted\nSuggestion: Run a rebuild to renumber live records")]
    IdSpaceExhausted,
}
