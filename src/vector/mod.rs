//! Vector primitives and the nearest-neighbor index engine.
//!
//! # Architecture
//! The engine is an exact flat index scored by inner product. Vectors are
//! L2-normalized before they reach it, so inner product equals cosine
//! similarity. The engine is append-only; the content store above it owns
//! deletion by rebuilding a fresh engine from the surviving vectors.

mod engine;
mod types;

pub use engine::FlatIndex;
pub use types::{
    InternalId, NORM_TOLERANCE, VECTOR_DIMENSION_1536, VECTOR_DIMENSION_3072, VectorDimension,
    VectorError, inner_product, is_unit_norm, l2_norm, normalize,
};
