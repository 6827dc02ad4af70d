/// The main library module for content-memory
pub mod config;
pub mod display;
pub mod embedding;
pub mod error;
pub mod logging;
pub mod memory;
pub mod vector;

// Explicit exports for better API clarity
pub use config::Settings;
pub use embedding::{EmbeddingError, EmbeddingGenerator, EmbeddingProvider};
pub use error::{MemoryError, MemoryResult};
pub use memory::{
    ContentStore, ContentView, IndexState, Inconsistency, MemoryService, Metadata, SearchHit,
    Statistics,
};
pub use vector::{FlatIndex, VectorDimension, VectorError};
