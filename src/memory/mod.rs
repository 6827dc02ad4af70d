//! Persistent semantic content memory.
//!
//! [`ContentStore`] keeps records and the index engine in lockstep and owns
//! the rebuild protocol. [`MemoryService`] is the shareable async façade that
//! embeds text and then mutates the store under a lock.

mod persistence;
mod record;
mod service;
mod stats;
mod store;

pub use persistence::{
    ID_MAP_FILE, INDEX_FILE, LoadedStore, METADATA_FILE, StoreFiles, VECTORS_FILE,
};
pub use record::{
    CREATED_AT_KEY, ContentView, Metadata, SearchHit, StoredRecord, TEXT_KEY, TEXT_LENGTH_KEY,
};
pub use service::{DUPLICATE_CANDIDATES, MemoryService};
pub use stats::{Inconsistency, IndexState, Statistics};
pub use store::{ContentStore, DEFAULT_SAVE_EVERY};
