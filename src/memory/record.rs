//! Record types shared by the store, its persistence and its callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Open key-value bag attached to every record.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Metadata key holding the creation timestamp (RFC 3339).
pub const CREATED_AT_KEY: &str = "created_at";

/// Metadata key holding the original text on the embedding path.
pub const TEXT_KEY: &str = "text";

/// Metadata key holding the original text's length in characters.
pub const TEXT_LENGTH_KEY: &str = "text_length";

/// One live record, keyed by its internal id inside the store.
///
/// The id map, metadata map and vector map of the persisted layout are all
/// projections of this struct, so they cannot drift apart in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub content_id: String,
    pub metadata: Metadata,
    /// Unit-normalized vector, kept so the engine can be rebuilt
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl StoredRecord {
    /// Builds a record, taking its timestamp from `metadata["created_at"]`
    /// when that holds an RFC 3339 string. Any other value under the key is
    /// replaced by the current time so both timestamps always agree.
    pub(crate) fn new(content_id: String, mut metadata: Metadata, vector: Vec<f32>) -> Self {
        let supplied = metadata
            .get(CREATED_AT_KEY)
            .and_then(serde_json::Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|parsed| parsed.with_timezone(&Utc));
        let created_at = match supplied {
            Some(created_at) => created_at,
            None => {
                if metadata.contains_key(CREATED_AT_KEY) {
                    warn!(
                        content_id = %content_id,
                        "Ignoring created_at metadata that is not an RFC 3339 string"
                    );
                }
                let now = Utc::now();
                metadata.insert(
                    CREATED_AT_KEY.to_string(),
                    serde_json::Value::String(now.to_rfc3339()),
                );
                now
            }
        };
        Self {
            content_id,
            metadata,
            vector,
            created_at,
        }
    }

    pub(crate) fn view(&self) -> ContentView {
        ContentView {
            content_id: self.content_id.clone(),
            metadata: self.metadata.clone(),
            created_at: self.created_at,
        }
    }
}

/// Caller-facing view of a record. Internal ids and vectors stay inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentView {
    pub content_id: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// A single search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub content_id: String,
    /// Inner product with the query, in [-1, 1] for unit vectors
    pub score: f32,
    pub metadata: Metadata,
}
