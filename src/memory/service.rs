//! Shareable async façade over the content store.
//!
//! Embedding happens first, with no lock held; only once a vector is in hand
//! does the service take the store lock to commit it. A cancelled or failed
//! embedding call therefore never leaves a record behind. Searches share a
//! read lock, mutations take the write lock, and no lock is held across an
//! `.await`.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::Settings;
use crate::embedding::EmbeddingGenerator;
use crate::error::{MemoryError, MemoryResult};
use crate::memory::{
    ContentStore, ContentView, Metadata, SearchHit, Statistics, TEXT_KEY, TEXT_LENGTH_KEY,
};
use crate::vector::VectorDimension;

/// Candidates inspected by [`MemoryService::find_duplicates`].
pub const DUPLICATE_CANDIDATES: usize = 10;

/// Cloneable handle to one store and its embedding generator.
#[derive(Debug, Clone)]
pub struct MemoryService {
    store: Arc<RwLock<ContentStore>>,
    generator: Arc<EmbeddingGenerator>,
}

impl MemoryService {
    /// Pairs a store with a generator producing vectors of the same size.
    pub fn new(store: ContentStore, generator: EmbeddingGenerator) -> MemoryResult<Self> {
        if store.dimension() != generator.dimension() {
            return Err(MemoryError::DimensionMismatch {
                expected: store.dimension().get(),
                actual: generator.dimension().get(),
            });
        }
        Ok(Self {
            store: Arc::new(RwLock::new(store)),
            generator: Arc::new(generator),
        })
    }

    /// Opens the configured store and builds the configured provider.
    pub fn from_settings(settings: &Settings) -> MemoryResult<Self> {
        let dimension =
            VectorDimension::new(settings.store.dimension).map_err(|e| MemoryError::ConfigError {
                reason: e.to_string(),
            })?;
        let generator = EmbeddingGenerator::from_config(&settings.embedding, dimension).map_err(
            |e| MemoryError::ConfigError {
                reason: e.to_string(),
            },
        )?;
        let store = ContentStore::open(&settings.store.path, dimension)
            .with_save_every(settings.store.save_every);

        info!(
            path = %settings.store.path.display(),
            model = generator.model_name(),
            dimension = dimension.get(),
            "Memory service ready"
        );
        Self::new(store, generator)
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.generator.dimension()
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        self.generator.model_name()
    }

    /// Embeds `text` and stores it, with the text and its length added to
    /// the metadata.
    pub async fn add_text(
        &self,
        text: &str,
        content_id: Option<String>,
        metadata: Option<Metadata>,
    ) -> MemoryResult<String> {
        let vector = self.generator.embed(text).await?;
        let metadata = with_text(metadata.unwrap_or_default(), text);
        self.store.write().add(&vector, content_id, Some(metadata))
    }

    /// Embeds and stores many texts with one store insertion.
    ///
    /// Returns one slot per input: the content id, or `None` for a text whose
    /// embedding failed. If every embedding fails the store is not touched.
    pub async fn add_texts<S>(
        &self,
        texts: &[S],
        content_ids: Option<Vec<String>>,
        metadata: Option<Vec<Metadata>>,
    ) -> MemoryResult<Vec<Option<String>>>
    where
        S: AsRef<str> + Sync,
    {
        for (field, len) in [
            ("content_ids", content_ids.as_ref().map(Vec::len)),
            ("metadata", metadata.as_ref().map(Vec::len)),
        ] {
            if let Some(actual) = len.filter(|len| *len != texts.len()) {
                return Err(MemoryError::BatchLengthMismatch {
                    field,
                    expected: texts.len(),
                    actual,
                });
            }
        }

        let embeddings = self.generator.embed_texts(texts).await;

        let mut positions = Vec::new();
        let mut vectors = Vec::new();
        let mut batch_ids = content_ids.as_ref().map(|_| Vec::new());
        let mut batch_metadata = Vec::new();
        for (position, embedding) in embeddings.into_iter().enumerate() {
            let Some(vector) = embedding else {
                continue;
            };
            positions.push(position);
            vectors.push(vector);
            if let (Some(ids), Some(given)) = (batch_ids.as_mut(), content_ids.as_ref()) {
                ids.push(given[position].clone());
            }
            let base = metadata
                .as_ref()
                .map(|all| all[position].clone())
                .unwrap_or_default();
            batch_metadata.push(with_text(base, texts[position].as_ref()));
        }

        let mut results = vec![None; texts.len()];
        if vectors.is_empty() {
            debug!(texts = texts.len(), "No embeddings produced, store untouched");
            return Ok(results);
        }

        let stored = self
            .store
            .write()
            .add_batch(&vectors, batch_ids, Some(batch_metadata))?;
        for (position, content_id) in positions.into_iter().zip(stored) {
            results[position] = Some(content_id);
        }
        Ok(results)
    }

    /// Embeds `query` and returns the closest records.
    pub async fn search_text(
        &self,
        query: &str,
        k: usize,
        threshold: f32,
    ) -> MemoryResult<Vec<SearchHit>> {
        let vector = self.generator.embed(query).await?;
        self.store.read().search(&vector, k, threshold)
    }

    /// Stored records at least `threshold` similar to `text`.
    pub async fn find_duplicates(
        &self,
        text: &str,
        threshold: f32,
    ) -> MemoryResult<Vec<SearchHit>> {
        self.search_text(text, DUPLICATE_CANDIDATES, threshold).await
    }

    /// True when some stored record is at least `threshold` similar to `text`.
    pub async fn is_duplicate(&self, text: &str, threshold: f32) -> MemoryResult<bool> {
        Ok(!self.search_text(text, 1, threshold).await?.is_empty())
    }

    pub fn add_vector(
        &self,
        vector: &[f32],
        content_id: Option<String>,
        metadata: Option<Metadata>,
    ) -> MemoryResult<String> {
        self.store.write().add(vector, content_id, metadata)
    }

    pub fn add_vectors(
        &self,
        vectors: &[Vec<f32>],
        content_ids: Option<Vec<String>>,
        metadata: Option<Vec<Metadata>>,
    ) -> MemoryResult<Vec<String>> {
        self.store.write().add_batch(vectors, content_ids, metadata)
    }

    pub fn search_vector(
        &self,
        query: &[f32],
        k: usize,
        threshold: f32,
    ) -> MemoryResult<Vec<SearchHit>> {
        self.store.read().search(query, k, threshold)
    }

    pub fn similar_to(
        &self,
        content_id: &str,
        k: usize,
        threshold: f32,
    ) -> MemoryResult<Vec<SearchHit>> {
        self.store.read().similar_to(content_id, k, threshold)
    }

    pub fn remove(&self, content_id: &str, rebuild_now: bool) -> MemoryResult<bool> {
        self.store.write().remove(content_id, rebuild_now)
    }

    pub fn remove_batch<S: AsRef<str>>(&self, content_ids: &[S]) -> MemoryResult<usize> {
        self.store.write().remove_batch(content_ids)
    }

    pub fn rebuild(&self) -> MemoryResult<()> {
        self.store.write().rebuild()
    }

    #[must_use]
    pub fn statistics(&self) -> Statistics {
        self.store.read().statistics()
    }

    #[must_use]
    pub fn get(&self, content_id: &str) -> Option<ContentView> {
        self.store.read().get(content_id)
    }

    #[must_use]
    pub fn contains(&self, content_id: &str) -> bool {
        self.store.read().contains(content_id)
    }

    pub fn save(&self) -> MemoryResult<()> {
        self.store.write().save()
    }
}

fn with_text(mut metadata: Metadata, text: &str) -> Metadata {
    metadata.insert(TEXT_KEY.to_string(), text.into());
    metadata.insert(TEXT_LENGTH_KEY.to_string(), text.chars().count().into());
    metadata
}
