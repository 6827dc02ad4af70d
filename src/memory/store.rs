//! Invariant-preserving store over the flat index engine.
//!
//! Records live in one map keyed by internal id. The engine only knows slots,
//! and slot `n` always holds the vector of internal id `n`. Because the engine
//! cannot delete, a removal drops the record from the map and leaves its slot
//! behind as a ghost; [`ContentStore::rebuild`] compacts the live records into
//! a fresh engine and renumbers them from zero.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{MemoryError, MemoryResult};
use crate::memory::{
    ContentView, IndexState, Inconsistency, Metadata, SearchHit, Statistics, StoreFiles,
    StoredRecord,
};
use crate::vector::{FlatIndex, InternalId, VectorDimension, is_unit_norm, normalize};

/// Default number of single insertions between automatic saves.
pub const DEFAULT_SAVE_EVERY: usize = 10;

/// Content store: one record map plus the index engine it mirrors.
#[derive(Debug)]
pub struct ContentStore {
    records: BTreeMap<InternalId, StoredRecord>,
    index: FlatIndex,
    next_id: InternalId,
    state: IndexState,
    files: Option<StoreFiles>,
    save_every: usize,
    unsaved_inserts: usize,
}

impl ContentStore {
    /// Creates an empty store that never touches the disk.
    #[must_use]
    pub fn in_memory(dimension: VectorDimension) -> Self {
        Self {
            records: BTreeMap::new(),
            index: FlatIndex::new(dimension),
            next_id: InternalId::new(0),
            state: IndexState::Clean,
            files: None,
            save_every: DEFAULT_SAVE_EVERY,
            unsaved_inserts: 0,
        }
    }

    /// Opens the store persisted in `dir`, or an empty one if there is none.
    ///
    /// Never fails on bad files: whatever cannot be read is dropped with a
    /// warning and the store starts flagged for rebuild.
    pub fn open(dir: impl Into<PathBuf>, dimension: VectorDimension) -> Self {
        let files = StoreFiles::new(dir);
        let loaded = files.load(dimension);

        let mut store = Self {
            records: loaded.records,
            index: loaded.index,
            next_id: loaded.next_id,
            state: IndexState::Clean,
            files: Some(files),
            save_every: DEFAULT_SAVE_EVERY,
            unsaved_inserts: 0,
        };
        if !loaded.intact || !store.find_inconsistencies().is_empty() {
            store.state = IndexState::NeedsRebuild;
        }

        info!(
            records = store.records.len(),
            index_entries = store.index.len(),
            state = %store.state,
            "Opened content store"
        );
        store
    }

    /// Sets how many single insertions trigger an automatic save.
    pub fn with_save_every(mut self, save_every: usize) -> Self {
        self.save_every = save_every.max(1);
        self
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.index.dimension()
    }

    #[must_use]
    pub fn state(&self) -> IndexState {
        self.state
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Directory the store persists to, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.files.as_ref().map(StoreFiles::dir)
    }

    /// Adds one vector and returns its content id.
    ///
    /// The vector is normalized before storage; an input more than
    /// `NORM_TOLERANCE` away from unit length is logged. A missing content id
    /// is replaced by a fresh UUID. Re-using a live content id creates a
    /// second record.
    pub fn add(
        &mut self,
        vector: &[f32],
        content_id: Option<String>,
        metadata: Option<Metadata>,
    ) -> MemoryResult<String> {
        let vector = self.prepare_vector(vector)?;
        self.ensure_aligned()?;
        let id = self.next_id;
        let next_id = id.next().ok_or(MemoryError::IdSpaceExhausted)?;

        let slot = self.index.add(&vector)?;
        debug_assert_eq!(slot, id.slot());

        let content_id = content_id.unwrap_or_else(generate_content_id);
        self.records.insert(
            id,
            StoredRecord::new(content_id.clone(), metadata.unwrap_or_default(), vector),
        );
        self.next_id = next_id;

        self.unsaved_inserts += 1;
        if self.unsaved_inserts >= self.save_every {
            self.persist();
        }

        debug!(content_id = %content_id, internal_id = %id, "Added record");
        Ok(content_id)
    }

    /// Adds many vectors with one engine insertion and one save.
    ///
    /// All-or-nothing: every vector is validated and the engine insert must
    /// succeed before any record is written. `content_ids` and `metadata`,
    /// when given, must have one entry per vector.
    pub fn add_batch(
        &mut self,
        vectors: &[Vec<f32>],
        content_ids: Option<Vec<String>>,
        metadata: Option<Vec<Metadata>>,
    ) -> MemoryResult<Vec<String>> {
        check_batch_len("content_ids", vectors.len(), content_ids.as_ref())?;
        check_batch_len("metadata", vectors.len(), metadata.as_ref())?;
        if vectors.is_empty() {
            return Ok(Vec::new());
        }

        let prepared = vectors
            .iter()
            .map(|vector| self.prepare_vector(vector))
            .collect::<MemoryResult<Vec<_>>>()?;
        self.ensure_aligned()?;

        let first = self.next_id;
        let last_slot = first.slot() + prepared.len();
        let next_id = InternalId::from_slot(last_slot)?;

        let slots = self.index.add_batch(&prepared)?;
        debug_assert_eq!(slots.start, first.slot());

        let content_ids = content_ids
            .unwrap_or_else(|| prepared.iter().map(|_| generate_content_id()).collect());
        let metadata = metadata.unwrap_or_else(|| vec![Metadata::new(); prepared.len()]);

        for (((slot, vector), content_id), metadata) in slots
            .zip(prepared)
            .zip(content_ids.iter().cloned())
            .zip(metadata)
        {
            let id = InternalId::from_slot(slot)?;
            self.records
                .insert(id, StoredRecord::new(content_id, metadata, vector));
        }
        self.next_id = next_id;

        info!(count = content_ids.len(), "Added record batch");
        self.persist();
        Ok(content_ids)
    }

    /// Top-k records by inner product with `query`, keeping scores at or
    /// above `threshold`.
    ///
    /// Ghost slots and unknown ids are filtered out; the engine is asked for
    /// `k` plus the ghost count so filtering does not shrink the result.
    pub fn search(&self, query: &[f32], k: usize, threshold: f32) -> MemoryResult<Vec<SearchHit>> {
        let (query, _) = self.prepare_query(query)?;
        self.search_normalized(&query, k, threshold, 0, |_| true)
    }

    /// Records most similar to the stored vector of `content_id`, excluding
    /// every record with that content id.
    ///
    /// Returns an empty list for an unknown content id.
    pub fn similar_to(
        &self,
        content_id: &str,
        k: usize,
        threshold: f32,
    ) -> MemoryResult<Vec<SearchHit>> {
        let Some(record) = self.latest(content_id) else {
            return Ok(Vec::new());
        };
        let own = self
            .records
            .values()
            .filter(|record| record.content_id == content_id)
            .count();
        self.search_normalized(&record.vector, k, threshold, own, |hit| {
            hit.content_id != content_id
        })
    }

    /// Removes every live record with `content_id`.
    ///
    /// The engine slots stay behind as ghosts. With `rebuild_now` the engine
    /// is rebuilt immediately; otherwise the store is left `NeedsRebuild`.
    /// Returns `false` when nothing matched.
    pub fn remove(&mut self, content_id: &str, rebuild_now: bool) -> MemoryResult<bool> {
        let removed = self.remove_records(content_id);
        if removed == 0 {
            debug!(content_id, "Remove found no matching record");
            return Ok(false);
        }

        self.state = IndexState::NeedsRebuild;
        if rebuild_now {
            self.rebuild()?;
        } else {
            self.persist();
        }
        Ok(true)
    }

    /// Removes each content id, then rebuilds once.
    pub fn remove_batch<S: AsRef<str>>(&mut self, content_ids: &[S]) -> MemoryResult<usize> {
        let removed = content_ids
            .iter()
            .filter(|content_id| self.remove_records(content_id.as_ref()) > 0)
            .count();
        if removed > 0 {
            self.state = IndexState::NeedsRebuild;
        }
        self.rebuild()?;
        Ok(removed)
    }

    /// Replaces the engine with one holding only live records, renumbered
    /// 0..n-1 in their current order, and saves.
    pub fn rebuild(&mut self) -> MemoryResult<()> {
        let ghosts = self.index.len().saturating_sub(self.records.len());

        let mut index = FlatIndex::with_capacity(self.index.dimension(), self.records.len());
        let mut records = BTreeMap::new();
        for record in self.records.values() {
            let slot = index.add(&record.vector)?;
            records.insert(InternalId::from_slot(slot)?, record.clone());
        }
        let next_id = InternalId::from_slot(index.len())?;

        // Swap only once everything above succeeded
        self.index = index;
        self.records = records;
        self.next_id = next_id;
        self.state = IndexState::Clean;

        info!(records = self.records.len(), ghosts, "Rebuilt index");
        self.persist();
        Ok(())
    }

    /// Counts from every map and the engine, plus detected disagreements.
    #[must_use]
    pub fn statistics(&self) -> Statistics {
        let inconsistencies = self.find_inconsistencies();
        let needs_rebuild = self.state == IndexState::NeedsRebuild || !inconsistencies.is_empty();
        Statistics {
            total_vectors: self.index.len(),
            id_map_entries: self.records.len(),
            metadata_entries: self.records.len(),
            vector_entries: self.records.len(),
            ghost_entries: self.index.len().saturating_sub(self.records.len()),
            dimension: self.index.dimension().get(),
            state: self.state,
            needs_rebuild,
            next_internal_id: self.next_id.get(),
            inconsistencies,
        }
    }

    /// The most recently added live record with `content_id`.
    #[must_use]
    pub fn get(&self, content_id: &str) -> Option<ContentView> {
        self.latest(content_id).map(StoredRecord::view)
    }

    #[must_use]
    pub fn contains(&self, content_id: &str) -> bool {
        self.latest(content_id).is_some()
    }

    /// Writes the store to disk now.
    ///
    /// A no-op for in-memory stores. Automatic saves only log failures; this
    /// is how a caller retries one.
    pub fn save(&mut self) -> MemoryResult<()> {
        if let Some(files) = &self.files {
            files.save(&self.records, &self.index)?;
        }
        self.unsaved_inserts = 0;
        Ok(())
    }

    fn persist(&mut self) {
        if let Err(e) = self.save() {
            warn!(error = %e, "Failed to save content store, in-memory state is kept");
        }
    }

    fn latest(&self, content_id: &str) -> Option<&StoredRecord> {
        self.records
            .values()
            .rev()
            .find(|record| record.content_id == content_id)
    }

    fn remove_records(&mut self, content_id: &str) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, record| record.content_id != content_id);
        before - self.records.len()
    }

    fn prepare_vector(&self, vector: &[f32]) -> MemoryResult<Vec<f32>> {
        let (normalized, norm) = self.prepare_query(vector)?;
        if !is_unit_norm(norm) {
            warn!(norm, "Vector was not unit length, normalized before storage");
        }
        Ok(normalized)
    }

    fn prepare_query(&self, vector: &[f32]) -> MemoryResult<(Vec<f32>, f32)> {
        self.index.dimension().validate_vector(vector)?;
        Ok(normalize(vector)?)
    }

    fn ensure_aligned(&self) -> MemoryResult<()> {
        if self.index.len() != self.next_id.slot() {
            return Err(MemoryError::InconsistentState {
                reason: format!(
                    "index holds {} slots but the next internal id is {}",
                    self.index.len(),
                    self.next_id
                ),
            });
        }
        Ok(())
    }

    fn search_normalized(
        &self,
        query: &[f32],
        k: usize,
        threshold: f32,
        excluded: usize,
        keep: impl Fn(&SearchHit) -> bool,
    ) -> MemoryResult<Vec<SearchHit>> {
        if k == 0 || self.records.is_empty() {
            return Ok(Vec::new());
        }

        // Over-fetch by the number of slots that cannot produce a hit
        let dead_slots = self.index.len().saturating_sub(self.records.len()) + excluded;
        let candidates = self.index.search(query, k.saturating_add(dead_slots))?;
        let unfiltered = candidates.len();

        let hits: Vec<SearchHit> = candidates
            .into_iter()
            .filter(|(_, score)| *score >= threshold)
            .filter_map(|(slot, score)| {
                let id = InternalId::from_slot(slot).ok()?;
                let record = self.records.get(&id)?;
                Some(SearchHit {
                    content_id: record.content_id.clone(),
                    score,
                    metadata: record.metadata.clone(),
                })
            })
            .filter(|hit| keep(hit))
            .take(k)
            .collect();

        debug!(k, threshold, candidates = unfiltered, hits = hits.len(), "Searched index");
        Ok(hits)
    }

    fn find_inconsistencies(&self) -> Vec<Inconsistency> {
        let mut found = Vec::new();

        if self.index.len() != self.records.len() {
            found.push(Inconsistency::IndexCountMismatch {
                index_entries: self.index.len(),
                live_records: self.records.len(),
            });
        }
        if self.index.len() != self.next_id.slot() {
            found.push(Inconsistency::SlotMisaligned {
                next_internal_id: self.next_id.get(),
                index_entries: self.index.len(),
            });
        }
        let missing = self
            .records
            .keys()
            .filter(|id| id.slot() >= self.index.len())
            .count();
        if missing > 0 {
            found.push(Inconsistency::MissingSlots { count: missing });
        }

        found
    }
}

fn generate_content_id() -> String {
    Uuid::new_v4().to_string()
}

fn check_batch_len<T>(
    field: &'static str,
    expected: usize,
    values: Option<&Vec<T>>,
) -> MemoryResult<()> {
    match values {
        Some(values) if values.len() != expected => Err(MemoryError::BatchLengthMismatch {
            field,
            expected,
            actual: values.len(),
        }),
        _ => Ok(()),
    }
}
