//! On-disk layout of a content store.
//!
//! A store directory holds four files:
//!
//! - `index.bin`: the engine's own binary format
//! - `metadata.json`: internal id → `{content_id, metadata, created_at, vector_norm}`
//! - `id_map.json`: internal id → content id
//! - `vectors.json`: internal id → stored vector
//!
//! Every file is written to a temporary sibling and renamed into place, so a
//! crash leaves either the old or the new version of each file. Loading never
//! fails: unreadable files degrade to an empty store, partial records are
//! dropped, and anything short of a perfect match leaves the store flagged
//! for rebuild.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{MemoryError, MemoryResult};
use crate::memory::{Metadata, StoredRecord};
use crate::vector::{
    FlatIndex, InternalId, NORM_TOLERANCE, VectorDimension, is_unit_norm, l2_norm, normalize,
};

pub const INDEX_FILE: &str = "index.bin";
pub const METADATA_FILE: &str = "metadata.json";
pub const ID_MAP_FILE: &str = "id_map.json";
pub const VECTORS_FILE: &str = "vectors.json";

/// Per-record entry of `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetadataEntry {
    content_id: String,
    metadata: Metadata,
    created_at: DateTime<Utc>,
    vector_norm: f32,
}

/// Paths of the four files inside a store directory.
#[derive(Debug, Clone)]
pub struct StoreFiles {
    dir: PathBuf,
}

/// What [`StoreFiles::load`] recovered from disk.
#[derive(Debug)]
pub struct LoadedStore {
    pub records: BTreeMap<InternalId, StoredRecord>,
    pub index: FlatIndex,
    /// Next internal id to hand out
    pub next_id: InternalId,
    /// False when anything had to be dropped or replaced while loading
    pub intact: bool,
}

impl StoreFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    pub fn id_map_path(&self) -> PathBuf {
        self.dir.join(ID_MAP_FILE)
    }

    pub fn vectors_path(&self) -> PathBuf {
        self.dir.join(VECTORS_FILE)
    }

    /// True when any of the four files is present.
    pub fn exists(&self) -> bool {
        [
            self.index_path(),
            self.metadata_path(),
            self.id_map_path(),
            self.vectors_path(),
        ]
        .iter()
        .any(|path| path.exists())
    }

    /// Writes all four files.
    pub fn save(
        &self,
        records: &BTreeMap<InternalId, StoredRecord>,
        index: &FlatIndex,
    ) -> MemoryResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| MemoryError::PersistenceError {
            path: self.dir.clone(),
            source: Box::new(e),
        })?;

        let mut metadata = BTreeMap::new();
        let mut id_map = BTreeMap::new();
        let mut vectors = BTreeMap::new();
        for (id, record) in records {
            let key = id.to_string();
            metadata.insert(
                key.clone(),
                MetadataEntry {
                    content_id: record.content_id.clone(),
                    metadata: record.metadata.clone(),
                    created_at: record.created_at,
                    vector_norm: l2_norm(&record.vector),
                },
            );
            id_map.insert(key.clone(), record.content_id.as_str());
            vectors.insert(key, record.vector.as_slice());
        }

        write_json_atomic(&self.metadata_path(), &metadata)?;
        write_json_atomic(&self.id_map_path(), &id_map)?;
        write_json_atomic(&self.vectors_path(), &vectors)?;

        let index_path = self.index_path();
        index
            .save(&index_path)
            .map_err(|e| MemoryError::PersistenceError {
                path: index_path,
                source: Box::new(e),
            })?;

        debug!(
            dir = %self.dir.display(),
            records = records.len(),
            index_entries = index.len(),
            "Saved content store"
        );
        Ok(())
    }

    /// Reads the store back, tolerating missing or damaged files.
    pub fn load(&self, dimension: VectorDimension) -> LoadedStore {
        let mut intact = true;

        let metadata: HashMap<String, MetadataEntry> =
            read_json_or_empty(&self.metadata_path(), &mut intact);
        let id_map: HashMap<String, String> = read_json_or_empty(&self.id_map_path(), &mut intact);
        let vectors: HashMap<String, Vec<f32>> =
            read_json_or_empty(&self.vectors_path(), &mut intact);

        let keys: BTreeSet<&String> = metadata
            .keys()
            .chain(id_map.keys())
            .chain(vectors.keys())
            .collect();
        let total_keys = keys.len();

        let mut records = BTreeMap::new();
        let mut renormalized = 0usize;
        for (key, entry) in &metadata {
            let Some(id) = InternalId::parse_key(key) else {
                continue;
            };
            let (Some(content_id), Some(vector)) = (id_map.get(key), vectors.get(key)) else {
                continue;
            };
            if *content_id != entry.content_id || dimension.validate_vector(vector).is_err() {
                continue;
            }
            let Ok((unit, norm)) = normalize(vector) else {
                continue;
            };
            if !is_unit_norm(norm) {
                renormalized += 1;
            }
            records.insert(
                id,
                StoredRecord {
                    content_id: entry.content_id.clone(),
                    metadata: entry.metadata.clone(),
                    vector: unit,
                    created_at: entry.created_at,
                },
            );
        }

        if renormalized > 0 {
            warn!(
                dir = %self.dir.display(),
                renormalized,
                "Stored vectors were not unit length, renormalized while loading"
            );
        }

        let dropped = total_keys - records.len();
        if dropped > 0 {
            warn!(
                dir = %self.dir.display(),
                dropped,
                "Dropped partial records while loading content store"
            );
            intact = false;
        }

        let next_from_records = records
            .keys()
            .next_back()
            .and_then(InternalId::next)
            .unwrap_or(InternalId::new(0));

        let mut index = self.load_index(dimension, &mut intact);
        if let Some(id) = first_stale_slot(&records, &index) {
            warn!(
                dir = %self.dir.display(),
                internal_id = %id,
                "Index file does not match the stored vectors, starting with an empty index"
            );
            index = FlatIndex::new(dimension);
            intact = false;
        }
        // Ghost slots past the last live record still occupy ids
        let next_id = InternalId::from_slot(index.len())
            .unwrap_or(next_from_records)
            .max(next_from_records);

        LoadedStore {
            records,
            index,
            next_id,
            intact,
        }
    }

    fn load_index(&self, dimension: VectorDimension, intact: &mut bool) -> FlatIndex {
        let path = self.index_path();
        if !path.exists() {
            if self.exists() {
                warn!(path = %path.display(), "Index file missing, starting with an empty index");
                *intact = false;
            }
            return FlatIndex::new(dimension);
        }

        match FlatIndex::load(&path) {
            Ok(index) if index.dimension() == dimension => index,
            Ok(index) => {
                warn!(
                    path = %path.display(),
                    expected = dimension.get(),
                    actual = index.dimension().get(),
                    "Index file has the wrong dimension, starting with an empty index"
                );
                *intact = false;
                FlatIndex::new(dimension)
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to load index file, starting with an empty index"
                );
                *intact = false;
                FlatIndex::new(dimension)
            }
        }
    }
}

/// Finds the first record whose engine slot is missing or holds a different
/// vector, which happens when `index.bin` is older than the JSON files.
fn first_stale_slot(
    records: &BTreeMap<InternalId, StoredRecord>,
    index: &FlatIndex,
) -> Option<InternalId> {
    records.iter().find_map(|(id, record)| {
        let matches = index.vector(id.slot()).is_some_and(|slot| {
            slot.iter()
                .zip(&record.vector)
                .all(|(a, b)| (a - b).abs() <= NORM_TOLERANCE)
        });
        (!matches).then_some(*id)
    })
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> MemoryResult<()> {
    let persistence_error = |source: Box<dyn std::error::Error + Send + Sync>| {
        MemoryError::PersistenceError {
            path: path.to_path_buf(),
            source,
        }
    };

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let temp = NamedTempFile::new_in(parent).map_err(|e| persistence_error(Box::new(e)))?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        serde_json::to_writer(&mut writer, value).map_err(|e| persistence_error(Box::new(e)))?;
        writer.flush().map_err(|e| persistence_error(Box::new(e)))?;
    }
    temp.as_file()
        .sync_all()
        .map_err(|e| persistence_error(Box::new(e)))?;
    temp.persist(path)
        .map_err(|e| persistence_error(Box::new(e.error)))?;
    Ok(())
}

fn read_json_or_empty<T: DeserializeOwned + Default>(path: &Path, intact: &mut bool) -> T {
    let contents = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read store file, treating it as empty");
            *intact = false;
            return T::default();
        }
    };

    match serde_json::from_slice(&contents) {
        Ok(value) => value,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Store file is corrupt, treating it as empty");
            *intact = false;
            T::default()
        }
    }
}
