//! Flat inner-product index engine.
//!
//! The engine keeps every inserted vector in one contiguous buffer and answers
//! exact top-k queries by inner product. Its contract is deliberately narrow:
//!
//! - vectors are appended, each one occupying the next slot
//! - search returns `(slot, score)` pairs, highest score first
//! - there is no way to remove a slot; callers that need deletion rebuild a
//!   fresh engine from the vectors they want to keep
//! - the whole engine round-trips through a single binary file
//!
//! # File Format
//!
//! - Header (16 bytes): magic, version, dimension, vector count
//! - Vectors: contiguous f32 arrays in little-endian format, in slot order

use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::Path;

use memmap2::MmapOptions;
use tempfile::NamedTempFile;

use crate::vector::{VectorDimension, VectorError, inner_product};

/// Current index file format version.
const INDEX_VERSION: u32 = 1;

/// Size of the file header in bytes.
const HEADER_SIZE: usize = 16;

/// Magic bytes to identify index files.
const MAGIC_BYTES: &[u8; 4] = b"CMIX";

/// Number of bytes per f32 value.
const BYTES_PER_F32: usize = 4;

/// Append-only exact inner-product index.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    /// Flattened slot data, `dimension` floats per slot
    data: Vec<f32>,

    /// Vector dimension for validation
    dimension: VectorDimension,
}

impl FlatIndex {
    /// Creates an empty index for vectors of the given dimension.
    #[must_use]
    pub fn new(dimension: VectorDimension) -> Self {
        Self {
            data: Vec::new(),
            dimension,
        }
    }

    /// Creates an empty index with room for `capacity` vectors.
    #[must_use]
    pub fn with_capacity(dimension: VectorDimension, capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity * dimension.get()),
            dimension,
        }
    }

    /// Number of occupied slots, including slots whose owner was removed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() / self.dimension.get()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// Appends one vector and returns the slot it landed in.
    pub fn add(&mut self, vector: &[f32]) -> Result<usize, VectorError> {
        self.dimension.validate_vector(vector)?;
        let slot = self.len();
        self.data.extend_from_slice(vector);
        Ok(slot)
    }

    /// Appends a batch of vectors.
    ///
    /// Every vector is validated before anything is written, so a failed
    /// batch leaves the index untouched. Returns the range of slots used.
    pub fn add_batch(&mut self, vectors: &[Vec<f32>]) -> Result<Range<usize>, VectorError> {
        for vector in vectors {
            self.dimension.validate_vector(vector)?;
        }

        let start = self.len();
        self.data.reserve(vectors.len() * self.dimension.get());
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(start..self.len())
    }

    /// Returns the vector stored in a slot.
    #[must_use]
    pub fn vector(&self, slot: usize) -> Option<&[f32]> {
        let dim = self.dimension.get();
        let start = slot.checked_mul(dim)?;
        self.data.get(start..start + dim)
    }

    /// Searches for the k slots with the highest inner product.
    ///
    /// # Returns
    /// `(slot, score)` pairs sorted by score (highest first). Equal scores keep
    /// slot order.
    #[must_use = "Search results should be processed to retrieve relevant vectors"]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, VectorError> {
        self.dimension.validate_vector(query)?;

        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dimension.get())
            .enumerate()
            .map(|(slot, vector)| (slot, inner_product(query, vector)))
            .collect();

        // Stable sort keeps lower slots first on ties
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
        candidates.truncate(k);

        Ok(candidates)
    }

    /// Writes the index to `path`, replacing any existing file atomically.
    pub fn save(&self, path: &Path) -> Result<(), VectorError> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let count = u32::try_from(self.len()).map_err(|_| VectorError::IdSpaceExhausted)?;
        let dimension = u32::try_from(self.dimension.get()).map_err(|_| {
            VectorError::InvalidDimension {
                dimension: self.dimension.get(),
                reason: "Dimension does not fit the index header",
            }
        })?;

        let temp = NamedTempFile::new_in(parent)?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            writer.write_all(MAGIC_BYTES)?;
            writer.write_all(&INDEX_VERSION.to_le_bytes())?;
            writer.write_all(&dimension.to_le_bytes())?;
            writer.write_all(&count.to_le_bytes())?;
            for value in &self.data {
                writer.write_all(&value.to_le_bytes())?;
            }
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| VectorError::Storage(e.error))?;
        Ok(())
    }

    /// Reads an index previously written by [`FlatIndex::save`].
    pub fn load(path: &Path) -> Result<Self, VectorError> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if (len as usize) < HEADER_SIZE {
            return Err(VectorError::InvalidFormat(
                "File too small to contain header".to_string(),
            ));
        }

        // SAFETY: the file is opened read-only and only read while mapped.
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        if &mmap[0..4] != MAGIC_BYTES {
            return Err(VectorError::InvalidFormat(
                "Invalid magic bytes".to_string(),
            ));
        }

        let version = read_u32(&mmap, 4);
        if version != INDEX_VERSION {
            return Err(VectorError::VersionMismatch {
                expected: INDEX_VERSION,
                actual: version,
            });
        }

        let dimension = VectorDimension::new(read_u32(&mmap, 8) as usize)?;
        let count = read_u32(&mmap, 12) as usize;

        let expected_len = HEADER_SIZE + count * dimension.get() * BYTES_PER_F32;
        if mmap.len() != expected_len {
            return Err(VectorError::InvalidFormat(format!(
                "Expected {expected_len} bytes for {count} vectors, found {}",
                mmap.len()
            )));
        }

        let data = mmap[HEADER_SIZE..]
            .chunks_exact(BYTES_PER_F32)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok(Self { data, dimension })
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dim(n: usize) -> VectorDimension {
        VectorDimension::new(n).unwrap()
    }

    #[test]
    fn test_add_assigns_sequential_slots() {
        let mut index = FlatIndex::new(dim(2));
        assert!(index.is_empty());
        assert_eq!(index.add(&[1.0, 0.0]).unwrap(), 0);
        assert_eq!(index.add(&[0.0, 1.0]).unwrap(), 1);
        assert_eq!(index.add_batch(&[vec![0.6, 0.8], vec![0.8, 0.6]]).unwrap(), 2..4);
        assert_eq!(index.len(), 4);
        assert_eq!(index.vector(2), Some(&[0.6, 0.8][..]));
        assert_eq!(index.vector(4), None);
    }

    #[test]
    fn test_failed_batch_leaves_index_untouched() {
        let mut index = FlatIndex::new(dim(2));
        index.add(&[1.0, 0.0]).unwrap();

        let result = index.add_batch(&[vec![0.0, 1.0], vec![1.0]]);
        assert!(matches!(result, Err(VectorError::DimensionMismatch { .. })));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_search_orders_by_inner_product() {
        let mut index = FlatIndex::new(dim(2));
        index.add(&[0.0, 1.0]).unwrap();
        index.add(&[1.0, 0.0]).unwrap();
        index.add(&[0.6, 0.8]).unwrap();

        let results = index.search(&[1.0, 0.0], 3).unwrap();
        let slots: Vec<usize> = results.iter().map(|(slot, _)| *slot).collect();
        assert_eq!(slots, vec![1, 2, 0]);
        assert!((results[0].1 - 1.0).abs() < 1e-6);

        let top1 = index.search(&[1.0, 0.0], 1).unwrap();
        assert_eq!(top1.len(), 1);
        assert!(index.search(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_search_ties_keep_slot_order() {
        let mut index = FlatIndex::new(dim(2));
        index.add(&[1.0, 0.0]).unwrap();
        index.add(&[1.0, 0.0]).unwrap();
        index.add(&[1.0, 0.0]).unwrap();

        let slots: Vec<usize> = index
            .search(&[1.0, 0.0], 3)
            .unwrap()
            .into_iter()
            .map(|(slot, _)| slot)
            .collect();
        assert_eq!(slots, vec![0, 1, 2]);
    }

    #[test]
    fn test_search_validates_query_dimension() {
        let index = FlatIndex::new(dim(3));
        assert!(index.search(&[1.0], 5).is_err());
        assert!(index.search(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.bin");

        let mut index = FlatIndex::new(dim(3));
        index
            .add_batch(&[vec![0.1, 0.2, 0.3], vec![-1.5, 2.25, 1e-7]])
            .unwrap();
        index.save(&path).unwrap();

        let loaded = FlatIndex::load(&path).unwrap();
        assert_eq!(loaded, index);
    }

    #[test]
    fn test_empty_index_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.bin");

        FlatIndex::new(dim(4)).save(&path).unwrap();
        let loaded = FlatIndex::load(&path).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.dimension(), dim(4));
    }

    #[test]
    fn test_load_rejects_corrupt_files() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.bin");

        std::fs::write(&path, b"short").unwrap();
        assert!(matches!(
            FlatIndex::load(&path),
            Err(VectorError::InvalidFormat(_))
        ));

        std::fs::write(&path, b"XXXX\x01\0\0\0\x02\0\0\0\0\0\0\0").unwrap();
        assert!(matches!(
            FlatIndex::load(&path),
            Err(VectorError::InvalidFormat(_))
        ));

        // Header claims one vector but carries no data
        std::fs::write(&path, b"CMIX\x01\0\0\0\x02\0\0\0\x01\0\0\0").unwrap();
        assert!(matches!(
            FlatIndex::load(&path),
            Err(VectorError::InvalidFormat(_))
        ));

        std::fs::write(&path, b"CMIX\x09\0\0\0\x02\0\0\0\0\0\0\0").unwrap();
        assert!(matches!(
            FlatIndex::load(&path),
            Err(VectorError::VersionMismatch { actual: 9, .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = FlatIndex::load(&temp_dir.path().join("missing.bin"));
        assert!(matches!(result, Err(VectorError::Storage(_))));
    }
}
