//! Self-diagnostics for the content store.

use serde::Serialize;

/// Whether the engine mirrors the live record set exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    /// Every engine slot belongs to a live record
    Clean,
    /// The engine holds ghost slots or disagrees with the records; search
    /// still filters ghosts, but only `rebuild` restores `Clean`
    NeedsRebuild,
}

impl std::fmt::Display for IndexState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clean => write!(f, "clean"),
            Self::NeedsRebuild => write!(f, "needs_rebuild"),
        }
    }
}

/// A disagreement found between the record maps and the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Inconsistency {
    /// The engine holds more or fewer vectors than there are live records
    IndexCountMismatch {
        index_entries: usize,
        live_records: usize,
    },
    /// The next internal id does not address the next engine slot, so new
    /// records would land in the wrong slot
    SlotMisaligned {
        next_internal_id: u32,
        index_entries: usize,
    },
    /// Live records whose internal id has no engine slot
    MissingSlots { count: usize },
}

impl std::fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IndexCountMismatch {
                index_entries,
                live_records,
            } => write!(
                f,
                "index holds {index_entries} vectors for {live_records} live records"
            ),
            Self::SlotMisaligned {
                next_internal_id,
                index_entries,
            } => write!(
                f,
                "next internal id {next_internal_id} does not match index size {index_entries}"
            ),
            Self::MissingSlots { count } => {
                write!(f, "{count} live records have no index slot")
            }
        }
    }
}

/// Snapshot of the store's counters.
///
/// Two snapshots taken with no mutation in between compare equal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    /// Vectors held by the engine, ghosts included
    pub total_vectors: usize,
    pub id_map_entries: usize,
    pub metadata_entries: usize,
    pub vector_entries: usize,
    /// Engine slots left behind by removals, pending rebuild
    pub ghost_entries: usize,
    pub dimension: usize,
    pub state: IndexState,
    pub needs_rebuild: bool,
    pub next_internal_id: u32,
    pub inconsistencies: Vec<Inconsistency>,
}

impl Statistics {
    /// True when all counts agree and nothing is pending.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.inconsistencies.is_empty() && !self.needs_rebuild
    }
}
