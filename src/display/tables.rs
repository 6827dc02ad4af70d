//! Table formatting utilities for structured output.

use comfy_table::{
    Attribute, Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
};

use crate::memory::{IndexState, SearchHit, Statistics, TEXT_KEY};

/// Longest text preview shown in a results table.
const PREVIEW_CHARS: usize = 60;

/// Builder for creating formatted tables.
pub struct TableBuilder {
    table: Table,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBuilder {
    /// Create a new table builder.
    pub fn new() -> Self {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        // Apply rounded corners
        table.apply_modifier(UTF8_ROUND_CORNERS);
        Self { table }
    }

    /// Set the table headers.
    pub fn set_headers(mut self, headers: Vec<&str>) -> Self {
        let header_cells: Vec<Cell> = headers
            .into_iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
            .collect();
        self.table.set_header(header_cells);
        self
    }

    /// Add a row to the table.
    pub fn add_row(mut self, row: Vec<String>) -> Self {
        self.table.add_row(row);
        self
    }

    /// Build and return the formatted table.
    pub fn build(self) -> String {
        self.table.to_string()
    }
}

/// Create a store statistics table.
pub fn create_stats_table(stats: &Statistics) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.apply_modifier(UTF8_ROUND_CORNERS);

    table.set_header(vec![
        Cell::new("Metric").add_attribute(Attribute::Bold),
        Cell::new("Value").add_attribute(Attribute::Bold),
    ]);

    table.add_row(vec!["Index vectors", &stats.total_vectors.to_string()]);
    table.add_row(vec!["Id map entries", &stats.id_map_entries.to_string()]);
    table.add_row(vec!["Metadata entries", &stats.metadata_entries.to_string()]);
    table.add_row(vec!["Vector entries", &stats.vector_entries.to_string()]);
    table.add_row(vec!["Ghost entries", &stats.ghost_entries.to_string()]);
    table.add_row(vec!["Dimension", &stats.dimension.to_string()]);
    table.add_row(vec!["Next internal id", &stats.next_internal_id.to_string()]);

    let (state_text, color) = match (stats.state, stats.needs_rebuild) {
        (IndexState::Clean, false) => ("✓ clean".to_string(), Color::Green),
        (state, _) => (format!("⚠ {state}"), Color::Yellow),
    };
    table.add_row(vec![
        Cell::new("State"),
        Cell::new(state_text)
            .fg(color)
            .add_attribute(Attribute::Bold),
    ]);

    for inconsistency in &stats.inconsistencies {
        table.add_row(vec![
            Cell::new("Inconsistency"),
            Cell::new(inconsistency.to_string()).fg(Color::Red),
        ]);
    }

    table.to_string()
}

/// Create a search results table.
pub fn create_results_table(hits: &[SearchHit]) -> String {
    let mut builder = TableBuilder::new().set_headers(vec!["#", "Content id", "Score", "Text"]);

    for (rank, hit) in hits.iter().enumerate() {
        let text = hit
            .metadata
            .get(TEXT_KEY)
            .and_then(|value| value.as_str())
            .map(preview)
            .unwrap_or_default();
        builder = builder.add_row(vec![
            (rank + 1).to_string(),
            hit.content_id.clone(),
            format!("{:.4}", hit.score),
            text,
        ]);
    }

    builder.build()
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(PREVIEW_CHARS - 1).collect();
    format!("{cut}…")
}
