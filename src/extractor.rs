//! Positional extraction of test metadata and sample rows.
//!
//! Source reports carry their test definitions in fixed header rows (item
//! name, up to three bias conditions, min and max limit) starting at a
//! configured column, followed by one row per sample identified by its ID
//! prefix.

use crate::config::{RecognitionConfig, SamplePrefixes, SourceLayout};
use crate::error::{ReconcileError, Result};
use crate::models::{Diagnostic, DiagnosticKind, Grid, RawValue, SampleRow, TestItemMetadata};
use tracing::{debug, warn};

/// Test items in source column order, addressable by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemMetadataSet {
    items: Vec<TestItemMetadata>,
    /// Repeated item names; the later column replaced the earlier one
    pub diagnostics: Vec<Diagnostic>,
}

impl ItemMetadataSet {
    pub fn get(&self, name: &str) -> Option<&TestItemMetadata> {
        self.items.iter().find(|item| item.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Add an item; a repeated name takes the later column in place
    fn insert(&mut self, item: TestItemMetadata) {
        let Some(existing) = self.items.iter_mut().find(|e| e.name == item.name) else {
            self.items.push(item);
            return;
        };

        let message = format!(
            "item '{}' repeats in column {}, replacing column {}",
            item.name, item.source_column, existing.source_column
        );
        warn!("{}", message);
        self.diagnostics
            .push(Diagnostic::new(DiagnosticKind::DuplicateItemName, message));
        *existing = item;
    }
}

/// Read test item definitions from the configured header rows
pub fn extract_metadata(grid: &Grid, layout: &SourceLayout) -> Result<ItemMetadataSet> {
    let required = layout.required_rows();
    if grid.height() < required {
        return Err(ReconcileError::Structural {
            required,
            found: grid.height(),
        });
    }

    let names = grid.row(layout.item_name_row).unwrap_or_default();
    let mut set = ItemMetadataSet::default();

    for (col, name) in names.iter().enumerate().skip(layout.test_items_start_col) {
        let name = name.trimmed();
        if name.is_empty() {
            continue;
        }

        let bias_conditions = layout
            .bias_rows
            .iter()
            .map(|&row| grid.get(row, col).trimmed())
            .collect();

        let item = TestItemMetadata {
            name,
            bias_conditions,
            min_limit: limit_cell(grid, layout.min_limit_row, col),
            max_limit: limit_cell(grid, layout.max_limit_row, col),
            source_column: col,
        };
        debug!("Test item {} -> column {}", item.name, col);
        set.insert(item);
    }

    debug!("Extracted {} test items", set.len());
    Ok(set)
}

fn limit_cell(grid: &Grid, row: usize, col: usize) -> Option<RawValue> {
    let cell = grid.get(row, col);
    if cell.is_blank() {
        None
    } else {
        Some(cell.clone())
    }
}

/// Collect sample rows whose ID starts with a recognised prefix
pub fn extract_samples(
    grid: &Grid,
    layout: &SourceLayout,
    recognition: &RecognitionConfig,
    prefixes: &SamplePrefixes,
) -> Vec<SampleRow> {
    let start = layout.data_start_row;
    let end = grid
        .height()
        .min(start.saturating_add(recognition.max_data_rows));
    let mut samples = Vec::new();

    for row in start..end {
        let cells = grid.row(row).unwrap_or_default();
        let id_cell = grid.get(row, layout.sample_id_col);

        if id_cell.is_blank() {
            if recognition.skip_empty_rows || !recognition.auto_detect_data_end {
                continue;
            }
            debug!("Blank sample ID at row {}, end of data", row);
            break;
        }

        let sample_id = id_cell.trimmed();
        if prefixes.matches(&sample_id) {
            debug!("Sample {} at row {}", sample_id, row);
            samples.push(SampleRow {
                sample_id,
                source_row: row,
                cells: cells.to_vec(),
            });
        }
    }

    debug!("Extracted {} sample rows", samples.len());
    samples
}
