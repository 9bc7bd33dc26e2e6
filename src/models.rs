//! Core data structures for report reconciliation.
//!
//! Defines the cell grid shared by the extractor and the renderer, the
//! extracted test metadata and sample rows, canonical report items, batches,
//! abnormality reports and processing statistics.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// A single spreadsheet cell as seen by the reconciliation core
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RawValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
}

static EMPTY_CELL: RawValue = RawValue::Empty;

impl RawValue {
    /// True for empty cells and NaN numbers
    pub fn is_blank(&self) -> bool {
        match self {
            RawValue::Empty => true,
            RawValue::Number(n) => n.is_nan(),
            RawValue::Text(_) => false,
        }
    }

    /// Trimmed string form of the cell, empty for blanks
    pub fn trimmed(&self) -> String {
        if self.is_blank() {
            return String::new();
        }
        self.to_string().trim().to_string()
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Empty => Ok(()),
            RawValue::Text(s) => f.write_str(s),
            // Integers without decimals
            RawValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            RawValue::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            RawValue::Empty
        } else {
            RawValue::Text(value.to_string())
        }
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        if value.is_empty() {
            RawValue::Empty
        } else {
            RawValue::Text(value)
        }
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

/// 2-D, 0-indexed cell grid. Rows may have different lengths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grid {
    rows: Vec<Vec<RawValue>>,
}

impl Grid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<Vec<RawValue>>) -> Self {
        Self { rows }
    }

    /// Number of rows, including trailing rows that are entirely blank
    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Length of the longest row
    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn row(&self, row: usize) -> Option<&[RawValue]> {
        self.rows.get(row).map(Vec::as_slice)
    }

    /// Cell at `(row, col)`; out-of-range coordinates read as empty
    pub fn get(&self, row: usize, col: usize) -> &RawValue {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY_CELL)
    }

    /// Store a value, growing the grid as needed
    pub fn set(&mut self, row: usize, col: usize, value: RawValue) {
        if self.rows.len() <= row {
            self.rows.resize_with(row + 1, Vec::new);
        }
        let cells = &mut self.rows[row];
        if cells.len() <= col {
            cells.resize(col + 1, RawValue::Empty);
        }
        cells[col] = value;
    }

    /// Iterate non-empty cells as `(row, col, value)`
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, &RawValue)> {
        self.rows.iter().enumerate().flat_map(|(r, cells)| {
            cells
                .iter()
                .enumerate()
                .filter(|(_, v)| !v.is_blank())
                .map(move |(c, v)| (r, c, v))
        })
    }
}

/// Metadata of one source test item, read from the positional header rows
#[derive(Debug, Clone, PartialEq)]
pub struct TestItemMetadata {
    pub name: String,
    /// Up to three bias conditions; blank cells become empty strings
    pub bias_conditions: Vec<String>,
    pub min_limit: Option<RawValue>,
    pub max_limit: Option<RawValue>,
    pub source_column: usize,
}

/// A source row recognised as a sample measurement
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRow {
    pub sample_id: String,
    /// Row index in the source grid, kept for audit messages
    pub source_row: usize,
    /// The whole source row, addressed by source column
    pub cells: Vec<RawValue>,
}

impl SampleRow {
    pub fn cell(&self, col: usize) -> &RawValue {
        self.cells.get(col).unwrap_or(&EMPTY_CELL)
    }
}

/// A limit cell together with its parsed magnitude
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedLimit {
    pub raw: RawValue,
    /// `None` when the limit text does not parse as a number
    pub value: Option<f64>,
}

/// A report-template item fed by one or more source items
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CanonicalItem {
    pub key: String,
    /// Aliases that matched a source item, in configured order
    pub source_aliases: Vec<String>,
    pub conditions: Vec<String>,
    pub min_limits: Vec<Option<NormalizedLimit>>,
    pub max_limits: Vec<Option<NormalizedLimit>>,
    pub source_columns: Vec<usize>,
}

impl CanonicalItem {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    /// Number of contributing source columns
    pub fn contribution_count(&self) -> usize {
        self.source_columns.len()
    }

    /// True when at least one limit parsed numerically
    pub fn has_numeric_limits(&self) -> bool {
        self.min_limits
            .iter()
            .chain(&self.max_limits)
            .flatten()
            .any(|limit| limit.value.is_some())
    }
}

/// Result of normalizing a raw cell
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedValue {
    Empty,
    Numeric { value: f64, precision: usize },
    /// Reading beyond the measurable range
    Overflow,
    /// Non-numeric text kept as-is
    Text(String),
}

impl NormalizedValue {
    /// Magnitude used for limit checks; overflow compares as +infinity
    pub fn comparison_value(&self) -> Option<f64> {
        match self {
            NormalizedValue::Numeric { value, .. } => Some(*value),
            NormalizedValue::Overflow => Some(f64::INFINITY),
            NormalizedValue::Empty | NormalizedValue::Text(_) => None,
        }
    }

    pub fn is_overflow(&self) -> bool {
        matches!(self, NormalizedValue::Overflow)
    }

    /// True for numeric and overflow readings
    pub fn is_valid(&self) -> bool {
        matches!(self, NormalizedValue::Numeric { .. } | NormalizedValue::Overflow)
    }
}

/// A sample placed into a batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRow {
    pub sample: SampleRow,
    pub prefix: String,
    pub number: i64,
    /// 1-based position local to the batch
    pub local_index: usize,
}

/// Samples routed to one destination sheet
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub batch_id: String,
    pub range_start: i64,
    pub range_end: i64,
    pub target_sheet: usize,
    pub rows: Vec<BatchRow>,
}

/// Why a sample row was judged abnormal
#[derive(Debug, Clone, PartialEq)]
pub struct AbnormalHit {
    pub item: String,
    pub column: usize,
    pub raw: String,
    pub overflow: bool,
}

impl fmt::Display for AbnormalHit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.overflow {
            write!(f, "{}={} (overflow)", self.item, self.raw)
        } else {
            write!(f, "{}={} (out of limits)", self.item, self.raw)
        }
    }
}

/// Abnormality totals for one batch
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AbnormalityReport {
    pub batch_id: String,
    pub abnormal_row_count: usize,
    pub per_row_flags: BTreeMap<String, bool>,
    pub overflow_rows: usize,
    pub out_of_limit_rows: usize,
    /// First abnormal reading per abnormal sample
    pub hits: Vec<(String, AbnormalHit)>,
}

/// Category of a recoverable finding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    MissingAlias,
    DuplicateItemName,
    MissingLimits,
    UnparseableSampleNumber,
    UnassignedSample,
    ConditionsTruncated,
    SheetOutOfRange,
    MissingCountPosition,
    MissingTemplateSheet,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DiagnosticKind::MissingAlias => "missing alias",
            DiagnosticKind::DuplicateItemName => "duplicate item",
            DiagnosticKind::MissingLimits => "missing limits",
            DiagnosticKind::UnparseableSampleNumber => "bad sample number",
            DiagnosticKind::UnassignedSample => "unassigned sample",
            DiagnosticKind::ConditionsTruncated => "conditions truncated",
            DiagnosticKind::SheetOutOfRange => "sheet out of range",
            DiagnosticKind::MissingCountPosition => "missing count position",
            DiagnosticKind::MissingTemplateSheet => "missing template sheet",
        };
        f.write_str(label)
    }
}

/// A recoverable finding, attributable to a file and optionally a sample
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub file: Option<PathBuf>,
    pub sample_id: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            file: None,
            sample_id: None,
            message: message.into(),
        }
    }

    pub fn for_sample(mut self, sample_id: impl Into<String>) -> Self {
        self.sample_id = Some(sample_id.into());
        self
    }

    pub fn in_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(file) = &self.file {
            write!(f, "{}: ", file.display())?;
        }
        write!(f, "[{}] ", self.kind)?;
        if let Some(sample) = &self.sample_id {
            write!(f, "sample {}: ", sample)?;
        }
        f.write_str(&self.message)
    }
}

/// Outcome of reconciling one source workbook
#[derive(Debug, Default)]
pub struct FileOutcome {
    pub source: PathBuf,
    pub output: Option<PathBuf>,
    pub samples: usize,
    pub reports: Vec<AbnormalityReport>,
    pub diagnostics: Vec<Diagnostic>,
}

impl FileOutcome {
    pub fn abnormal_rows(&self) -> usize {
        self.reports.iter().map(|r| r.abnormal_row_count).sum()
    }
}

/// Processing statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub files_discovered: usize,
    pub files_processed: usize,
    pub files_failed: usize,
    pub samples_processed: usize,
    pub batches_written: usize,
    pub abnormal_rows: usize,
    pub output_dir: PathBuf,
    pub processing_time_ms: u128,
    /// Failed files with the error text
    pub failures: Vec<(PathBuf, String)>,
    pub diagnostics: Vec<Diagnostic>,
    pub error_report: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_value_display() {
        assert_eq!(RawValue::Number(650.0).to_string(), "650");
        assert_eq!(RawValue::Number(-1.25).to_string(), "-1.25");
        assert_eq!(RawValue::from(" 650V ").trimmed(), "650V");
        assert_eq!(RawValue::Number(f64::NAN).trimmed(), "");
        assert_eq!(RawValue::from(""), RawValue::Empty);
    }

    #[test]
    fn test_grid_get_and_set() {
        let mut grid = Grid::new();
        assert_eq!(grid.get(3, 3), &RawValue::Empty);

        grid.set(2, 4, RawValue::Number(1.0));
        assert_eq!(grid.height(), 3);
        assert_eq!(grid.width(), 5);
        assert_eq!(grid.get(2, 4), &RawValue::Number(1.0));
        assert_eq!(grid.row(0), Some(&[][..]));

        let cells: Vec<_> = grid.cells().collect();
        assert_eq!(cells, vec![(2, 4, &RawValue::Number(1.0))]);
    }

    #[test]
    fn test_overflow_compares_as_infinity() {
        assert_eq!(
            NormalizedValue::Overflow.comparison_value(),
            Some(f64::INFINITY)
        );
        assert_eq!(NormalizedValue::Empty.comparison_value(), None);
        assert_eq!(
            NormalizedValue::Text("open".into()).comparison_value(),
            None
        );
    }

    #[test]
    fn test_diagnostic_display_attribution() {
        let diag = Diagnostic::new(DiagnosticKind::UnparseableSampleNumber, "suffix 'x' is not a number")
            .for_sample("Px")
            .in_file("lot_a.xlsx");
        assert_eq!(
            diag.to_string(),
            "lot_a.xlsx: [bad sample number] sample Px: suffix 'x' is not a number"
        );
    }
}
