//! Spreadsheet loading into in-memory sheets.
//!
//! Source reports and the report template are read with calamine (xlsx, xls,
//! xlsm, ods). Cells land at their absolute worksheet coordinates so the
//! configured positional layout addresses them directly.

use crate::error::{ReconcileError, Result};
use crate::models::{Grid, RawValue};
use crate::renderer::ReportSheet;
use calamine::{Data, Range, Reader, Sheets, open_workbook_auto};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A named worksheet: its cell values, the cells written since loading and
/// the cells flagged for highlight
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    name: String,
    grid: Grid,
    edits: BTreeSet<(usize, usize)>,
    highlights: BTreeSet<(usize, usize)>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_grid(name: impl Into<String>, grid: Grid) -> Self {
        Self {
            name: name.into(),
            grid,
            ..Default::default()
        }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Cells written through `set_value`
    pub fn edits(&self) -> &BTreeSet<(usize, usize)> {
        &self.edits
    }

    pub fn highlights(&self) -> &BTreeSet<(usize, usize)> {
        &self.highlights
    }

    pub fn is_highlighted(&self, row: usize, col: usize) -> bool {
        self.highlights.contains(&(row, col))
    }
}

impl ReportSheet for Sheet {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_value(&mut self, row: usize, col: usize, value: RawValue) {
        self.grid.set(row, col, value);
        self.edits.insert((row, col));
    }

    fn highlight(&mut self, row: usize, col: usize) {
        self.highlights.insert((row, col));
    }
}

/// An ordered collection of sheets loaded from (or destined for) one file
#[derive(Debug, Clone, Default)]
pub struct Workbook {
    path: PathBuf,
    sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn from_sheets(path: impl Into<PathBuf>, sheets: Vec<Sheet>) -> Self {
        Self {
            path: path.into(),
            sheets,
        }
    }

    /// Load every sheet of a workbook
    pub fn open(path: &Path) -> Result<Self> {
        let mut workbook = open_sheets(path)?;
        let names: Vec<String> = workbook.sheet_names().to_vec();

        let mut sheets = Vec::with_capacity(names.len());
        for name in names {
            let range = workbook
                .worksheet_range(&name)
                .map_err(|e| ReconcileError::workbook(path, format!("sheet '{}': {}", name, e)))?;
            sheets.push(Sheet::with_grid(name, range_to_grid(&range)));
        }

        debug!("Loaded {} sheets from {}", sheets.len(), path.display());
        Ok(Self::from_sheets(path, sheets))
    }

    /// Load a single named sheet as a grid
    pub fn read_sheet(path: &Path, sheet_name: &str) -> Result<Grid> {
        let mut workbook = open_sheets(path)?;
        if !workbook.sheet_names().iter().any(|n| n == sheet_name) {
            return Err(ReconcileError::SheetNotFound {
                path: path.to_path_buf(),
                sheet: sheet_name.to_string(),
            });
        }

        let range = workbook
            .worksheet_range(sheet_name)
            .map_err(|e| ReconcileError::workbook(path, format!("sheet '{}': {}", sheet_name, e)))?;
        let grid = range_to_grid(&range);
        debug!(
            "Read sheet '{}' from {}: {} rows x {} cols",
            sheet_name,
            path.display(),
            grid.height(),
            grid.width()
        );
        Ok(grid)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    pub fn sheet(&self, index: usize) -> Option<&Sheet> {
        self.sheets.get(index)
    }

    pub fn sheet_mut(&mut self, index: usize) -> Option<&mut Sheet> {
        self.sheets.get_mut(index)
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }
}

fn open_sheets(path: &Path) -> Result<Sheets<std::io::BufReader<std::fs::File>>> {
    open_workbook_auto(path).map_err(|e| ReconcileError::workbook(path, e))
}

/// Copy a calamine range into a grid at absolute coordinates
fn range_to_grid(range: &Range<Data>) -> Grid {
    let mut grid = Grid::new();
    let Some((start_row, start_col)) = range.start() else {
        return grid;
    };

    for (r, row) in range.rows().enumerate() {
        for (c, cell) in row.iter().enumerate() {
            let value = data_to_raw(cell);
            if value.is_blank() {
                continue;
            }
            grid.set(start_row as usize + r, start_col as usize + c, value);
        }
    }
    grid
}

fn data_to_raw(cell: &Data) -> RawValue {
    match cell {
        Data::Empty => RawValue::Empty,
        Data::String(s) => RawValue::from(s.as_str()),
        Data::Float(n) => RawValue::Number(*n),
        Data::Int(n) => RawValue::Number(*n as f64),
        Data::Bool(b) => RawValue::from(if *b { "TRUE" } else { "FALSE" }),
        Data::DateTime(dt) => RawValue::Number(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => RawValue::from(s.as_str()),
        Data::Error(e) => RawValue::Text(format!("#{:?}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook as XlsxWorkbook;
    use tempfile::TempDir;

    #[test]
    fn test_sheet_tracks_values_and_highlights() {
        let mut sheet = Sheet::new("AC");
        sheet.set_value(2, 3, RawValue::Number(1.5));
        sheet.highlight(2, 3);

        assert_eq!(sheet.name(), "AC");
        assert_eq!(sheet.grid().get(2, 3), &RawValue::Number(1.5));
        assert!(sheet.is_highlighted(2, 3));
        assert!(!sheet.is_highlighted(0, 0));
        assert!(sheet.edits().contains(&(2, 3)));
    }

    #[test]
    fn test_read_sheet_keeps_absolute_coordinates() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("source.xlsx");

        let mut xlsx = XlsxWorkbook::new();
        let worksheet = xlsx.add_worksheet().set_name("Data").unwrap();
        worksheet.write_string(15, 2, "8 BVDSS").unwrap();
        worksheet.write_number(28, 2, 620.0).unwrap();
        worksheet.write_string(28, 0, "P1").unwrap();
        xlsx.save(&path).unwrap();

        let grid = Workbook::read_sheet(&path, "Data").unwrap();
        assert_eq!(grid.get(15, 2), &RawValue::from("8 BVDSS"));
        assert_eq!(grid.get(28, 2), &RawValue::Number(620.0));
        assert_eq!(grid.get(28, 0), &RawValue::from("P1"));
        assert_eq!(grid.height(), 29);
    }

    #[test]
    fn test_missing_sheet_and_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("source.xlsx");

        let mut xlsx = XlsxWorkbook::new();
        xlsx.add_worksheet().set_name("Other").unwrap();
        xlsx.save(&path).unwrap();

        let err = Workbook::read_sheet(&path, "Data").unwrap_err();
        assert!(matches!(err, ReconcileError::SheetNotFound { .. }));

        let err = Workbook::open(&temp_dir.path().join("absent.xlsx")).unwrap_err();
        assert!(matches!(err, ReconcileError::Workbook { .. }));
    }

    #[test]
    fn test_open_loads_all_sheets_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("template.xlsx");

        let mut xlsx = XlsxWorkbook::new();
        xlsx.add_worksheet().set_name("Cover").unwrap();
        xlsx.add_worksheet()
            .set_name("HTRB 100%")
            .unwrap()
            .write_string(0, 0, "Title")
            .unwrap();
        xlsx.add_worksheet().set_name("AC").unwrap();
        xlsx.save(&path).unwrap();

        let workbook = Workbook::open(&path).unwrap();
        assert_eq!(workbook.sheet_names(), vec!["Cover", "HTRB 100%", "AC"]);
        assert!(workbook.sheet(1).unwrap().edits().is_empty());
        assert_eq!(
            workbook.sheet(1).unwrap().grid().get(0, 0),
            &RawValue::from("Title")
        );
    }
}
