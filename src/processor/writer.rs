//! Output writing for rendered reports
//!
//! Rendered workbooks are written as a patched copy of an xlsx template so
//! its formatting carries over. Without one (or when patching fails) the
//! workbook is rebuilt from its values with highlighted cells filled in the
//! configured colour. Also writes the per-run error report.

use crate::error::{ReconcileError, Result};
use crate::models::{ProcessingStats, RawValue};
use crate::renderer::ReportSheet;
use crate::workbook::{Sheet, Workbook};

use super::xlsx_patch;

use chrono::Local;
use rust_xlsxwriter::{Color, Format, Workbook as XlsxWorkbook, Worksheet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Writes rendered workbooks to xlsx
#[derive(Debug, Clone)]
pub struct ReportWriter {
    highlight: Format,
    highlight_rgb: u32,
    template: Option<PathBuf>,
}

impl ReportWriter {
    /// Create a writer filling highlighted cells with an RGB colour
    pub fn new(highlight_rgb: u32) -> Self {
        Self {
            highlight: Format::new().set_background_color(Color::RGB(highlight_rgb)),
            highlight_rgb,
            template: None,
        }
    }

    /// Patch outputs into a copy of `template` when it is an xlsx package
    pub fn with_template(mut self, template: &Path) -> Self {
        self.template = xlsx_patch::supports(template).then(|| template.to_path_buf());
        self
    }

    /// Save every sheet of `workbook` to `path`
    pub fn write_workbook(&self, workbook: &Workbook, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        if let Some(template) = &self.template {
            match xlsx_patch::patch_template(template, path, workbook, self.highlight_rgb) {
                Ok(()) => return Ok(()),
                Err(e) => warn!("Rebuilding {} without template formatting: {}", path.display(), e),
            }
        }
        self.rebuild(workbook, path)
    }

    /// Write the sheet values into a fresh workbook
    fn rebuild(&self, workbook: &Workbook, path: &Path) -> Result<()> {
        let mut xlsx = XlsxWorkbook::new();
        for sheet in workbook.sheets() {
            let worksheet = xlsx
                .add_worksheet()
                .set_name(sheet.name())
                .map_err(|e| ReconcileError::workbook(path, format!("sheet '{}': {}", sheet.name(), e)))?;
            let cells = self
                .write_sheet(worksheet, sheet)
                .map_err(|e| ReconcileError::workbook(path, format!("sheet '{}': {}", sheet.name(), e)))?;
            debug!("Wrote {} cells to sheet '{}'", cells, sheet.name());
        }

        xlsx.save(path)
            .map_err(|e| ReconcileError::workbook(path, format!("failed to save: {}", e)))?;
        Ok(())
    }

    fn write_sheet(
        &self,
        worksheet: &mut Worksheet,
        sheet: &Sheet,
    ) -> std::result::Result<usize, String> {
        let mut written = 0;

        for (row, col, value) in sheet.grid().cells() {
            let (row, col) = cell_index(row, col)?;
            let highlighted = sheet.is_highlighted(row as usize, col as usize);
            let result = match (value, highlighted) {
                (RawValue::Number(n), true) => {
                    worksheet.write_number_with_format(row, col, *n, &self.highlight)
                }
                (RawValue::Number(n), false) => worksheet.write_number(row, col, *n),
                (RawValue::Text(s), true) => {
                    worksheet.write_string_with_format(row, col, s, &self.highlight)
                }
                (RawValue::Text(s), false) => worksheet.write_string(row, col, s),
                (RawValue::Empty, _) => continue,
            };
            result.map_err(|e| e.to_string())?;
            written += 1;
        }

        // Highlighted cells without a value still get their fill
        for &(row, col) in sheet.highlights() {
            if sheet.grid().get(row, col).is_blank() {
                let (row, col) = cell_index(row, col)?;
                worksheet
                    .write_blank(row, col, &self.highlight)
                    .map_err(|e| e.to_string())?;
            }
        }

        Ok(written)
    }
}

pub(super) fn cell_index(row: usize, col: usize) -> std::result::Result<(u32, u16), String> {
    let r = u32::try_from(row).map_err(|_| format!("row {} out of range", row))?;
    let c = u16::try_from(col).map_err(|_| format!("column {} out of range", col))?;
    Ok((r, c))
}

/// Write the run report listing failed files and diagnostics.
///
/// Returns the path of the report, named after the run timestamp.
pub fn write_error_report(output_dir: &Path, stats: &ProcessingStats) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;

    let now = Local::now();
    let path = output_dir.join(format!("error_report_{}.txt", now.format("%Y%m%d_%H%M%S")));

    let mut text = String::new();
    let _ = writeln!(text, "Report reconciliation run {}", now.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(
        text,
        "Files: {} discovered, {} processed, {} failed",
        stats.files_discovered, stats.files_processed, stats.files_failed
    );
    let _ = writeln!(
        text,
        "Samples: {}, batches written: {}, abnormal rows: {}",
        stats.samples_processed, stats.batches_written, stats.abnormal_rows
    );

    let _ = writeln!(text, "\nFailed files ({}):", stats.failures.len());
    for (file, reason) in &stats.failures {
        let _ = writeln!(text, "  {}: {}", file.display(), reason);
    }

    let _ = writeln!(text, "\nDiagnostics ({}):", stats.diagnostics.len());
    for diagnostic in &stats.diagnostics {
        let _ = writeln!(text, "  {}", diagnostic);
    }

    std::fs::write(&path, text)?;
    debug!("Error report written to {}", path.display());
    Ok(path)
}
