//! Per-file reconciliation pipeline
//!
//! Runs one source grid through extraction, mapping, grouping, counting and
//! rendering against a copy of the loaded template. Each file is independent;
//! the pipeline holds only read-only shared state.

use crate::config::ResolvedConfig;
use crate::constants::OUTPUT_FILE_PREFIX;
use crate::detector::Detector;
use crate::error::Result;
use crate::extractor::{extract_metadata, extract_samples};
use crate::grouper::group;
use crate::mapper::{MappingOptions, map_items};
use crate::models::{Diagnostic, DiagnosticKind, FileOutcome, Grid};
use crate::normalizer::Normalizer;
use crate::renderer::Renderer;
use crate::workbook::Workbook;

use super::writer::ReportWriter;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Reconciled result of one source file, before it is written
#[derive(Debug)]
pub struct Reconciled {
    pub outcome: FileOutcome,
    pub workbook: Workbook,
}

/// Reconciles source files against a loaded template
#[derive(Debug, Clone)]
pub struct Pipeline {
    resolved: Arc<ResolvedConfig>,
    template: Arc<Workbook>,
    normalizer: Normalizer,
    writer: ReportWriter,
}

impl Pipeline {
    pub fn new(resolved: Arc<ResolvedConfig>, template: Arc<Workbook>) -> Self {
        let normalizer = Normalizer::new(&resolved.config);
        let writer = ReportWriter::new(resolved.highlight_rgb).with_template(template.path());
        Self {
            resolved,
            template,
            normalizer,
            writer,
        }
    }

    /// `output_dir/processed_<stem>.xlsx`
    pub fn output_path(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.resolved
            .config
            .paths
            .output_dir
            .join(format!("{}{}.xlsx", OUTPUT_FILE_PREFIX, stem))
    }

    /// Read, reconcile and (unless dry-running) write one source file
    pub fn process_file(&self, source: &Path) -> Result<FileOutcome> {
        let reconciled = self.reconcile_file(source)?;
        self.write(reconciled)
    }

    /// Read and reconcile one source file without writing it
    pub fn reconcile_file(&self, source: &Path) -> Result<Reconciled> {
        info!("Processing {}", source.display());
        let grid = Workbook::read_sheet(source, &self.resolved.config.source_sheet_name)?;
        self.reconcile_grid(source, &grid)
            .map_err(|e| e.in_file(source))
    }

    /// Write a reconciled workbook unless dry-running
    pub fn write(&self, reconciled: Reconciled) -> Result<FileOutcome> {
        let Reconciled {
            mut outcome,
            workbook,
        } = reconciled;

        if self.resolved.config.dry_run {
            debug!("Dry run, not writing {}", workbook.path().display());
        } else {
            self.writer.write_workbook(&workbook, workbook.path())?;
            info!("Wrote {}", workbook.path().display());
            outcome.output = Some(workbook.path().to_path_buf());
        }

        Ok(outcome)
    }

    /// Reconcile an already loaded source grid into a rendered workbook
    pub fn reconcile_grid(&self, source: &Path, grid: &Grid) -> Result<Reconciled> {
        let resolved = &*self.resolved;
        let config = &resolved.config;
        let mut diagnostics: Vec<Diagnostic> = Vec::new();

        let metadata = extract_metadata(grid, &config.source_layout)?;
        diagnostics.extend(metadata.diagnostics.iter().cloned());

        let samples = extract_samples(
            grid,
            &config.source_layout,
            &config.recognition,
            &resolved.prefixes,
        );
        info!(
            "{}: {} test items, {} samples",
            source.display(),
            metadata.len(),
            samples.len()
        );
        debug!("Test items: {}", metadata.names().join(", "));

        let mapping = map_items(
            &metadata,
            &config.item_mapping,
            &MappingOptions::from_config(config),
            &self.normalizer,
        )?;
        diagnostics.extend(mapping.warnings);

        let grouped = group(&samples, &resolved.batch_ranges, &resolved.prefixes)?;
        diagnostics.extend(grouped.diagnostics);

        let mut workbook =
            Workbook::from_sheets(self.output_path(source), self.template.sheets().to_vec());
        let detector = Detector::new(&self.normalizer, config.processing.limit_scope);
        let renderer = Renderer::new(config, &self.normalizer);
        let mut reports = Vec::with_capacity(grouped.batches.len());

        for batch in &grouped.batches {
            let sheet_count = workbook.len();
            let Some(sheet) = workbook.sheet_mut(batch.target_sheet) else {
                let message = format!(
                    "batch '{}' targets sheet {} but the template has {} sheets",
                    batch.batch_id, batch.target_sheet, sheet_count
                );
                error!("{}", message);
                diagnostics.push(Diagnostic::new(DiagnosticKind::SheetOutOfRange, message));
                continue;
            };

            let report = detector.count_abnormal_rows(batch, &mapping.items);
            let summary = renderer.render(sheet, &mapping.items, batch, &report);
            diagnostics.extend(summary.diagnostics);
            reports.push(report);
        }

        let outcome = FileOutcome {
            source: source.to_path_buf(),
            output: None,
            samples: samples.len(),
            reports,
            diagnostics: diagnostics
                .into_iter()
                .map(|d| d.in_file(source))
                .collect(),
        };

        Ok(Reconciled { outcome, workbook })
    }
}
