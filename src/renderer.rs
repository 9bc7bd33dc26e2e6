//! Rendering of reconciled batches into a report sheet.
//!
//! Writes the item header (keys, conditions, limits), one row per sample with
//! its batch-local index and per-item readings, highlights abnormal readings,
//! and finally places the batch abnormal row count.

use crate::config::{CountPosition, ReconcileConfig};
use crate::constants;
use crate::detector::Detector;
use crate::models::{
    AbnormalityReport, Batch, CanonicalItem, Diagnostic, DiagnosticKind, NormalizedLimit, RawValue,
    SampleRow,
};
use crate::normalizer::{DisplayValue, Normalizer};
use tracing::{debug, info, warn};

/// Destination of rendered values.
///
/// Only values and a single highlight flag are written; existing formatting
/// of the destination is left alone.
pub trait ReportSheet {
    fn name(&self) -> &str;

    /// Store a value at a 0-based coordinate
    fn set_value(&mut self, row: usize, col: usize, value: RawValue);

    /// Mark a cell with the highlight fill
    fn highlight(&mut self, row: usize, col: usize);
}

/// What one render pass wrote
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderSummary {
    pub rows_written: usize,
    pub cells_highlighted: usize,
    pub count_written: bool,
    pub diagnostics: Vec<Diagnostic>,
}

/// Renders batches using the template layout from configuration
#[derive(Debug)]
pub struct Renderer<'a> {
    config: &'a ReconcileConfig,
    normalizer: &'a Normalizer,
    detector: Detector<'a>,
}

impl<'a> Renderer<'a> {
    pub fn new(config: &'a ReconcileConfig, normalizer: &'a Normalizer) -> Self {
        Self {
            config,
            normalizer,
            detector: Detector::new(normalizer, config.processing.limit_scope),
        }
    }

    /// Render one batch and its abnormal count into `sheet`
    pub fn render<S: ReportSheet + ?Sized>(
        &self,
        sheet: &mut S,
        items: &[CanonicalItem],
        batch: &Batch,
        report: &AbnormalityReport,
    ) -> RenderSummary {
        let mut summary = RenderSummary::default();

        self.write_header(sheet, items, &mut summary);

        let layout = &self.config.template_layout;
        for (offset, batch_row) in batch.rows.iter().enumerate() {
            let row = layout.data_start_row + offset;
            sheet.set_value(
                row,
                layout.sample_id_col,
                RawValue::Number(batch_row.local_index as f64),
            );

            for (i, item) in items.iter().enumerate() {
                let col = layout.test_items_start_col + i;
                let highlighted = self.write_reading(sheet, row, col, item, &batch_row.sample);
                if highlighted {
                    summary.cells_highlighted += 1;
                }
            }

            debug!(
                "{}: sample {} -> row {} (index {})",
                sheet.name(),
                batch_row.sample.sample_id,
                row,
                batch_row.local_index
            );
            summary.rows_written += 1;
        }

        let stats = &self.config.abnormal_statistics;
        if stats.enable_counting && stats.write_to_template {
            let position = match stats.position_for(batch.target_sheet) {
                Some(position) => position.clone(),
                None => {
                    let message = format!(
                        "no count position for sheet {}, using the top-left cell",
                        batch.target_sheet
                    );
                    warn!("{}", message);
                    summary
                        .diagnostics
                        .push(Diagnostic::new(DiagnosticKind::MissingCountPosition, message));
                    CountPosition {
                        sheet: batch.target_sheet,
                        row: 0,
                        col: 0,
                        write_as_number: true,
                        format: constants::COUNT_PLACEHOLDER.to_string(),
                    }
                }
            };
            self.write_abnormal_count(sheet, report.abnormal_row_count, &position);
            summary.count_written = true;
        }

        info!(
            "{}: batch {} wrote {} rows, {} abnormal, {} cells highlighted",
            sheet.name(),
            batch.batch_id,
            summary.rows_written,
            report.abnormal_row_count,
            summary.cells_highlighted
        );
        summary
    }

    /// Write the count as a number or through its `{count}` template
    pub fn write_abnormal_count<S: ReportSheet + ?Sized>(
        &self,
        sheet: &mut S,
        count: usize,
        position: &CountPosition,
    ) {
        let value = if position.write_as_number {
            RawValue::Number(count as f64)
        } else {
            RawValue::from(
                position
                    .format
                    .replace(constants::COUNT_PLACEHOLDER, &count.to_string()),
            )
        };
        debug!(
            "{}: abnormal count {} at ({}, {})",
            sheet.name(),
            count,
            position.row,
            position.col
        );
        sheet.set_value(position.row, position.col, value);
    }

    fn write_header<S: ReportSheet + ?Sized>(
        &self,
        sheet: &mut S,
        items: &[CanonicalItem],
        summary: &mut RenderSummary,
    ) {
        let layout = &self.config.template_layout;
        let processing = &self.config.processing;

        for (i, item) in items.iter().enumerate() {
            let col = layout.test_items_start_col + i;
            sheet.set_value(layout.test_items_row, col, RawValue::from(item.key.as_str()));

            let conditions: Vec<&str> = item
                .conditions
                .iter()
                .map(String::as_str)
                .filter(|c| !c.is_empty())
                .collect();

            if processing.conditions_multiline && conditions.len() > 1 {
                let max_rows = layout.test_conditions_max_rows;
                if conditions.len() > max_rows {
                    let message = format!(
                        "'{}' has {} conditions, only {} fit",
                        item.key,
                        conditions.len(),
                        max_rows
                    );
                    warn!("{}", message);
                    summary
                        .diagnostics
                        .push(Diagnostic::new(DiagnosticKind::ConditionsTruncated, message));
                }
                for (j, condition) in conditions.iter().take(max_rows).enumerate() {
                    sheet.set_value(layout.test_conditions_row + j, col, RawValue::from(*condition));
                }
            } else if !conditions.is_empty() {
                let joined = conditions.join(&processing.combine_conditions_separator);
                sheet.set_value(layout.test_conditions_row, col, RawValue::from(joined));
            }

            if let Some(text) = self.limit_text(&item.min_limits) {
                sheet.set_value(layout.min_limit_row, col, RawValue::from(text));
            }
            if let Some(text) = self.limit_text(&item.max_limits) {
                sheet.set_value(layout.max_limit_row, col, RawValue::from(text));
            }
        }
    }

    fn limit_text(&self, limits: &[Option<NormalizedLimit>]) -> Option<String> {
        let parts: Vec<String> = limits
            .iter()
            .flatten()
            .filter_map(|limit| self.normalizer.condition_text(&limit.raw))
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(&self.config.processing.combine_values_separator))
        }
    }

    /// Write one item's readings for a sample; returns whether it was highlighted
    fn write_reading<S: ReportSheet + ?Sized>(
        &self,
        sheet: &mut S,
        row: usize,
        col: usize,
        item: &CanonicalItem,
        sample: &SampleRow,
    ) -> bool {
        let processing = &self.config.processing;
        let mut values: Vec<DisplayValue> = Vec::new();
        let mut abnormal = false;

        for (i, &source_col) in item.source_columns.iter().enumerate() {
            let raw = sample.cell(source_col);
            let display = self.normalizer.to_display_value(raw);
            if display.is_invalid() {
                continue;
            }
            if self.detector.check_reading(item, i, raw).is_some() {
                abnormal = true;
            }
            values.push(display);
        }

        let value = match values.as_slice() {
            [] => RawValue::from(processing.empty_value_placeholder.as_str()),
            [DisplayValue::Number { value, .. }] if processing.convert_to_numeric => {
                RawValue::Number(*value)
            }
            [single] => RawValue::from(single.as_text()),
            many => RawValue::from(
                many.iter()
                    .map(DisplayValue::as_text)
                    .collect::<Vec<_>>()
                    .join(&processing.combine_values_separator),
            ),
        };
        sheet.set_value(row, col, value);

        if abnormal {
            sheet.highlight(row, col);
        }
        abnormal
    }
}
