//! Integration tests for reconciliation through the public API
//!
//! Source grids are built in memory with the default positional layout and
//! rendered into in-memory template sheets.

use report_reconciler::config::ReconcileConfig;
use report_reconciler::detector::Detector;
use report_reconciler::extractor::{extract_metadata, extract_samples};
use report_reconciler::grouper::group;
use report_reconciler::mapper::{MappingOptions, map_items};
use report_reconciler::models::{AbnormalityReport, Batch, CanonicalItem, Grid, RawValue};
use report_reconciler::normalizer::{DisplayValue, Normalizer};
use report_reconciler::renderer::Renderer;
use report_reconciler::workbook::Sheet;

const ITEM_ROW: usize = 15;
const MIN_ROW: usize = 19;
const MAX_ROW: usize = 20;
const DATA_ROW: usize = 28;
const FIRST_ITEM_COL: usize = 2;

/// Template columns for the default item order
const BVDSS_COL: usize = 3;
const HVIDSS_COL: usize = 4;
const TEMPLATE_DATA_ROW: usize = 17;

fn source_grid(items: &[(&str, &str, &str)], samples: &[(&str, &[&str])]) -> Grid {
    let mut grid = Grid::new();
    grid.set(0, 0, RawValue::from("Lot report"));
    for (i, (name, min, max)) in items.iter().enumerate() {
        let col = FIRST_ITEM_COL + i;
        grid.set(ITEM_ROW, col, RawValue::from(*name));
        grid.set(MIN_ROW, col, RawValue::from(*min));
        grid.set(MAX_ROW, col, RawValue::from(*max));
    }
    for (r, (id, readings)) in samples.iter().enumerate() {
        let row = DATA_ROW + r;
        grid.set(row, 0, RawValue::from(*id));
        for (i, reading) in readings.iter().enumerate() {
            grid.set(row, FIRST_ITEM_COL + i, RawValue::from(*reading));
        }
    }
    grid
}

struct Reconciled {
    items: Vec<CanonicalItem>,
    batches: Vec<Batch>,
    reports: Vec<AbnormalityReport>,
    sheets: Vec<Sheet>,
}

fn reconcile(config: &ReconcileConfig, grid: &Grid) -> Reconciled {
    let normalizer = Normalizer::new(config);
    let prefixes = config.sample_prefixes();

    let metadata = extract_metadata(grid, &config.source_layout).unwrap();
    let samples = extract_samples(grid, &config.source_layout, &config.recognition, &prefixes);
    let mapping = map_items(
        &metadata,
        &config.item_mapping,
        &MappingOptions::from_config(config),
        &normalizer,
    )
    .unwrap();
    let grouped = group(&samples, &config.batch_ranges(), &prefixes).unwrap();

    let detector = Detector::new(&normalizer, config.processing.limit_scope);
    let renderer = Renderer::new(config, &normalizer);
    let mut sheets = Vec::new();
    let mut reports = Vec::new();
    for batch in &grouped.batches {
        let report = detector.count_abnormal_rows(batch, &mapping.items);
        let mut sheet = Sheet::new(format!("sheet{}", batch.target_sheet));
        renderer.render(&mut sheet, &mapping.items, batch, &report);
        reports.push(report);
        sheets.push(sheet);
    }

    Reconciled {
        items: mapping.items,
        batches: grouped.batches,
        reports,
        sheets,
    }
}

#[test]
fn test_reading_below_min_is_abnormal() {
    let config = ReconcileConfig::default();
    let grid = source_grid(&[("8 BVDSS", "650V", "")], &[("P1", &["620"])]);

    let result = reconcile(&config, &grid);

    let bvdss = result.items.iter().find(|i| i.key == "BVDSS").unwrap();
    assert_eq!(bvdss.min_limits[0].as_ref().unwrap().value, Some(650.0));
    assert_eq!(result.reports[0].abnormal_row_count, 1);
    assert!(result.sheets[0].is_highlighted(TEMPLATE_DATA_ROW, BVDSS_COL));
    assert_eq!(
        result.sheets[0].grid().get(TEMPLATE_DATA_ROW, BVDSS_COL),
        &RawValue::Number(620.0)
    );
}

#[test]
fn test_overflow_reading() {
    let config = ReconcileConfig::default();
    let normalizer = Normalizer::new(&config);
    let over = RawValue::from("OVER");

    assert!(normalizer.is_overflow(&over));
    assert_eq!(normalizer.to_comparison_value(&over), Some(f64::INFINITY));
    assert_eq!(
        normalizer.to_display_value(&over),
        DisplayValue::Overflow("Over".to_string())
    );

    let grid = source_grid(&[("8 BVDSS", "650", "")], &[("P2", &["OVER"])]);
    let result = reconcile(&config, &grid);

    assert_eq!(result.reports[0].abnormal_row_count, 1);
    assert_eq!(result.reports[0].overflow_rows, 1);
    assert_eq!(
        result.sheets[0].grid().get(TEMPLATE_DATA_ROW, BVDSS_COL),
        &RawValue::from("Over")
    );
    assert!(result.sheets[0].is_highlighted(TEMPLATE_DATA_ROW, BVDSS_COL));
}

#[test]
fn test_combined_aliases_counted_once() {
    let config = ReconcileConfig::default();
    let grid = source_grid(
        &[("9 IDSS", "", "20"), ("9 HVIDSS", "", "20")],
        &[("P3", &["10", "25"]), ("P4", &["30", "40"])],
    );

    let result = reconcile(&config, &grid);

    let hvidss = result.items.iter().find(|i| i.key == "HVIDSS").unwrap();
    assert_eq!(hvidss.contribution_count(), 2);
    // Two abnormal rows, regardless of how many cells were out of limits
    assert_eq!(result.reports[0].abnormal_row_count, 2);

    let sheet = &result.sheets[0];
    assert_eq!(
        sheet.grid().get(TEMPLATE_DATA_ROW, HVIDSS_COL),
        &RawValue::from("10; 25")
    );
    assert!(sheet.is_highlighted(TEMPLATE_DATA_ROW, HVIDSS_COL));
}

#[test]
fn test_paired_prefix_keeps_local_index() {
    let config = ReconcileConfig::default();
    let grid = source_grid(
        &[("8 BVDSS", "650", "")],
        &[("F12", &["700"]), ("P23", &["700"]), ("X5", &["1"])],
    );

    let result = reconcile(&config, &grid);

    let first = &result.batches[0];
    assert_eq!(first.rows.len(), 1);
    assert_eq!(first.rows[0].prefix, "F");
    assert_eq!(first.rows[0].local_index, 12);
    assert_eq!(
        result.sheets[0].grid().get(TEMPLATE_DATA_ROW, 0),
        &RawValue::Number(12.0)
    );

    let second = &result.batches[1];
    assert_eq!(second.rows[0].local_index, 1);
    assert_eq!(result.reports[0].abnormal_row_count, 0);
    assert_eq!(result.reports[1].abnormal_row_count, 0);
}

#[test]
fn test_empty_batch_still_gets_headers_and_count() {
    let config = ReconcileConfig::default();
    let grid = source_grid(&[("8 BVDSS", "650", "")], &[("P1", &["700"])]);

    let result = reconcile(&config, &grid);

    let empty = &result.sheets[1];
    assert!(result.batches[1].rows.is_empty());
    assert_eq!(empty.grid().get(7, BVDSS_COL), &RawValue::from("BVDSS"));
    assert_eq!(empty.grid().get(39, 1), &RawValue::Number(0.0));
}

#[test]
fn test_counts_do_not_depend_on_item_order() {
    let grid = source_grid(
        &[("8 BVDSS", "650", ""), ("9 IDSS", "", "20"), ("10 RDON", "", "0.5")],
        &[
            ("P1", &["620", "1", "0.1"]),
            ("P2", &["700", "25", "0.9"]),
            ("P3", &["700", "1", "0.1"]),
            ("P24", &["-700", "-30", "0.1"]),
        ],
    );

    let config = ReconcileConfig::default();
    let mut reversed = config.clone();
    reversed.item_mapping.reverse();

    let forward = reconcile(&config, &grid);
    let backward = reconcile(&reversed, &grid);

    let counts = |r: &Reconciled| -> Vec<usize> {
        r.reports.iter().map(|report| report.abnormal_row_count).collect()
    };
    assert_eq!(counts(&forward), vec![2, 1]);
    assert_eq!(counts(&forward), counts(&backward));
}
