//! Error handling integration tests

use super::fixtures::{Workspace, write_source};
use crate::error::ReconcileError;
use crate::models::DiagnosticKind;
use crate::processor::ReportProcessor;
use rust_xlsxwriter::Workbook as XlsxWorkbook;
use std::fs;

const ITEMS: &[(&str, &str, &str)] = &[("8 BVDSS", "650", "")];
const SAMPLES: &[(&str, &[&str])] = &[("P1", &["620"]), ("P2", &["700"])];

#[tokio::test]
async fn test_nonexistent_source_dir() {
    let ws = Workspace::new();
    ws.write_template();
    let missing = ws.temp_dir.path().join("nonexistent");

    let processor = ReportProcessor::new(ws.config().with_source_dir(&missing))
        .unwrap()
        .with_quiet(true);

    match processor.process().await.unwrap_err() {
        ReconcileError::SourceDirNotFound { path } => assert_eq!(path, missing),
        other => panic!("Expected SourceDirNotFound error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_template() {
    let ws = Workspace::new();
    ws.write_source("lot_a.xlsx", ITEMS, SAMPLES);

    let processor = ReportProcessor::new(ws.config()).unwrap().with_quiet(true);

    match processor.process().await.unwrap_err() {
        ReconcileError::TemplateNotFound { path } => assert_eq!(path, ws.template_path()),
        other => panic!("Expected TemplateNotFound error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_source_dir_is_not_an_error() {
    let ws = Workspace::new();
    let stats = ReportProcessor::new(ws.config())
        .unwrap()
        .with_quiet(true)
        .process()
        .await
        .unwrap();

    assert_eq!(stats.files_discovered, 0);
    assert_eq!(stats.files_processed, 0);
}

#[tokio::test]
async fn test_invalid_config_rejected_up_front() {
    let ws = Workspace::new();
    let mut config = ws.config();
    config.batches[1].start = 10;

    match ReportProcessor::new(config).unwrap_err() {
        ReconcileError::Configuration { message } => assert!(message.contains("overlap")),
        other => panic!("Expected Configuration error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_continue_after_failed_file() {
    let ws = Workspace::new();
    ws.write_template();
    write_source(&ws.source_dir().join("a_wrong_sheet.xlsx"), "Raw", ITEMS, SAMPLES);
    fs::write(ws.source_dir().join("b_corrupt.xlsx"), "not a zip archive").unwrap();
    ws.write_source("c_good.xlsx", ITEMS, SAMPLES);

    let stats = ReportProcessor::new(ws.config())
        .unwrap()
        .with_quiet(true)
        .process()
        .await
        .unwrap();

    assert_eq!(stats.files_discovered, 3);
    assert_eq!(stats.files_processed, 1);
    assert_eq!(stats.files_failed, 2);
    assert!(ws.output_dir().join("processed_c_good.xlsx").is_file());

    let (sheet_failure, corrupt_failure) = (&stats.failures[0], &stats.failures[1]);
    assert!(sheet_failure.0.ends_with("a_wrong_sheet.xlsx"));
    assert!(sheet_failure.1.contains("Sheet 'Data' not found"));
    assert!(corrupt_failure.0.ends_with("b_corrupt.xlsx"));

    let report = fs::read_to_string(stats.error_report.unwrap()).unwrap();
    assert!(report.contains("a_wrong_sheet.xlsx"));
    assert!(report.contains("b_corrupt.xlsx"));
}

#[tokio::test]
async fn test_stop_on_error() {
    let ws = Workspace::new();
    ws.write_template();
    fs::write(ws.source_dir().join("a_corrupt.xlsx"), "garbage").unwrap();
    ws.write_source("b_good.xlsx", ITEMS, SAMPLES);

    let config = ws.config().with_workers(1).with_stop_on_error();
    let stats = ReportProcessor::new(config)
        .unwrap()
        .with_quiet(true)
        .process()
        .await
        .unwrap();

    assert_eq!(stats.files_failed, 1);
    assert_eq!(stats.files_processed, 0);
    assert!(!ws.output_dir().join("processed_b_good.xlsx").exists());
}

#[tokio::test]
async fn test_stop_on_error_with_parallel_workers() {
    let ws = Workspace::new();
    ws.write_template();
    fs::write(ws.source_dir().join("a_corrupt.xlsx"), "garbage").unwrap();
    for name in ["b_good.xlsx", "c_good.xlsx", "d_good.xlsx"] {
        ws.write_source(name, ITEMS, SAMPLES);
    }

    let config = ws.config().with_workers(4).with_stop_on_error();
    let stats = ReportProcessor::new(config)
        .unwrap()
        .with_quiet(true)
        .process()
        .await
        .unwrap();

    assert_eq!(stats.files_discovered, 4);
    assert_eq!(stats.files_failed, 1);
    assert_eq!(stats.files_processed, 0);
    assert!(stats.failures[0].0.ends_with("a_corrupt.xlsx"));
    for stem in ["b_good", "c_good", "d_good"] {
        assert!(!ws.output_dir().join(format!("processed_{stem}.xlsx")).exists());
    }
}

#[tokio::test]
async fn test_stop_on_error_keeps_earlier_outputs() {
    let ws = Workspace::new();
    ws.write_template();
    ws.write_source("a_good.xlsx", ITEMS, SAMPLES);
    fs::write(ws.source_dir().join("b_corrupt.xlsx"), "garbage").unwrap();
    ws.write_source("c_good.xlsx", ITEMS, SAMPLES);

    let config = ws.config().with_workers(3).with_stop_on_error();
    let stats = ReportProcessor::new(config)
        .unwrap()
        .with_quiet(true)
        .process()
        .await
        .unwrap();

    assert_eq!(stats.files_processed, 1);
    assert_eq!(stats.files_failed, 1);
    assert!(ws.output_dir().join("processed_a_good.xlsx").is_file());
    assert!(!ws.output_dir().join("processed_c_good.xlsx").exists());
}

#[tokio::test]
async fn test_short_grid_is_reported() {
    let ws = Workspace::new();
    ws.write_template();

    let mut xlsx = XlsxWorkbook::new();
    xlsx.add_worksheet()
        .set_name("Data")
        .unwrap()
        .write_string(3, 0, "P1")
        .unwrap();
    xlsx.save(ws.source_dir().join("short.xlsx")).unwrap();

    let stats = ReportProcessor::new(ws.config())
        .unwrap()
        .with_quiet(true)
        .process()
        .await
        .unwrap();

    assert_eq!(stats.files_failed, 1);
    assert!(stats.failures[0].1.contains("Source grid too small"));
    assert!(!stats.failures[0].1.starts_with(&*stats.failures[0].0.to_string_lossy()));
}

#[tokio::test]
async fn test_out_of_range_sheet_skips_batch() {
    let ws = Workspace::new();
    ws.write_template();
    ws.write_source("lot_a.xlsx", ITEMS, &[("P1", &["620"]), ("P30", &["620"])]);

    let mut config = ws.config();
    config.batches[1].target_sheet = 7;

    let stats = ReportProcessor::new(config)
        .unwrap()
        .with_quiet(true)
        .process()
        .await
        .unwrap();

    assert_eq!(stats.files_processed, 1);
    assert_eq!(stats.batches_written, 1);
    assert_eq!(stats.abnormal_rows, 1);
    assert!(stats
        .diagnostics
        .iter()
        .any(|d| d.kind == DiagnosticKind::SheetOutOfRange));
}

#[tokio::test]
async fn test_missing_template_sheet_warns() {
    let ws = Workspace::new();
    super::fixtures::write_template(&ws.template_path(), &["Summary", "HTRB 100%", "DC"]);
    ws.write_source("lot_a.xlsx", ITEMS, SAMPLES);

    let stats = ReportProcessor::new(ws.config())
        .unwrap()
        .with_quiet(true)
        .process()
        .await
        .unwrap();

    assert_eq!(stats.files_processed, 1);
    let missing: Vec<_> = stats
        .diagnostics
        .iter()
        .filter(|d| d.kind == DiagnosticKind::MissingTemplateSheet)
        .collect();
    assert_eq!(missing.len(), 1);
    assert!(missing[0].message.contains("'AC'"));
}
