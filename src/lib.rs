//! Report Reconciler Library
//!
//! Reads semiconductor test reports laid out positionally in spreadsheets,
//! maps their test items onto the canonical items of a standard report
//! template, groups samples into batches by sample number, counts abnormal
//! samples against the test limits, and renders each batch into its own
//! template sheet with abnormal readings highlighted.

pub mod cli;
pub mod config;
pub mod constants;
pub mod detector;
pub mod error;
pub mod extractor;
pub mod grouper;
pub mod mapper;
pub mod models;
pub mod normalizer;
pub mod processor;
pub mod renderer;
pub mod workbook;

pub use config::{LimitScope, ReconcileConfig, ResolvedConfig};
pub use error::{ReconcileError, Result};
pub use models::{Diagnostic, DiagnosticKind, ProcessingStats, RawValue};
pub use processor::ReportProcessor;
