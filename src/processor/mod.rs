//! Main processing engine.
//!
//! Orchestrates a reconciliation run: discovers source reports, loads the
//! template once, reconciles files concurrently on blocking tasks, writes
//! outputs and the error report, and prints a run summary.

pub mod discovery;
pub mod pipeline;
pub mod writer;
pub mod xlsx_patch;

#[cfg(test)]
pub mod tests;

use self::{
    discovery::FileDiscovery,
    pipeline::{Pipeline, Reconciled},
    writer::write_error_report,
};

use crate::config::{ReconcileConfig, ResolvedConfig};
use crate::error::{ReconcileError, Result};
use crate::models::{Diagnostic, DiagnosticKind, FileOutcome, ProcessingStats};
use crate::workbook::Workbook;

use colored::*;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Instant;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of a reconcile task
enum Staged {
    /// Reconciled and written by the task
    Done(FileOutcome),
    /// Reconciled; the output is written in file order by the driver
    Ready(Box<Reconciled>),
    /// Skipped because an earlier file failed
    Cancelled,
}

/// Main processor for a directory of source reports
#[derive(Debug)]
pub struct ReportProcessor {
    resolved: Arc<ResolvedConfig>,
    file_discovery: FileDiscovery,
    quiet: bool,
}

impl ReportProcessor {
    /// Create a processor; the configuration is validated here
    pub fn new(config: ReconcileConfig) -> Result<Self> {
        let resolved = config.resolve()?;
        let file_discovery = FileDiscovery::new(resolved.config.paths.source_dir.clone());
        Ok(Self {
            resolved: Arc::new(resolved),
            file_discovery,
            quiet: false,
        })
    }

    /// Suppress the progress bar and console summary
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.resolved.config
    }

    /// Main processing entry point
    pub async fn process(&self) -> Result<ProcessingStats> {
        let start_time = Instant::now();
        let config = &self.resolved.config;
        let mut stats = ProcessingStats {
            output_dir: config.paths.output_dir.clone(),
            ..Default::default()
        };

        if !self.quiet {
            println!("{}", "Starting report reconciliation".bright_green().bold());
            println!(
                "  {} {}",
                "Source:".bright_cyan(),
                config.paths.source_dir.display()
            );
            println!(
                "  {} {}",
                "Template:".bright_cyan(),
                config.paths.template_path().display()
            );
            println!(
                "  {} {}",
                "Output:".bright_cyan(),
                config.paths.output_dir.display()
            );
        }

        // Step 1: Discover source reports
        let files = self.file_discovery.discover_source_files().await?;
        stats.files_discovered = files.len();
        if files.is_empty() {
            warn!(
                "No source reports found in {}",
                config.paths.source_dir.display()
            );
            stats.processing_time_ms = start_time.elapsed().as_millis();
            return Ok(stats);
        }

        // Step 2: Load the template once
        let resolved = self.resolved.clone();
        let (template, template_diagnostics) =
            task::spawn_blocking(move || load_template(&resolved.config)).await??;
        stats.diagnostics.extend(template_diagnostics);

        // Step 3: Reconcile files with bounded concurrency. When stopping on
        // error, outputs are written here in file order so nothing after the
        // first failure reaches the output directory.
        let pipeline = Arc::new(Pipeline::new(self.resolved.clone(), Arc::new(template)));
        let progress = self.progress_bar(files.len() as u64);
        let stop_on_error = !config.error_handling.continue_on_error;
        let cancel = CancellationToken::new();

        let mut results = stream::iter(files)
            .map(|path| {
                let pipeline = pipeline.clone();
                let cancel = cancel.clone();
                async move {
                    let task_path = path.clone();
                    let result = task::spawn_blocking(move || {
                        if cancel.is_cancelled() {
                            return Ok(Staged::Cancelled);
                        }
                        if stop_on_error {
                            pipeline
                                .reconcile_file(&task_path)
                                .map(|r| Staged::Ready(Box::new(r)))
                        } else {
                            pipeline.process_file(&task_path).map(Staged::Done)
                        }
                    })
                    .await
                    .map_err(|e| format!("task failed: {}", e))
                    .and_then(|r| r.map_err(|e| e.detail()));
                    (path, result)
                }
            })
            .buffered(config.workers.max(1));

        while let Some((path, staged)) = results.next().await {
            let result = match staged {
                Ok(Staged::Done(outcome)) => Ok(outcome),
                Ok(Staged::Ready(reconciled)) => {
                    let pipeline = pipeline.clone();
                    task::spawn_blocking(move || pipeline.write(*reconciled))
                        .await
                        .map_err(|e| format!("task failed: {}", e))
                        .and_then(|r| r.map_err(|e| e.detail()))
                }
                Ok(Staged::Cancelled) => {
                    debug!("Skipped {} after an earlier failure", path.display());
                    continue;
                }
                Err(reason) => Err(reason),
            };

            progress.inc(1);
            match result {
                Ok(outcome) => {
                    stats.files_processed += 1;
                    stats.samples_processed += outcome.samples;
                    stats.abnormal_rows += outcome.abnormal_rows();
                    if outcome.output.is_some() {
                        stats.batches_written += outcome.reports.len();
                    }
                    stats.diagnostics.extend(outcome.diagnostics);
                }
                Err(reason) => {
                    error!("Failed to process {}: {}", path.display(), reason);
                    stats.files_failed += 1;
                    stats.failures.push((path, reason));
                    if stop_on_error {
                        warn!("Stopping after first failure");
                        cancel.cancel();
                        break;
                    }
                }
            }
        }
        progress.finish_and_clear();

        // Step 4: Error report
        let has_findings = !stats.failures.is_empty() || !stats.diagnostics.is_empty();
        if config.error_handling.create_error_report && has_findings && !config.dry_run {
            match write_error_report(&config.paths.output_dir, &stats) {
                Ok(path) => stats.error_report = Some(path),
                Err(e) => error!("Failed to write error report: {}", e),
            }
        }

        stats.processing_time_ms = start_time.elapsed().as_millis();
        if !self.quiet {
            print_summary(&stats, config.dry_run);
        }
        Ok(stats)
    }

    fn progress_bar(&self, total: u64) -> ProgressBar {
        if self.quiet {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map(|s| s.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb.set_message("reports");
        pb
    }
}

/// Load the template and check its sheet names
pub fn load_template(config: &ReconcileConfig) -> Result<(Workbook, Vec<Diagnostic>)> {
    let path = config.paths.template_path();
    if !path.is_file() {
        return Err(ReconcileError::TemplateNotFound { path });
    }

    let template = Workbook::open(&path)?;
    let mut diagnostics = Vec::new();

    if !xlsx_patch::supports(&path) {
        warn!(
            "Template {} is not an xlsx workbook; outputs keep its values but not its formatting",
            path.display()
        );
    }

    if config.validation.check_template_structure {
        let present = template.sheet_names();
        for expected in &config.template_sheet_names {
            if !present.contains(&expected.as_str()) {
                let message = format!(
                    "template sheet '{}' not found (sheets: {})",
                    expected,
                    present.join(", ")
                );
                warn!("{}", message);
                diagnostics.push(
                    Diagnostic::new(DiagnosticKind::MissingTemplateSheet, message).in_file(&path),
                );
            }
        }
    }

    info!(
        "Loaded template {} with {} sheets",
        path.display(),
        template.len()
    );
    Ok((template, diagnostics))
}

fn print_summary(stats: &ProcessingStats, dry_run: bool) {
    let title = if dry_run {
        "Reconciliation Summary (dry run)"
    } else {
        "Reconciliation Summary"
    };
    println!("\n{}", title.bright_green().bold());
    println!(
        "  {} {}ms",
        "Time elapsed:".bright_cyan(),
        stats.processing_time_ms.to_string().bright_white()
    );
    println!(
        "  {} {}",
        "Files processed:".bright_cyan(),
        stats.files_processed.to_string().bright_white()
    );
    if stats.files_failed > 0 {
        println!(
            "  {} {}",
            "Files failed:".bright_red(),
            stats.files_failed.to_string().bright_red().bold()
        );
    }
    println!(
        "  {} {}",
        "Samples:".bright_cyan(),
        stats.samples_processed.to_string().bright_white()
    );
    println!(
        "  {} {}",
        "Batches written:".bright_cyan(),
        stats.batches_written.to_string().bright_white()
    );
    println!(
        "  {} {}",
        "Abnormal rows:".bright_cyan(),
        stats.abnormal_rows.to_string().bright_yellow().bold()
    );
    if !stats.diagnostics.is_empty() {
        println!(
            "  {} {}",
            "Warnings:".bright_yellow(),
            stats.diagnostics.len().to_string().bright_yellow()
        );
    }
    if let Some(path) = &stats.error_report {
        println!(
            "  {} {}",
            "Error report:".bright_cyan(),
            path.display()
        );
    }
}
