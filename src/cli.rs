//! Command-line interface components.

use crate::config::ReconcileConfig;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "report_reconciler")]
#[command(about = "Reconcile semiconductor test reports into a standard report template")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    /// Directory of source reports (overrides the configured source_dir)
    #[arg(value_name = "SOURCE_DIR")]
    pub source_dir: Option<PathBuf>,

    /// Report template workbook
    #[arg(short, long)]
    pub template: Option<PathBuf>,

    /// Output directory for rendered reports
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of files reconciled concurrently
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Stop at the first file that fails
    #[arg(long)]
    pub stop_on_error: bool,

    /// Reconcile and count without writing any output
    #[arg(long)]
    pub dry_run: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn log_level(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }

    /// Load the layered configuration and apply command-line overrides
    pub fn into_config(self) -> Result<ReconcileConfig> {
        let (mut config, loaded_from) = ReconcileConfig::load_layered(self.config.as_deref())
            .context("Failed to load configuration")?;
        match &loaded_from {
            Some(path) => debug!("Loaded configuration from {}", path.display()),
            None => debug!("Using built-in configuration"),
        }

        if let Some(dir) = self.source_dir {
            config = config.with_source_dir(dir);
        }
        if let Some(template) = self.template {
            config = config.with_template(&template);
        }
        if let Some(dir) = self.output {
            config = config.with_output_dir(dir);
        }
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if self.stop_on_error {
            config = config.with_stop_on_error();
        }
        if self.dry_run {
            config = config.with_dry_run();
        }

        Ok(config)
    }
}

/// Set up structured logging on stderr
pub fn setup_logging(verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("report_reconciler={}", log_level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_timer(fmt::time::uptime())
                .with_writer(std::io::stderr),
        )
        .init();

    debug!("Logging initialized at level: {}", log_level);
}
