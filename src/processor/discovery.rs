//! Source report discovery
//!
//! Finds spreadsheet files directly inside the source directory. Results are
//! sorted so runs over the same directory process files in the same order.

use crate::constants::SOURCE_EXTENSIONS;
use crate::error::{ReconcileError, Result};
use glob::{MatchOptions, Pattern, glob_with};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// File discovery component for source report directories
#[derive(Debug)]
pub struct FileDiscovery {
    source_dir: PathBuf,
}

impl FileDiscovery {
    pub fn new(source_dir: PathBuf) -> Self {
        Self { source_dir }
    }

    /// Discover all spreadsheet files in the source directory
    pub async fn discover_source_files(&self) -> Result<Vec<PathBuf>> {
        let is_dir = fs::metadata(&self.source_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(ReconcileError::SourceDirNotFound {
                path: self.source_dir.clone(),
            });
        }

        debug!("Searching for source reports in: {}", self.source_dir.display());

        let base = Pattern::escape(&self.source_dir.to_string_lossy());
        let options = MatchOptions {
            case_sensitive: false,
            ..MatchOptions::new()
        };

        let mut files = Vec::new();
        for ext in SOURCE_EXTENSIONS {
            let pattern = format!("{}/*.{}", base, ext);
            for entry in glob_with(&pattern, options)?.flatten() {
                if is_source_file(&entry) && !files.contains(&entry) {
                    files.push(entry);
                }
            }
        }

        files.sort();
        debug!("Found {} source reports", files.len());
        Ok(files)
    }
}

/// Spreadsheet files, excluding the lock files office suites leave behind
fn is_source_file(path: &Path) -> bool {
    let locked = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("~$"));
    path.is_file() && !locked
}
