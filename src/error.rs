//! Error handling for report reconciliation.
//!
//! Hard failures abort the processing of one source file (or the whole run
//! when the configuration itself is unusable). Recoverable findings such as a
//! missing alias or an unparseable sample number are not errors; they travel
//! as [`crate::models::Diagnostic`] values instead.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Spreadsheet error in {path}: {reason}")]
    Workbook { path: PathBuf, reason: String },

    #[error("Sheet '{sheet}' not found in {path}")]
    SheetNotFound { path: PathBuf, sheet: String },

    #[error("Source grid too small: metadata needs at least {required} rows, found {found}")]
    Structural { required: usize, found: usize },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Failed to parse configuration file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Template not found at path: {path}")]
    TemplateNotFound { path: PathBuf },

    #[error("Source directory not found at path: {path}")]
    SourceDirNotFound { path: PathBuf },

    #[error("{}: {cause}", path.display())]
    InFile {
        path: PathBuf,
        cause: Box<ReconcileError>,
    },
}

impl ReconcileError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a spreadsheet read/write error
    pub fn workbook(path: impl AsRef<Path>, reason: impl ToString) -> Self {
        Self::Workbook {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Attribute this error to a source file.
    ///
    /// Errors that already name a path are returned unchanged.
    pub fn in_file(self, path: impl AsRef<Path>) -> Self {
        match self {
            Self::Workbook { .. } | Self::SheetNotFound { .. } | Self::InFile { .. } => self,
            other => Self::InFile {
                path: path.as_ref().to_path_buf(),
                cause: Box::new(other),
            },
        }
    }

    /// Message without the file attribution added by [`Self::in_file`]
    pub fn detail(&self) -> String {
        match self {
            Self::InFile { cause, .. } => cause.to_string(),
            other => other.to_string(),
        }
    }

    /// True for failures caused by the layout of a single source grid
    pub fn is_structural(&self) -> bool {
        match self {
            Self::Structural { .. } => true,
            Self::InFile { cause, .. } => cause.is_structural(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
