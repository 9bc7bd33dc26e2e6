//! Application constants for the report reconciler
//!
//! Default layout coordinates, recognition tokens and file conventions used
//! when no configuration file overrides them.

// =============================================================================
// Files and sheets
// =============================================================================

/// Source workbook extensions picked up by directory discovery
pub const SOURCE_EXTENSIONS: &[&str] = &["xlsx", "xls", "xlsm", "ods"];

/// Prefix prepended to the source file stem for each rendered report
pub const OUTPUT_FILE_PREFIX: &str = "processed_";

/// Name of the configuration file looked up in the user config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Application directory under the user config directory
pub const APP_DIR_NAME: &str = "report-reconciler";

/// Sheet holding the raw measurements in each source workbook
pub const DEFAULT_SOURCE_SHEET: &str = "Data";

/// Sheets expected in the report template
pub const DEFAULT_TEMPLATE_SHEETS: &[&str] = &["HTRB 100%", "AC"];

// =============================================================================
// Source layout (0-based grid coordinates)
// =============================================================================

pub mod source_layout {
    pub const ITEM_NAME_ROW: usize = 15;
    pub const BIAS_ROWS: [usize; 3] = [16, 17, 18];
    pub const MIN_LIMIT_ROW: usize = 19;
    pub const MAX_LIMIT_ROW: usize = 20;
    pub const DATA_START_ROW: usize = 28;
    pub const TEST_ITEMS_START_COL: usize = 2;
    pub const SAMPLE_ID_COL: usize = 0;
}

// =============================================================================
// Template layout (0-based grid coordinates)
// =============================================================================

pub mod template_layout {
    pub const TEST_ITEMS_ROW: usize = 7;
    pub const TEST_CONDITIONS_ROW: usize = 9;
    pub const TEST_CONDITIONS_MAX_ROWS: usize = 2;
    pub const MIN_LIMIT_ROW: usize = 11;
    pub const MAX_LIMIT_ROW: usize = 12;
    pub const DATA_START_ROW: usize = 17;
    pub const TEST_ITEMS_START_COL: usize = 1;
    pub const SAMPLE_ID_COL: usize = 0;

    /// Abnormal row count cell used by the built-in batches
    pub const ABNORMAL_COUNT_CELL: (usize, usize) = (39, 1);
}

// =============================================================================
// Recognition
// =============================================================================

/// Sample ID prefixes that imply each other when either is configured
pub const PREFIX_FAMILIES: &[(&str, &str)] = &[("P", "F")];

/// Default sample prefix
pub const DEFAULT_SAMPLE_PREFIX: &str = "P";

/// Upper bound on rows scanned for samples after the data start row
pub const DEFAULT_MAX_DATA_ROWS: usize = 100;

/// Substrings marking a reading beyond the instrument range
pub const OVERFLOW_TOKENS: &[&str] = &["OVER", "Over", "over"];

/// Leading character marking a reading beyond the instrument range
pub const OVERFLOW_LEAD: char = '>';

/// Cell texts treated as "no reading" (compared case-insensitively)
pub const NA_TOKENS: &[&str] = &["nan", "n/a"];

/// Text written in place of an overflow reading
pub const OVERFLOW_DISPLAY: &str = "Over";

// =============================================================================
// Value processing
// =============================================================================

/// Unit literals stripped before numeric parsing, by category
pub const UNIT_PATTERNS: &[(&str, &[&str])] = &[
    ("voltage", &["V", "mV"]),
    ("current", &["A", "mA", "uA", "nA"]),
    ("resistance", &["R", "mR", "ohm", "Ω"]),
];

pub const DECIMAL_PLACES: usize = 6;
pub const SCIENTIFIC_NOTATION_THRESHOLD: f64 = 0.000_001;

pub const COMBINE_SEPARATOR: &str = "; ";

/// Solid fill applied to highlighted cells (RGB hex)
pub const HIGHLIGHT_COLOR: &str = "FFFF00";

/// Placeholder substituted into count format templates
pub const COUNT_PLACEHOLDER: &str = "{count}";
