//! Configuration management and validation.
//!
//! Provides the positional layouts of the source reports and of the report
//! template, the alias table, recognition tokens, batch ranges and output
//! options. Configuration is loaded once (built-in defaults, then an optional
//! TOML file, then CLI overrides), validated, and shared read-only afterwards.

use crate::constants::{self, source_layout, template_layout};
use crate::error::{ReconcileError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Input and output locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory scanned for source reports
    pub source_dir: PathBuf,

    /// Directory holding the report template
    pub template_dir: PathBuf,

    /// Directory receiving rendered reports and the error report
    pub output_dir: PathBuf,

    /// Template file name inside `template_dir`
    pub template_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("source_reports"),
            template_dir: PathBuf::from("templates"),
            output_dir: PathBuf::from("output"),
            template_file: "template_report.xlsx".to_string(),
        }
    }
}

impl PathsConfig {
    pub fn template_path(&self) -> PathBuf {
        self.template_dir.join(&self.template_file)
    }
}

/// Where test metadata and samples live in a source grid (0-based)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceLayout {
    pub item_name_row: usize,

    /// Bias condition rows, at most three
    pub bias_rows: Vec<usize>,

    pub min_limit_row: usize,
    pub max_limit_row: usize,

    /// First row scanned for samples
    pub data_start_row: usize,

    /// First column holding test items
    pub test_items_start_col: usize,

    /// Column holding sample IDs (P1, P2, ...)
    pub sample_id_col: usize,
}

impl Default for SourceLayout {
    fn default() -> Self {
        Self {
            item_name_row: source_layout::ITEM_NAME_ROW,
            bias_rows: source_layout::BIAS_ROWS.to_vec(),
            min_limit_row: source_layout::MIN_LIMIT_ROW,
            max_limit_row: source_layout::MAX_LIMIT_ROW,
            data_start_row: source_layout::DATA_START_ROW,
            test_items_start_col: source_layout::TEST_ITEMS_START_COL,
            sample_id_col: source_layout::SAMPLE_ID_COL,
        }
    }
}

impl SourceLayout {
    /// Minimum grid height needed to read every metadata row
    pub fn required_rows(&self) -> usize {
        self.bias_rows
            .iter()
            .copied()
            .chain([self.item_name_row, self.min_limit_row, self.max_limit_row])
            .max()
            .unwrap_or(0)
            + 1
    }
}

/// Sample recognition and special-value tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Sample ID prefixes; paired families expand automatically
    pub sample_prefixes: Vec<String>,

    /// Continue past rows with a blank sample ID
    pub skip_empty_rows: bool,

    /// Stop at the first blank sample ID when blanks are not skipped
    pub auto_detect_data_end: bool,

    /// Maximum number of rows scanned after the data start row
    pub max_data_rows: usize,

    /// Case-sensitive substrings marking an overflow reading
    pub overflow_tokens: Vec<String>,

    /// Case-insensitive texts meaning "no reading"
    pub na_tokens: Vec<String>,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            sample_prefixes: vec![constants::DEFAULT_SAMPLE_PREFIX.to_string()],
            skip_empty_rows: true,
            auto_detect_data_end: true,
            max_data_rows: constants::DEFAULT_MAX_DATA_ROWS,
            overflow_tokens: to_strings(constants::OVERFLOW_TOKENS),
            na_tokens: to_strings(constants::NA_TOKENS),
        }
    }
}

/// One canonical template item and the source item names feeding it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemAlias {
    pub key: String,
    pub aliases: Vec<String>,
}

impl ItemAlias {
    pub fn new(key: &str, aliases: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            aliases: to_strings(aliases),
        }
    }
}

/// A sample-number range routed to one template sheet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchRangeConfig {
    pub name: String,

    /// Inclusive bounds on the numeric sample suffix
    pub start: i64,
    pub end: i64,

    /// 0-based sheet index in the template workbook
    pub target_sheet: usize,

    #[serde(default)]
    pub description: String,

    /// Restrict the range to these prefixes (expanded like the global set)
    #[serde(default)]
    pub prefixes: Option<Vec<String>>,
}

/// Where reconciled values land in the template (0-based)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateLayout {
    pub test_items_row: usize,
    pub test_conditions_row: usize,

    /// Rows available for conditions in multi-line mode
    pub test_conditions_max_rows: usize,

    pub min_limit_row: usize,
    pub max_limit_row: usize,
    pub data_start_row: usize,
    pub test_items_start_col: usize,
    pub sample_id_col: usize,
}

impl Default for TemplateLayout {
    fn default() -> Self {
        Self {
            test_items_row: template_layout::TEST_ITEMS_ROW,
            test_conditions_row: template_layout::TEST_CONDITIONS_ROW,
            test_conditions_max_rows: template_layout::TEST_CONDITIONS_MAX_ROWS,
            min_limit_row: template_layout::MIN_LIMIT_ROW,
            max_limit_row: template_layout::MAX_LIMIT_ROW,
            data_start_row: template_layout::DATA_START_ROW,
            test_items_start_col: template_layout::TEST_ITEMS_START_COL,
            sample_id_col: template_layout::SAMPLE_ID_COL,
        }
    }
}

/// Which limits a reading is checked against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
    /// Every limit contributed to the canonical item
    #[default]
    Item,
    /// Only the limits read from the same source column
    Column,
}

/// Rendering options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Write single readings as numeric cells
    pub convert_to_numeric: bool,

    /// Keep each bias condition separate so it can wrap over several rows
    pub conditions_multiline: bool,

    pub combine_conditions_separator: String,
    pub combine_values_separator: String,

    /// Written when a sample has no reading for an item
    pub empty_value_placeholder: String,

    /// Text written for overflow readings
    pub overflow_display: String,

    pub limit_scope: LimitScope,

    /// RGB hex fill for highlighted cells
    pub highlight_color: String,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            convert_to_numeric: true,
            conditions_multiline: true,
            combine_conditions_separator: constants::COMBINE_SEPARATOR.to_string(),
            combine_values_separator: constants::COMBINE_SEPARATOR.to_string(),
            empty_value_placeholder: String::new(),
            overflow_display: constants::OVERFLOW_DISPLAY.to_string(),
            limit_scope: LimitScope::Item,
            highlight_color: constants::HIGHLIGHT_COLOR.to_string(),
        }
    }
}

/// Numeric parsing and formatting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueProcessingConfig {
    /// Unit literals stripped before parsing, by category
    pub unit_patterns: BTreeMap<String, Vec<String>>,

    pub decimal_places: usize,

    /// Non-zero magnitudes below this render in scientific notation
    pub scientific_notation_threshold: f64,

    /// Drop non-numeric readings instead of keeping their text
    pub force_numeric_output: bool,
}

impl Default for ValueProcessingConfig {
    fn default() -> Self {
        Self {
            unit_patterns: constants::UNIT_PATTERNS
                .iter()
                .map(|(category, units)| (category.to_string(), to_strings(units)))
                .collect(),
            decimal_places: constants::DECIMAL_PLACES,
            scientific_notation_threshold: constants::SCIENTIFIC_NOTATION_THRESHOLD,
            force_numeric_output: true,
        }
    }
}

impl ValueProcessingConfig {
    /// All unit literals, longest first so `mV` is stripped before `V`
    pub fn units_longest_first(&self) -> Vec<String> {
        let mut units: Vec<String> = self
            .unit_patterns
            .values()
            .flatten()
            .filter(|u| !u.is_empty())
            .cloned()
            .collect();
        units.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then(a.cmp(b)));
        units.dedup();
        units
    }
}

/// Cell receiving the abnormal row count of one template sheet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CountPosition {
    pub sheet: usize,
    pub row: usize,
    pub col: usize,

    #[serde(default = "default_true")]
    pub write_as_number: bool,

    /// Text template used when `write_as_number` is off
    #[serde(default = "default_count_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AbnormalStatisticsConfig {
    pub enable_counting: bool,
    pub write_to_template: bool,
    pub positions: Vec<CountPosition>,
}

impl Default for AbnormalStatisticsConfig {
    fn default() -> Self {
        let (row, col) = template_layout::ABNORMAL_COUNT_CELL;
        Self {
            enable_counting: true,
            write_to_template: true,
            positions: [1, 2]
                .into_iter()
                .map(|sheet| CountPosition {
                    sheet,
                    row,
                    col,
                    write_as_number: true,
                    format: default_count_format(),
                })
                .collect(),
        }
    }
}

impl AbnormalStatisticsConfig {
    pub fn position_for(&self, sheet: usize) -> Option<&CountPosition> {
        self.positions.iter().find(|p| p.sheet == sheet)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorHandlingConfig {
    /// Keep going after a source file fails
    pub continue_on_error: bool,

    /// Write a run report listing failures and diagnostics
    pub create_error_report: bool,
}

impl Default for ErrorHandlingConfig {
    fn default() -> Self {
        Self {
            continue_on_error: true,
            create_error_report: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Warn when configured template sheet names are missing
    pub check_template_structure: bool,

    /// Warn when a canonical item ends up without numeric limits
    pub warn_missing_limits: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            check_template_structure: true,
            warn_missing_limits: true,
        }
    }
}

/// Global configuration for report reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub paths: PathsConfig,

    /// Sheet holding measurements in each source workbook
    pub source_sheet_name: String,

    /// Sheet names the template is expected to contain
    pub template_sheet_names: Vec<String>,

    pub source_layout: SourceLayout,
    pub recognition: RecognitionConfig,

    /// Canonical items in template column order
    pub item_mapping: Vec<ItemAlias>,

    pub batches: Vec<BatchRangeConfig>,
    pub template_layout: TemplateLayout,
    pub processing: ProcessingConfig,
    pub values: ValueProcessingConfig,
    pub abnormal_statistics: AbnormalStatisticsConfig,
    pub error_handling: ErrorHandlingConfig,
    pub validation: ValidationConfig,

    /// Source files processed concurrently
    pub workers: usize,

    /// Reconcile and count without writing reports
    pub dry_run: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            source_sheet_name: constants::DEFAULT_SOURCE_SHEET.to_string(),
            template_sheet_names: to_strings(constants::DEFAULT_TEMPLATE_SHEETS),
            source_layout: SourceLayout::default(),
            recognition: RecognitionConfig::default(),
            item_mapping: vec![
                ItemAlias::new("HVISG", &["5 ISGS"]),
                ItemAlias::new("VGS(th)", &["7 VTH"]),
                ItemAlias::new("BVDSS", &["8 BVDSS"]),
                ItemAlias::new("HVIDSS", &["9 IDSS", "9 HVIDSS"]),
                ItemAlias::new("RDS(ON)", &["10 RDON"]),
            ],
            batches: vec![
                BatchRangeConfig {
                    name: "group1".to_string(),
                    start: 1,
                    end: 22,
                    target_sheet: 1,
                    description: "First batch".to_string(),
                    prefixes: None,
                },
                BatchRangeConfig {
                    name: "group2".to_string(),
                    start: 23,
                    end: 44,
                    target_sheet: 2,
                    description: "Second batch".to_string(),
                    prefixes: None,
                },
            ],
            template_layout: TemplateLayout::default(),
            processing: ProcessingConfig::default(),
            values: ValueProcessingConfig::default(),
            abnormal_statistics: AbnormalStatisticsConfig::default(),
            error_handling: ErrorHandlingConfig::default(),
            validation: ValidationConfig::default(),
            workers: num_cpus::get().max(1),
            dry_run: false,
        }
    }
}

impl ReconcileConfig {
    /// Default config file location (`<config dir>/report-reconciler/config.toml`)
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| {
            dir.join(constants::APP_DIR_NAME)
                .join(constants::CONFIG_FILE_NAME)
        })
    }

    /// Load a TOML file; unspecified fields keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text).map_err(|e| match e {
            ReconcileError::ConfigParse { source, .. } => ReconcileError::ConfigParse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|source| ReconcileError::ConfigParse {
            path: PathBuf::new(),
            source,
        })
    }

    /// Load from an explicit file, or the default location when it exists,
    /// or fall back to built-in defaults. Returns the file actually used.
    pub fn load_layered(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::from_file(path)?, Some(path.to_path_buf())));
        }

        match Self::default_config_path().filter(|p| p.exists()) {
            Some(path) => Ok((Self::from_file(&path)?, Some(path))),
            None => {
                debug!("No config file found, using built-in defaults");
                Ok((Self::default(), None))
            }
        }
    }

    /// Set the source directory
    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.paths.source_dir = dir.into();
        self
    }

    /// Set the output directory
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.paths.output_dir = dir.into();
        self
    }

    /// Point at a template file, splitting it into directory and name
    pub fn with_template(mut self, path: &Path) -> Self {
        self.paths.template_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        self.paths.template_file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self
    }

    /// Set the concurrent file count
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Stop the run at the first failing file
    pub fn with_stop_on_error(mut self) -> Self {
        self.error_handling.continue_on_error = false;
        self
    }

    /// Enable dry-run mode
    pub fn with_dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Canonical sample prefix set with paired families expanded
    pub fn sample_prefixes(&self) -> SamplePrefixes {
        SamplePrefixes::expand(&self.recognition.sample_prefixes)
    }

    /// Batch ranges with their prefix restrictions resolved
    pub fn batch_ranges(&self) -> Vec<BatchRange> {
        let global = self.sample_prefixes();
        self.batches
            .iter()
            .map(|b| BatchRange {
                id: b.name.clone(),
                start: b.start,
                end: b.end,
                target_sheet: b.target_sheet,
                prefixes: b
                    .prefixes
                    .as_deref()
                    .map(SamplePrefixes::expand)
                    .unwrap_or_else(|| global.clone()),
            })
            .collect()
    }

    /// Validate once before processing starts
    pub fn validate(&self) -> Result<()> {
        if self.item_mapping.is_empty() {
            return Err(ReconcileError::configuration("item_mapping is empty"));
        }
        for (i, entry) in self.item_mapping.iter().enumerate() {
            if entry.key.trim().is_empty() {
                return Err(ReconcileError::configuration(format!(
                    "item_mapping entry {} has an empty key",
                    i
                )));
            }
            if self.item_mapping[..i].iter().any(|e| e.key == entry.key) {
                return Err(ReconcileError::configuration(format!(
                    "canonical item '{}' is configured twice",
                    entry.key
                )));
            }
            if entry.aliases.is_empty() {
                return Err(ReconcileError::configuration(format!(
                    "canonical item '{}' has no source aliases",
                    entry.key
                )));
            }
        }

        if self.sample_prefixes().is_empty() {
            return Err(ReconcileError::configuration(
                "at least one sample prefix is required",
            ));
        }

        if self.source_layout.bias_rows.len() > 3 {
            return Err(ReconcileError::configuration(format!(
                "at most 3 bias rows are supported, {} configured",
                self.source_layout.bias_rows.len()
            )));
        }

        if self.template_layout.test_conditions_max_rows == 0 {
            return Err(ReconcileError::configuration(
                "template_layout.test_conditions_max_rows must be at least 1",
            ));
        }

        if self.workers == 0 {
            return Err(ReconcileError::configuration("workers must be at least 1"));
        }

        parse_rgb_hex(&self.processing.highlight_color)?;
        self.validate_batches()?;

        Ok(())
    }

    fn validate_batches(&self) -> Result<()> {
        for batch in &self.batches {
            if batch.start > batch.end {
                return Err(ReconcileError::configuration(format!(
                    "batch '{}' has start {} after end {}",
                    batch.name, batch.start, batch.end
                )));
            }
        }

        ensure_disjoint(&self.batch_ranges())
    }
}

/// Reject ranges that share both a sample number and a prefix
pub fn ensure_disjoint(ranges: &[BatchRange]) -> Result<()> {
    for (i, a) in ranges.iter().enumerate() {
        for b in &ranges[i + 1..] {
            let numbers_overlap = a.start <= b.end && b.start <= a.end;
            let prefixes_overlap = a.prefixes.iter().any(|p| b.prefixes.contains(p));
            if numbers_overlap && prefixes_overlap {
                return Err(ReconcileError::configuration(format!(
                    "batch ranges '{}' [{}, {}] and '{}' [{}, {}] overlap",
                    a.id, a.start, a.end, b.id, b.start, b.end
                )));
            }
        }
    }

    Ok(())
}

/// Canonical sample prefix set.
///
/// Configuring one member of a paired family (`P`/`F`) enables the other.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SamplePrefixes {
    prefixes: Vec<String>,
}

impl SamplePrefixes {
    /// Expand configured prefixes into the canonical set, preserving order
    pub fn expand<S: AsRef<str>>(configured: &[S]) -> Self {
        let mut prefixes: Vec<String> = Vec::new();
        let mut push = |p: &str| {
            if !prefixes.iter().any(|existing| existing == p) {
                prefixes.push(p.to_string());
            }
        };

        for prefix in configured {
            let prefix = prefix.as_ref().trim();
            if prefix.is_empty() {
                continue;
            }
            push(prefix);
            for (a, b) in constants::PREFIX_FAMILIES {
                if prefix == *a {
                    push(*b);
                } else if prefix == *b {
                    push(*a);
                }
            }
        }

        Self { prefixes }
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.prefixes.iter().map(String::as_str)
    }

    pub fn contains(&self, prefix: &str) -> bool {
        self.prefixes.iter().any(|p| p == prefix)
    }

    /// True when `sample_id` starts with any prefix in the set
    pub fn matches(&self, sample_id: &str) -> bool {
        self.iter().any(|p| sample_id.starts_with(p))
    }
}

/// A validated batch range
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRange {
    pub id: String,
    pub start: i64,
    pub end: i64,
    pub target_sheet: usize,
    pub prefixes: SamplePrefixes,
}

impl BatchRange {
    pub fn accepts(&self, prefix: &str, number: i64) -> bool {
        self.start <= number && number <= self.end && self.prefixes.contains(prefix)
    }
}

/// Validated configuration plus the lookup data derived from it
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: ReconcileConfig,
    pub prefixes: SamplePrefixes,
    pub batch_ranges: Vec<BatchRange>,
    pub highlight_rgb: u32,
}

impl ReconcileConfig {
    /// Validate and derive prefixes, batch ranges and the highlight colour
    pub fn resolve(self) -> Result<ResolvedConfig> {
        self.validate()?;
        let highlight_rgb = parse_rgb_hex(&self.processing.highlight_color)?;
        Ok(ResolvedConfig {
            prefixes: self.sample_prefixes(),
            batch_ranges: self.batch_ranges(),
            highlight_rgb,
            config: self,
        })
    }
}

/// Parse an `RRGGBB` (optionally `#`-prefixed) colour
pub fn parse_rgb_hex(color: &str) -> Result<u32> {
    let hex = color.trim().trim_start_matches('#');
    if hex.len() != 6 {
        return Err(ReconcileError::configuration(format!(
            "highlight colour '{}' is not RRGGBB hex",
            color
        )));
    }
    u32::from_str_radix(hex, 16).map_err(|_| {
        ReconcileError::configuration(format!("highlight colour '{}' is not RRGGBB hex", color))
    })
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn default_true() -> bool {
    true
}

fn default_count_format() -> String {
    constants::COUNT_PLACEHOLDER.to_string()
}
