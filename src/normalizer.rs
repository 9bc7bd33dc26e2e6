//! Value normalization for measurement cells.
//!
//! Classifies raw cells into empty, numeric, overflow or text readings,
//! strips unit literals before parsing, and formats numbers for display.
//! Comparison paths see overflow as +infinity; display paths render the
//! configured overflow text instead.

use crate::config::ReconcileConfig;
use crate::constants;
use crate::models::{NormalizedLimit, NormalizedValue, RawValue};

/// How a normalized reading is written to a report cell
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayValue {
    /// Rounded number plus its rendered text (scientific for tiny magnitudes)
    Number { value: f64, text: String },
    Text(String),
    /// Overflow display text, written as a literal string
    Overflow(String),
    Invalid,
}

impl DisplayValue {
    /// Text used when several readings are joined into one cell
    pub fn as_text(&self) -> &str {
        match self {
            DisplayValue::Number { text, .. } => text,
            DisplayValue::Text(text) | DisplayValue::Overflow(text) => text,
            DisplayValue::Invalid => "",
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, DisplayValue::Invalid)
    }
}

/// Stateless cell classifier built from configuration
#[derive(Debug, Clone)]
pub struct Normalizer {
    units: Vec<String>,
    overflow_tokens: Vec<String>,
    na_tokens: Vec<String>,
    decimal_places: usize,
    scientific_threshold: f64,
    force_numeric: bool,
    overflow_display: String,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(&ReconcileConfig::default())
    }
}

impl Normalizer {
    pub fn new(config: &ReconcileConfig) -> Self {
        Self {
            units: config.values.units_longest_first(),
            overflow_tokens: config
                .recognition
                .overflow_tokens
                .iter()
                .filter(|t| !t.is_empty())
                .cloned()
                .collect(),
            na_tokens: config
                .recognition
                .na_tokens
                .iter()
                .map(|t| t.trim().to_lowercase())
                .collect(),
            decimal_places: config.values.decimal_places,
            scientific_threshold: config.values.scientific_notation_threshold,
            force_numeric: config.values.force_numeric_output,
            overflow_display: config.processing.overflow_display.clone(),
        }
    }

    /// Classify a raw cell
    pub fn classify(&self, raw: &RawValue) -> NormalizedValue {
        let text = match raw {
            RawValue::Empty => return NormalizedValue::Empty,
            RawValue::Number(n) if n.is_nan() => return NormalizedValue::Empty,
            RawValue::Number(n) => {
                return NormalizedValue::Numeric {
                    value: *n,
                    precision: self.decimal_places,
                };
            }
            RawValue::Text(text) => text.trim(),
        };

        if self.is_na_text(text) {
            return NormalizedValue::Empty;
        }

        if self.is_overflow_text(text) {
            return NormalizedValue::Overflow;
        }

        match self.parse_number(text) {
            Some(value) => NormalizedValue::Numeric {
                value,
                precision: self.decimal_places,
            },
            None if self.force_numeric => NormalizedValue::Empty,
            None => NormalizedValue::Text(text.to_string()),
        }
    }

    /// Value as written to a report cell
    pub fn to_display_value(&self, raw: &RawValue) -> DisplayValue {
        match self.classify(raw) {
            NormalizedValue::Empty => DisplayValue::Invalid,
            NormalizedValue::Overflow => DisplayValue::Overflow(self.overflow_display.clone()),
            NormalizedValue::Text(text) => DisplayValue::Text(text),
            NormalizedValue::Numeric { value, .. } => {
                let text = self.format_number(value);
                let value = text.parse::<f64>().unwrap_or(value);
                DisplayValue::Number { value, text }
            }
        }
    }

    /// Unrounded magnitude used for limit checks; overflow is +infinity
    pub fn to_comparison_value(&self, raw: &RawValue) -> Option<f64> {
        self.classify(raw).comparison_value()
    }

    pub fn is_overflow(&self, raw: &RawValue) -> bool {
        match raw {
            RawValue::Text(text) => {
                let text = text.trim();
                !self.is_na_text(text) && self.is_overflow_text(text)
            }
            _ => false,
        }
    }

    /// Round to the configured precision; tiny non-zero magnitudes use
    /// scientific notation with a signed two-digit exponent (`1.234560e-07`)
    pub fn format_number(&self, value: f64) -> String {
        let places = self.decimal_places;
        if value != 0.0 && value.abs() < self.scientific_threshold {
            return format_scientific(value, places);
        }

        let rounded = format!("{:.*}", places, value);
        let trimmed = if rounded.contains('.') {
            rounded.trim_end_matches('0').trim_end_matches('.')
        } else {
            rounded.as_str()
        };

        match trimmed {
            "-0" => "0".to_string(),
            other => other.to_string(),
        }
    }

    /// Parse a limit cell, keeping the raw cell for display.
    ///
    /// Overflow text is not a usable limit and parses as absent.
    pub fn normalize_limit(&self, raw: &RawValue) -> Option<NormalizedLimit> {
        if raw.is_blank() {
            return None;
        }
        let value = match self.classify(raw) {
            NormalizedValue::Numeric { value, .. } => Some(value),
            _ => match raw {
                // Limits keep their text even when output is forced numeric
                RawValue::Text(text) => self.parse_number(text.trim()),
                _ => None,
            },
        };
        Some(NormalizedLimit {
            raw: raw.clone(),
            value,
        })
    }

    /// Bias condition text, or `None` for blank and N/A cells
    pub fn condition_text(&self, raw: &RawValue) -> Option<String> {
        let text = raw.trimmed();
        if text.is_empty() || self.is_na_text(&text) {
            None
        } else {
            Some(text)
        }
    }

    fn is_na_text(&self, text: &str) -> bool {
        text.is_empty() || {
            let lower = text.to_lowercase();
            self.na_tokens.iter().any(|token| *token == lower)
        }
    }

    fn is_overflow_text(&self, text: &str) -> bool {
        text.starts_with(constants::OVERFLOW_LEAD)
            || self
                .overflow_tokens
                .iter()
                .any(|token| text.contains(token.as_str()))
    }

    fn parse_number(&self, text: &str) -> Option<f64> {
        let mut cleaned = text.to_string();
        for unit in &self.units {
            if cleaned.contains(unit.as_str()) {
                cleaned = cleaned.replace(unit.as_str(), "");
            }
        }
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            return None;
        }
        cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
    }
}

fn format_scientific(value: f64, places: usize) -> String {
    let formatted = format!("{:.*e}", places, value);
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => formatted,
    }
}
