//! Alias-based mapping of source test items onto canonical report items.

use crate::config::{ItemAlias, ReconcileConfig};
use crate::error::{ReconcileError, Result};
use crate::extractor::ItemMetadataSet;
use crate::models::{CanonicalItem, Diagnostic, DiagnosticKind, RawValue};
use crate::normalizer::Normalizer;
use std::collections::HashMap;
use tracing::{debug, warn};

/// How bias conditions of one alias are stored on the canonical item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionMode {
    /// One entry per condition, rendered over several template rows
    MultiLine,
    /// One joined entry per alias
    SingleLine { separator: String },
}

#[derive(Debug, Clone)]
pub struct MappingOptions {
    pub mode: ConditionMode,
    pub warn_missing_limits: bool,
}

impl MappingOptions {
    pub fn from_config(config: &ReconcileConfig) -> Self {
        let mode = if config.processing.conditions_multiline {
            ConditionMode::MultiLine
        } else {
            ConditionMode::SingleLine {
                separator: config.processing.combine_conditions_separator.clone(),
            }
        };
        Self {
            mode,
            warn_missing_limits: config.validation.warn_missing_limits,
        }
    }
}

/// Canonical items in configured order plus non-fatal findings
#[derive(Debug, Clone, Default)]
pub struct MappingOutcome {
    pub items: Vec<CanonicalItem>,
    pub warnings: Vec<Diagnostic>,
}

/// Build canonical items from the extracted metadata.
///
/// Missing aliases and items without numeric limits are reported as
/// warnings. A source column claimed by two canonical items is a
/// configuration error.
pub fn map_items(
    metadata: &ItemMetadataSet,
    alias_table: &[ItemAlias],
    options: &MappingOptions,
    normalizer: &Normalizer,
) -> Result<MappingOutcome> {
    let mut outcome = MappingOutcome::default();
    let mut owners: HashMap<usize, &str> = HashMap::new();

    for entry in alias_table {
        let mut item = CanonicalItem::new(entry.key.clone());

        for alias in &entry.aliases {
            let Some(info) = metadata.get(alias) else {
                let message = format!("source item '{}' for '{}' not found", alias, entry.key);
                warn!("{}", message);
                outcome
                    .warnings
                    .push(Diagnostic::new(DiagnosticKind::MissingAlias, message));
                continue;
            };

            match owners.get(&info.source_column) {
                Some(owner) if *owner == entry.key => {
                    debug!("Alias '{}' listed twice for '{}'", alias, entry.key);
                    continue;
                }
                Some(owner) => {
                    return Err(ReconcileError::configuration(format!(
                        "source column {} ('{}') is mapped to both '{}' and '{}'",
                        info.source_column, alias, owner, entry.key
                    )));
                }
                None => {
                    owners.insert(info.source_column, entry.key.as_str());
                }
            }

            let conditions: Vec<String> = info
                .bias_conditions
                .iter()
                .filter_map(|bias| normalizer.condition_text(&RawValue::from(bias.as_str())))
                .collect();

            match &options.mode {
                ConditionMode::MultiLine => item.conditions.extend(conditions),
                ConditionMode::SingleLine { separator } => {
                    item.conditions.push(conditions.join(separator))
                }
            }

            item.min_limits.push(
                info.min_limit
                    .as_ref()
                    .and_then(|raw| normalizer.normalize_limit(raw)),
            );
            item.max_limits.push(
                info.max_limit
                    .as_ref()
                    .and_then(|raw| normalizer.normalize_limit(raw)),
            );
            item.source_columns.push(info.source_column);
            item.source_aliases.push(alias.clone());

            debug!("  {} -> column {} for {}", alias, info.source_column, entry.key);
        }

        if options.warn_missing_limits && !item.has_numeric_limits() {
            let message = format!("'{}' has no numeric limits", item.key);
            warn!("{}", message);
            outcome
                .warnings
                .push(Diagnostic::new(DiagnosticKind::MissingLimits, message));
        }

        debug!(
            "Canonical item {}: {} columns {:?}, {} conditions",
            item.key,
            item.contribution_count(),
            item.source_columns,
            item.conditions.len()
        );
        outcome.items.push(item);
    }

    Ok(outcome)
}
