//! Abnormality detection on absolute magnitudes.
//!
//! A reading is abnormal when it overflows, or when its magnitude falls
//! below any minimum or above any maximum limit in scope. A sample row is
//! abnormal when any of its mapped readings is, and counts once per batch.

use crate::config::LimitScope;
use crate::models::{
    AbnormalHit, AbnormalityReport, Batch, CanonicalItem, NormalizedLimit, NormalizedValue,
    RawValue, SampleRow,
};
use crate::normalizer::Normalizer;
use tracing::debug;

/// Absolute limit magnitudes a reading is checked against
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Limits {
    min: Vec<f64>,
    max: Vec<f64>,
}

impl Limits {
    pub fn new(min: impl IntoIterator<Item = f64>, max: impl IntoIterator<Item = f64>) -> Self {
        Self {
            min: min.into_iter().map(f64::abs).collect(),
            max: max.into_iter().map(f64::abs).collect(),
        }
    }

    /// Every parseable limit contributed to the item
    pub fn for_item(item: &CanonicalItem) -> Self {
        Self::new(parsed(&item.min_limits), parsed(&item.max_limits))
    }

    /// Only the limits contributed alongside source column `index`
    pub fn for_contribution(item: &CanonicalItem, index: usize) -> Self {
        let pick = |limits: &[Option<NormalizedLimit>]| {
            limits
                .get(index)
                .and_then(|l| l.as_ref())
                .and_then(|l| l.value)
        };
        Self::new(pick(&item.min_limits), pick(&item.max_limits))
    }

    pub fn is_empty(&self) -> bool {
        self.min.is_empty() && self.max.is_empty()
    }
}

fn parsed(limits: &[Option<NormalizedLimit>]) -> impl Iterator<Item = f64> + '_ {
    limits.iter().flatten().filter_map(|l| l.value)
}

/// Overflow is always abnormal; empty and text readings never are
pub fn is_abnormal(value: &NormalizedValue, limits: &Limits) -> bool {
    let magnitude = match value {
        NormalizedValue::Overflow => return true,
        NormalizedValue::Numeric { value, .. } => value.abs(),
        NormalizedValue::Empty | NormalizedValue::Text(_) => return false,
    };
    if limits.is_empty() {
        return false;
    }

    limits.min.iter().any(|min| magnitude < *min) || limits.max.iter().any(|max| magnitude > *max)
}

/// Applies limit checks to mapped readings
#[derive(Debug, Clone, Copy)]
pub struct Detector<'a> {
    normalizer: &'a Normalizer,
    scope: LimitScope,
}

impl<'a> Detector<'a> {
    pub fn new(normalizer: &'a Normalizer, scope: LimitScope) -> Self {
        Self { normalizer, scope }
    }

    pub fn limits(&self, item: &CanonicalItem, contribution: usize) -> Limits {
        match self.scope {
            LimitScope::Item => Limits::for_item(item),
            LimitScope::Column => Limits::for_contribution(item, contribution),
        }
    }

    /// Check one reading of `item` taken from its `contribution`-th column
    pub fn check_reading(
        &self,
        item: &CanonicalItem,
        contribution: usize,
        raw: &RawValue,
    ) -> Option<AbnormalHit> {
        let value = self.normalizer.classify(raw);
        if !value.is_valid() {
            return None;
        }
        if !is_abnormal(&value, &self.limits(item, contribution)) {
            return None;
        }
        Some(AbnormalHit {
            item: item.key.clone(),
            column: item.source_columns[contribution],
            raw: raw.trimmed(),
            overflow: value.is_overflow(),
        })
    }

    /// First abnormal reading of the row, if any
    pub fn row_is_abnormal(&self, row: &SampleRow, items: &[CanonicalItem]) -> Option<AbnormalHit> {
        items.iter().find_map(|item| {
            item.source_columns
                .iter()
                .enumerate()
                .find_map(|(i, &col)| self.check_reading(item, i, row.cell(col)))
        })
    }

    /// Count abnormal rows of one batch; each row counts at most once
    pub fn count_abnormal_rows(&self, batch: &Batch, items: &[CanonicalItem]) -> AbnormalityReport {
        let mut report = AbnormalityReport {
            batch_id: batch.batch_id.clone(),
            ..Default::default()
        };

        for batch_row in &batch.rows {
            let sample_id = batch_row.sample.sample_id.clone();
            let hit = self.row_is_abnormal(&batch_row.sample, items);

            report.per_row_flags.insert(sample_id.clone(), hit.is_some());
            if let Some(hit) = hit {
                debug!("Sample {} abnormal: {}", sample_id, hit);
                report.abnormal_row_count += 1;
                if hit.overflow {
                    report.overflow_rows += 1;
                } else {
                    report.out_of_limit_rows += 1;
                }
                report.hits.push((sample_id, hit));
            }
        }

        report
    }
}
