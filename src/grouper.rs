//! Partitioning of sample rows into batches by numeric sample suffix.

use crate::config::{BatchRange, SamplePrefixes, ensure_disjoint};
use crate::error::Result;
use crate::models::{Batch, BatchRow, Diagnostic, DiagnosticKind, SampleRow};
use tracing::{debug, info, warn};

/// Batches in configured range order plus rows that could not be placed
#[derive(Debug, Clone, Default)]
pub struct GroupOutcome {
    /// One batch per configured range, possibly empty
    pub batches: Vec<Batch>,
    pub diagnostics: Vec<Diagnostic>,
}

/// How a sample ID splits into prefix and number
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleNumber {
    Parsed { prefix: String, number: i64 },
    /// A prefix matched but no remainder parsed as an integer
    Unparseable,
    NoPrefix,
}

/// Split a sample ID, trying prefixes in canonical order.
///
/// The first prefix whose trimmed remainder parses as an integer wins.
pub fn split_sample_id(sample_id: &str, prefixes: &SamplePrefixes) -> SampleNumber {
    let mut matched = false;
    for prefix in prefixes.iter() {
        let Some(rest) = sample_id.strip_prefix(prefix) else {
            continue;
        };
        matched = true;
        if let Ok(number) = rest.trim().parse::<i64>() {
            return SampleNumber::Parsed {
                prefix: prefix.to_string(),
                number,
            };
        }
    }

    if matched {
        SampleNumber::Unparseable
    } else {
        SampleNumber::NoPrefix
    }
}

/// Assign sample rows to the first range containing their number.
///
/// Rows keep their source order inside each batch. Ranges that overlap on a
/// shared prefix are rejected.
pub fn group(
    rows: &[SampleRow],
    ranges: &[BatchRange],
    prefixes: &SamplePrefixes,
) -> Result<GroupOutcome> {
    ensure_disjoint(ranges)?;

    let mut outcome = GroupOutcome {
        batches: ranges
            .iter()
            .map(|range| Batch {
                batch_id: range.id.clone(),
                range_start: range.start,
                range_end: range.end,
                target_sheet: range.target_sheet,
                rows: Vec::new(),
            })
            .collect(),
        diagnostics: Vec::new(),
    };

    for row in rows {
        let (prefix, number) = match split_sample_id(&row.sample_id, prefixes) {
            SampleNumber::Parsed { prefix, number } => (prefix, number),
            SampleNumber::Unparseable => {
                let message = "sample number is not an integer".to_string();
                warn!("Sample {}: {}", row.sample_id, message);
                outcome.diagnostics.push(
                    Diagnostic::new(DiagnosticKind::UnparseableSampleNumber, message)
                        .for_sample(&row.sample_id),
                );
                continue;
            }
            SampleNumber::NoPrefix => {
                debug!("Sample {} matches no prefix, skipped", row.sample_id);
                continue;
            }
        };

        let Some(index) = ranges.iter().position(|r| r.accepts(&prefix, number)) else {
            let message = format!("number {} is outside every batch range", number);
            warn!("Sample {}: {}", row.sample_id, message);
            outcome.diagnostics.push(
                Diagnostic::new(DiagnosticKind::UnassignedSample, message)
                    .for_sample(&row.sample_id),
            );
            continue;
        };

        let range = &ranges[index];
        let local_index = (number - range.start + 1) as usize;
        debug!(
            "Sample {} -> {} (local index {})",
            row.sample_id, range.id, local_index
        );
        outcome.batches[index].rows.push(BatchRow {
            sample: row.clone(),
            prefix,
            number,
            local_index,
        });
    }

    for batch in &outcome.batches {
        info!(
            "Batch {} [{}, {}]: {} samples",
            batch.batch_id,
            batch.range_start,
            batch.range_end,
            batch.rows.len()
        );
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconcileConfig;
    use crate::error::ReconcileError;

    fn sample(id: &str) -> SampleRow {
        SampleRow {
            sample_id: id.to_string(),
            source_row: 0,
            cells: Vec::new(),
        }
    }

    #[test]
    fn test_split_sample_id() {
        let prefixes = SamplePrefixes::expand(&["P"]);
        assert_eq!(
            split_sample_id("F12", &prefixes),
            SampleNumber::Parsed {
                prefix: "F".to_string(),
                number: 12
            }
        );
        assert_eq!(
            split_sample_id("P 7 ", &prefixes),
            SampleNumber::Parsed {
                prefix: "P".to_string(),
                number: 7
            }
        );
        assert_eq!(split_sample_id("Pxx", &prefixes), SampleNumber::Unparseable);
        assert_eq!(split_sample_id("S1", &prefixes), SampleNumber::NoPrefix);
    }

    #[test]
    fn test_later_prefix_wins_when_first_does_not_parse() {
        let prefixes = SamplePrefixes::expand(&["P", "PX"]);
        assert_eq!(
            split_sample_id("PX3", &prefixes),
            SampleNumber::Parsed {
                prefix: "PX".to_string(),
                number: 3
            }
        );
    }

    #[test]
    fn test_f_prefix_lands_in_p_range() {
        let config = ReconcileConfig::default();
        let outcome = group(
            &[sample("F12")],
            &config.batch_ranges(),
            &config.sample_prefixes(),
        )
        .unwrap();

        let row = &outcome.batches[0].rows[0];
        assert_eq!(row.local_index, 12);
        assert_eq!(row.prefix, "F");
        assert!(outcome.batches[1].rows.is_empty());
    }

    #[test]
    fn test_partition_is_disjoint_cover() {
        let config = ReconcileConfig::default();
        let rows: Vec<_> = (1..=50).map(|n| sample(&format!("P{n}"))).collect();
        let outcome = group(&rows, &config.batch_ranges(), &config.sample_prefixes()).unwrap();

        let first: Vec<_> = outcome.batches[0].rows.iter().map(|r| r.number).collect();
        let second: Vec<_> = outcome.batches[1].rows.iter().map(|r| r.number).collect();
        assert_eq!(first, (1..=22).collect::<Vec<_>>());
        assert_eq!(second, (23..=44).collect::<Vec<_>>());
        assert_eq!(outcome.batches[1].rows[0].local_index, 1);

        let unassigned = outcome
            .diagnostics
            .iter()
            .filter(|d| d.kind == DiagnosticKind::UnassignedSample)
            .count();
        assert_eq!(unassigned, 6);
    }

    #[test]
    fn test_unparseable_number_dropped_with_diagnostic() {
        let config = ReconcileConfig::default();
        let outcome = group(
            &[sample("P1"), sample("Pabc")],
            &config.batch_ranges(),
            &config.sample_prefixes(),
        )
        .unwrap();

        assert_eq!(outcome.batches[0].rows.len(), 1);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].sample_id.as_deref(), Some("Pabc"));
    }

    #[test]
    fn test_overlapping_ranges_rejected() {
        let mut config = ReconcileConfig::default();
        config.batches[1].start = 22;
        let err = group(&[], &config.batch_ranges(), &config.sample_prefixes()).unwrap_err();
        assert!(matches!(err, ReconcileError::Configuration { .. }));
    }
}
