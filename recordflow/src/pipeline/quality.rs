//! Batch-level data quality metrics.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::config::ValidationRule;
use super::Record;

/// Threshold below which completeness is flagged as a quality issue.
const COMPLETENESS_ISSUE_THRESHOLD: f64 = 0.8;

/// Aggregated quality dimensions for one processed batch, each in `0.0..=1.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualityMetrics {
    /// Fraction of expected fields that are populated.
    pub completeness: f64,
    /// Fraction of typed fields matching their declared type.
    pub accuracy: f64,
    /// Fraction of records sharing the batch's dominant field shape.
    pub consistency: f64,
    /// Always 1.0 for freshly processed batches; lowered by callers that
    /// re-score stored data.
    pub timeliness: f64,
    /// Fraction of records with no validation errors.
    pub validity: f64,
    /// Plain average of the five dimensions.
    pub overall: f64,
    /// Human-readable issues detected while scoring.
    pub issues: Vec<String>,
}

impl DataQualityMetrics {
    /// Scores a batch against the pipeline's validation rules.
    ///
    /// `failed_records` is the number of records dropped by validation or
    /// transformation failures out of `total_records`.
    #[must_use]
    pub fn compute(
        records: &[Record],
        rules: &[ValidationRule],
        total_records: usize,
        failed_records: usize,
    ) -> Self {
        let completeness = score_completeness(records, rules);
        let accuracy = score_accuracy(records, rules);
        let consistency = score_consistency(records);
        let timeliness = 1.0;
        let validity = if total_records == 0 {
            1.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let ok = (total_records - failed_records.min(total_records)) as f64;
            #[allow(clippy::cast_precision_loss)]
            let total = total_records as f64;
            ok / total
        };

        let overall = (completeness + accuracy + consistency + timeliness + validity) / 5.0;

        let mut issues = Vec::new();
        if completeness < COMPLETENESS_ISSUE_THRESHOLD {
            issues.push(format!(
                "completeness {completeness:.2} below threshold {COMPLETENESS_ISSUE_THRESHOLD}"
            ));
        }
        if failed_records > 0 {
            issues.push(format!("{failed_records} record(s) failed processing"));
        }

        Self {
            completeness,
            accuracy,
            consistency,
            timeliness,
            validity,
            overall,
            issues,
        }
    }
}

fn is_populated(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

fn score_completeness(records: &[Record], rules: &[ValidationRule]) -> f64 {
    if records.is_empty() || rules.is_empty() {
        return 1.0;
    }
    let mut populated = 0usize;
    let mut expected = 0usize;
    for record in records {
        for rule in rules {
            expected += 1;
            if is_populated(record.get(&rule.field)) {
                populated += 1;
            }
        }
    }
    #[allow(clippy::cast_precision_loss)]
    let score = populated as f64 / expected as f64;
    score
}

fn score_accuracy(records: &[Record], rules: &[ValidationRule]) -> f64 {
    let typed: Vec<&ValidationRule> = rules.iter().filter(|r| r.expected_type.is_some()).collect();
    if records.is_empty() || typed.is_empty() {
        return 1.0;
    }
    let mut matching = 0usize;
    let mut checked = 0usize;
    for record in records {
        for rule in &typed {
            let Some(value) = record.get(&rule.field) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            checked += 1;
            let Some(expected) = rule.expected_type else {
                continue;
            };
            if expected.matches(value) {
                matching += 1;
            }
        }
    }
    if checked == 0 {
        return 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let score = matching as f64 / checked as f64;
    score
}

/// Consistency is the fraction of records sharing the most common field set.
fn score_consistency(records: &[Record]) -> f64 {
    if records.len() < 2 {
        return 1.0;
    }
    let mut shapes: std::collections::HashMap<Vec<&str>, usize> = std::collections::HashMap::new();
    for record in records {
        let mut keys: Vec<&str> = record.keys().map(String::as_str).collect();
        keys.sort_unstable();
        *shapes.entry(keys).or_insert(0) += 1;
    }
    let dominant = shapes.values().copied().max().unwrap_or(0);
    #[allow(clippy::cast_precision_loss)]
    let score = dominant as f64 / records.len() as f64;
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::FieldType;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn test_full_marks_for_complete_batch() {
        let records = vec![
            record(json!({"sku": "a", "price": 1.0})),
            record(json!({"sku": "b", "price": 2.0})),
        ];
        let rules = vec![
            ValidationRule::required("sku"),
            ValidationRule::typed("price", FieldType::Number),
        ];
        let metrics = DataQualityMetrics::compute(&records, &rules, 2, 0);
        assert_eq!(metrics.completeness, 1.0);
        assert_eq!(metrics.accuracy, 1.0);
        assert_eq!(metrics.overall, 1.0);
        assert!(metrics.issues.is_empty());
    }

    #[test]
    fn test_low_completeness_is_flagged() {
        let records = vec![
            record(json!({"sku": "a"})),
            record(json!({"other": 1})),
        ];
        let rules = vec![
            ValidationRule::required("sku"),
            ValidationRule::required("price"),
        ];
        let metrics = DataQualityMetrics::compute(&records, &rules, 2, 0);
        assert!(metrics.completeness < 0.8);
        assert!(metrics
            .issues
            .iter()
            .any(|i| i.contains("completeness")));
    }

    #[test]
    fn test_validity_reflects_failures() {
        let records = vec![record(json!({"sku": "a"}))];
        let metrics = DataQualityMetrics::compute(&records, &[], 4, 3);
        assert_eq!(metrics.validity, 0.25);
        assert!(metrics.issues.iter().any(|i| i.contains("failed")));
    }

    #[test]
    fn test_type_mismatch_lowers_accuracy() {
        let records = vec![
            record(json!({"price": "not a number"})),
            record(json!({"price": 3.0})),
        ];
        let rules = vec![ValidationRule::typed("price", FieldType::Number)];
        let metrics = DataQualityMetrics::compute(&records, &rules, 2, 0);
        assert_eq!(metrics.accuracy, 0.5);
    }

    #[test]
    fn test_inconsistent_shapes_lower_consistency() {
        let records = vec![
            record(json!({"a": 1})),
            record(json!({"a": 1})),
            record(json!({"b": 2})),
            record(json!({"a": 1})),
        ];
        let metrics = DataQualityMetrics::compute(&records, &[], 4, 0);
        assert_eq!(metrics.consistency, 0.75);
    }

    #[test]
    fn test_empty_batch_scores_clean() {
        let metrics = DataQualityMetrics::compute(&[], &[], 0, 0);
        assert_eq!(metrics.overall, 1.0);
    }
}
