//! Weighted per-record quality scoring.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{StageOutcome, StageServices};
use crate::pipeline::config::{QualityDimension, QualityRule};
use crate::pipeline::result::ProcessingWarning;
use crate::pipeline::Record;

/// Field written onto each record with its computed score.
pub(crate) const QUALITY_SCORE_FIELD: &str = "quality_score";

/// Band boundaries for the aggregate distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityBand {
    /// Score >= 0.9.
    Excellent,
    /// Score >= 0.7.
    Good,
    /// Score >= 0.5.
    Fair,
    /// Score < 0.5.
    Poor,
}

impl QualityBand {
    /// Classifies a 0-1 score.
    #[must_use]
    pub fn for_score(score: f64) -> Self {
        if score >= 0.9 {
            Self::Excellent
        } else if score >= 0.7 {
            Self::Good
        } else if score >= 0.5 {
            Self::Fair
        } else {
            Self::Poor
        }
    }
}

/// Counts of records per band for one scored batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityDistribution {
    /// Records scoring >= 0.9.
    pub excellent: usize,
    /// Records scoring >= 0.7.
    pub good: usize,
    /// Records scoring >= 0.5.
    pub fair: usize,
    /// Records scoring < 0.5.
    pub poor: usize,
}

impl QualityDistribution {
    fn tally(&mut self, band: QualityBand) {
        match band {
            QualityBand::Excellent => self.excellent += 1,
            QualityBand::Good => self.good += 1,
            QualityBand::Fair => self.fair += 1,
            QualityBand::Poor => self.poor += 1,
        }
    }
}

/// Scores each record 0-1 from the weighted rules, writes the score onto the
/// record and surfaces the batch distribution as stage metadata.
pub(crate) fn run_quality_scoring(
    stage_id: &str,
    input: Vec<Record>,
    rules: &[QualityRule],
    services: &StageServices,
) -> StageOutcome {
    let mut outcome = StageOutcome::default();
    let total_weight: f64 = rules.iter().map(|r| r.weight.max(0.0)).sum();
    let mut distribution = QualityDistribution::default();
    let mut score_sum = 0.0;

    for mut record in input {
        let score = if total_weight > 0.0 {
            let weighted: f64 = rules
                .iter()
                .map(|rule| rule.weight.max(0.0) * score_rule(rule, &record, services, stage_id, &mut outcome.warnings))
                .sum();
            (weighted / total_weight).clamp(0.0, 1.0)
        } else {
            1.0
        };

        distribution.tally(QualityBand::for_score(score));
        score_sum += score;
        record.insert(
            QUALITY_SCORE_FIELD.to_string(),
            serde_json::Number::from_f64((score * 1000.0).round() / 1000.0)
                .map_or(Value::Null, Value::Number),
        );
        outcome.output.push(record);
    }

    #[allow(clippy::cast_precision_loss)]
    let average = if outcome.output.is_empty() {
        1.0
    } else {
        score_sum / outcome.output.len() as f64
    };

    if let Ok(dist) = serde_json::to_value(distribution) {
        outcome.metadata.insert("distribution".to_string(), dist);
    }
    if let Some(avg) = serde_json::Number::from_f64(average) {
        outcome
            .metadata
            .insert("average_score".to_string(), Value::Number(avg));
    }

    outcome
}

fn score_rule(
    rule: &QualityRule,
    record: &Record,
    services: &StageServices,
    stage_id: &str,
    warnings: &mut Vec<ProcessingWarning>,
) -> f64 {
    match rule.dimension {
        QualityDimension::Completeness => {
            if rule.fields.is_empty() {
                return 1.0;
            }
            let populated = rule
                .fields
                .iter()
                .filter(|f| record.get(f.as_str()).is_some_and(|v| !v.is_null()))
                .count();
            #[allow(clippy::cast_precision_loss)]
            let score = populated as f64 / rule.fields.len() as f64;
            score
        }
        QualityDimension::Validity | QualityDimension::Consistency => {
            let Some(expression) = &rule.expression else {
                return 1.0;
            };
            let result = services.engine().execute_expression(expression, record);
            if result.success {
                if crate::expr::is_truthy(&result.output_or_null()) {
                    1.0
                } else {
                    0.0
                }
            } else {
                warnings.push(ProcessingWarning::new(
                    stage_id,
                    format!(
                        "quality expression failed: {}",
                        result.error.unwrap_or_else(|| "unknown error".to_string())
                    ),
                ));
                0.0
            }
        }
    }
}
