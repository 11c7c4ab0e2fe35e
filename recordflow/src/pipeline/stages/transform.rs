//! Per-record transformation via the rule engine.

use super::{StageOutcome, StageServices};
use crate::pipeline::config::{TransformationSpec, TransformationStep};
use crate::pipeline::lineage::{LineageEventKind, LineageTracker};
use crate::pipeline::result::ProcessingError;
use crate::pipeline::Record;

/// Applies the ordered steps to each record, writing each result to its
/// `target_field`. A failing step fails only that record, not the batch.
pub(crate) fn run_transformation(
    stage_id: &str,
    input: Vec<Record>,
    steps: &[TransformationStep],
    services: &StageServices,
    lineage: &mut LineageTracker,
) -> StageOutcome {
    let mut outcome = StageOutcome::default();
    let engine = services.engine();

    'records: for mut record in input {
        let index = LineageTracker::index_of(&record);
        let mut applied: Vec<&str> = Vec::new();

        for step in steps {
            let result = match &step.spec {
                TransformationSpec::Rule { rule_id } => engine.execute_rule(rule_id, &record),
                TransformationSpec::Expression { expression } => {
                    engine.execute_expression(expression, &record)
                }
            };

            if result.success {
                record.insert(step.target_field.clone(), result.output_or_null());
                applied.push(step.target_field.as_str());
            } else {
                let message = format!(
                    "transformation for '{}' failed: {}",
                    step.target_field,
                    result.error.unwrap_or_else(|| "unknown error".to_string())
                );
                outcome.errors.push(match index {
                    Some(i) => ProcessingError::for_record(stage_id, i, message),
                    None => ProcessingError {
                        stage_id: stage_id.to_string(),
                        record_index: None,
                        message,
                        fatal: false,
                    },
                });
                continue 'records;
            }
        }

        if !applied.is_empty() {
            outcome.transformed += 1;
            lineage.record_event(
                &record,
                stage_id,
                LineageEventKind::Transform,
                applied.join(", "),
            );
        }
        outcome.output.push(record);
    }

    outcome
}
