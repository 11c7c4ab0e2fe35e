//! Schema validation with optional auto-correction.

use super::StageOutcome;
use crate::pipeline::config::ValidationRule;
use crate::pipeline::lineage::{LineageEventKind, LineageTracker};
use crate::pipeline::result::ProcessingError;
use crate::pipeline::Record;

/// Checks required fields and declared types. With `auto_correct`, a
/// coercible type mismatch produces a corrected record; otherwise the
/// record is dropped with a record-level error.
pub(crate) fn run_schema_validation(
    stage_id: &str,
    input: Vec<Record>,
    rules: &[ValidationRule],
    auto_correct: bool,
    lineage: &mut LineageTracker,
) -> StageOutcome {
    let mut outcome = StageOutcome::default();

    'records: for mut record in input {
        let index = LineageTracker::index_of(&record);
        for rule in rules {
            let value = record.get(&rule.field).cloned();

            if rule.required && value.as_ref().is_none_or(serde_json::Value::is_null) {
                outcome.errors.push(record_error(
                    stage_id,
                    index,
                    format!("required field '{}' missing", rule.field),
                ));
                continue 'records;
            }

            let (Some(expected), Some(value)) = (rule.expected_type, value) else {
                continue;
            };
            if value.is_null() || expected.matches(&value) {
                continue;
            }

            if auto_correct {
                if let Some(corrected) = expected.coerce(&value) {
                    record.insert(rule.field.clone(), corrected);
                    lineage.record_event(
                        &record,
                        stage_id,
                        LineageEventKind::Correct,
                        format!("coerced '{}'", rule.field),
                    );
                    continue;
                }
            }
            outcome.errors.push(record_error(
                stage_id,
                index,
                format!("field '{}' has wrong type", rule.field),
            ));
            continue 'records;
        }
        outcome.output.push(record);
    }

    outcome
}

fn record_error(stage_id: &str, index: Option<usize>, message: String) -> ProcessingError {
    index.map_or_else(
        || ProcessingError {
            stage_id: stage_id.to_string(),
            record_index: None,
            message: message.clone(),
            fatal: false,
        },
        |i| ProcessingError::for_record(stage_id, i, message.clone()),
    )
}
