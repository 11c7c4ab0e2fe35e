//! Ingestion: field-name normalization and presence warnings.

use std::collections::HashMap;

use super::StageOutcome;
use crate::pipeline::lineage::{LineageEventKind, LineageTracker};
use crate::pipeline::result::ProcessingWarning;
use crate::pipeline::Record;

/// Renames fields per the mapping table and warns (non-fatally) about
/// missing required fields. Unmapped fields pass through untouched.
pub(crate) fn run_ingestion(
    stage_id: &str,
    input: Vec<Record>,
    field_mappings: &HashMap<String, String>,
    required_fields: &[String],
    lineage: &mut LineageTracker,
) -> StageOutcome {
    let mut outcome = StageOutcome::default();

    for record in input {
        let mut mapped = Record::new();
        let mut renamed: Vec<&str> = Vec::new();
        for (key, value) in record {
            match field_mappings.get(&key) {
                Some(target) => {
                    mapped.insert(target.clone(), value);
                    renamed.push(target.as_str());
                }
                None => {
                    mapped.insert(key, value);
                }
            }
        }

        for field in required_fields {
            let missing = mapped.get(field).is_none_or(serde_json::Value::is_null);
            if missing {
                let mut warning = ProcessingWarning::new(
                    stage_id,
                    format!("required field '{field}' missing"),
                );
                if let Some(index) = LineageTracker::index_of(&mapped) {
                    warning = warning.for_record(index);
                }
                outcome.warnings.push(warning);
            }
        }

        if !renamed.is_empty() {
            lineage.record_event(
                &mapped,
                stage_id,
                LineageEventKind::Transform,
                format!("normalized fields: {}", renamed.join(", ")),
            );
        }
        outcome.output.push(mapped);
    }

    outcome
}
