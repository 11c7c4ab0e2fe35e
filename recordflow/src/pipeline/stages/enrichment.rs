//! Best-effort enrichment from a named source.

use super::{StageOutcome, StageServices};
use crate::pipeline::lineage::{LineageEventKind, LineageTracker};
use crate::pipeline::result::ProcessingWarning;
use crate::pipeline::Record;

/// Fetches supplementary fields per record and merges them in. Source
/// failures degrade to warnings; existing fields are never overwritten.
pub(crate) async fn run_enrichment(
    stage_id: &str,
    input: Vec<Record>,
    source_id: &str,
    fields: &[String],
    services: &StageServices,
    lineage: &mut LineageTracker,
) -> StageOutcome {
    let Some(source) = services.enrichment_source(source_id) else {
        let mut outcome = StageOutcome::passthrough(input);
        outcome.warnings.push(ProcessingWarning::new(
            stage_id,
            format!("enrichment source '{source_id}' not registered"),
        ));
        return outcome;
    };

    let mut outcome = StageOutcome::default();
    for mut record in input {
        match source.fetch(&record).await {
            Ok(extra) => {
                let mut merged: Vec<String> = Vec::new();
                for (key, value) in extra {
                    let wanted = fields.is_empty() || fields.iter().any(|f| f == &key);
                    if wanted && !record.contains_key(&key) {
                        record.insert(key.clone(), value);
                        merged.push(key);
                    }
                }
                if !merged.is_empty() {
                    outcome.enriched += 1;
                    lineage.record_event(
                        &record,
                        stage_id,
                        LineageEventKind::Enrich,
                        format!("{source_id}: {}", merged.join(", ")),
                    );
                }
            }
            Err(e) => {
                let mut warning = ProcessingWarning::new(
                    stage_id,
                    format!("enrichment from '{source_id}' failed: {e}"),
                );
                if let Some(index) = LineageTracker::index_of(&record) {
                    warning = warning.for_record(index);
                }
                outcome.warnings.push(warning);
            }
        }
        outcome.output.push(record);
    }

    outcome
}
