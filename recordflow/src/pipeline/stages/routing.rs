//! Rule-based routing into named destination buckets.

use serde_json::Value;

use super::{StageOutcome, StageServices};
use crate::pipeline::config::RoutingRule;
use crate::pipeline::lineage::{LineageEventKind, LineageTracker};
use crate::pipeline::result::ProcessingWarning;
use crate::pipeline::Record;

/// Field written onto each routed record with its destination.
pub(crate) const DESTINATION_FIELD: &str = "destination";

/// Partitions records into destination buckets; first matching route wins.
/// Records matching no route go to the default destination, or are dropped
/// with a warning when none is configured. The stage output is the
/// concatenation of all buckets, each record tagged with its destination.
pub(crate) fn run_routing(
    stage_id: &str,
    input: Vec<Record>,
    routes: &[RoutingRule],
    default_destination: Option<&str>,
    services: &StageServices,
    lineage: &mut LineageTracker,
) -> StageOutcome {
    let mut outcome = StageOutcome::default();
    let engine = services.engine();

    for mut record in input {
        let matched = routes.iter().find(|route| {
            let result = engine.execute_expression(&route.expression, &record);
            result.success && crate::expr::is_truthy(&result.output_or_null())
        });

        let destination = matched
            .map(|r| r.destination.as_str())
            .or(default_destination);

        match destination {
            Some(dest) => {
                record.insert(
                    DESTINATION_FIELD.to_string(),
                    Value::String(dest.to_string()),
                );
                lineage.record_event(&record, stage_id, LineageEventKind::Route, dest);
                outcome
                    .destinations
                    .entry(dest.to_string())
                    .or_default()
                    .push(record.clone());
                outcome.output.push(record);
            }
            None => {
                let mut warning =
                    ProcessingWarning::new(stage_id, "record matched no route".to_string());
                if let Some(index) = LineageTracker::index_of(&record) {
                    warning = warning.for_record(index);
                }
                outcome.warnings.push(warning);
            }
        }
    }

    outcome
}
