//! Per-record lineage tracking.
//!
//! Records are tagged with a hidden index field on entry so their history
//! survives transformation; the tag is stripped before results are returned.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::Record;
use crate::utils::{now, Timestamp};

/// Hidden field carrying a record's original batch index through the stages.
pub(crate) const LINEAGE_INDEX_FIELD: &str = "_rf_index";

/// What happened to a record at a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineageEventKind {
    /// A transformation wrote one or more fields.
    Transform,
    /// An enrichment source merged supplementary fields.
    Enrich,
    /// The record was routed to a destination bucket.
    Route,
    /// Schema validation corrected a field in place.
    Correct,
}

/// One timestamped lineage event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageEvent {
    /// The stage that produced the event.
    pub stage_id: String,
    /// The kind of event.
    pub kind: LineageEventKind,
    /// Affected fields, destination name, or similar detail.
    pub detail: String,
    /// When it happened.
    pub at: Timestamp,
}

/// The full history of one input record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataLineage {
    /// Index of the record in the original input batch.
    pub record_index: usize,
    /// Events in occurrence order.
    pub events: Vec<LineageEvent>,
}

/// Accumulates lineage for a batch during execution.
#[derive(Debug, Default)]
pub struct LineageTracker {
    by_index: HashMap<usize, DataLineage>,
}

impl LineageTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags each record with its batch index. Called once on the input batch.
    pub fn tag_records(&mut self, records: &mut [Record]) {
        for (index, record) in records.iter_mut().enumerate() {
            record.insert(LINEAGE_INDEX_FIELD.to_string(), Value::from(index));
            self.by_index.entry(index).or_insert_with(|| DataLineage {
                record_index: index,
                events: Vec::new(),
            });
        }
    }

    /// Returns the batch index a record was tagged with.
    #[must_use]
    pub fn index_of(record: &Record) -> Option<usize> {
        record
            .get(LINEAGE_INDEX_FIELD)
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
    }

    /// Records an event against a tagged record.
    pub fn record_event(
        &mut self,
        record: &Record,
        stage_id: &str,
        kind: LineageEventKind,
        detail: impl Into<String>,
    ) {
        let Some(index) = Self::index_of(record) else {
            return;
        };
        self.by_index
            .entry(index)
            .or_insert_with(|| DataLineage {
                record_index: index,
                events: Vec::new(),
            })
            .events
            .push(LineageEvent {
                stage_id: stage_id.to_string(),
                kind,
                detail: detail.into(),
                at: now(),
            });
    }

    /// Folds another tracker's events into this one. Used when parallel
    /// stages accumulate lineage on private trackers.
    pub fn merge(&mut self, other: Self) {
        for (index, lineage) in other.by_index {
            self.by_index
                .entry(index)
                .or_insert_with(|| DataLineage {
                    record_index: index,
                    events: Vec::new(),
                })
                .events
                .extend(lineage.events);
        }
    }

    /// Strips the index tags and returns lineage sorted by record index.
    pub fn finish(mut self, records: &mut [Record]) -> Vec<DataLineage> {
        for record in records.iter_mut() {
            record.remove(LINEAGE_INDEX_FIELD);
        }
        let mut lineages: Vec<DataLineage> = self.by_index.drain().map(|(_, v)| v).collect();
        lineages.sort_by_key(|l| l.record_index);
        lineages
    }

    /// Strips the index tag from a single record (for routed buckets).
    pub fn strip_tag(record: &mut Record) {
        record.remove(LINEAGE_INDEX_FIELD);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn test_tag_record_event_and_finish() {
        let mut tracker = LineageTracker::new();
        let mut records = vec![record(json!({"sku": "a"})), record(json!({"sku": "b"}))];
        tracker.tag_records(&mut records);
        assert_eq!(LineageTracker::index_of(&records[1]), Some(1));

        tracker.record_event(&records[1], "xf", LineageEventKind::Transform, "price");
        tracker.record_event(&records[1], "route", LineageEventKind::Route, "eu");

        let lineages = tracker.finish(&mut records);
        assert_eq!(lineages.len(), 2);
        assert!(lineages[0].events.is_empty());
        assert_eq!(lineages[1].events.len(), 2);
        assert_eq!(lineages[1].events[0].kind, LineageEventKind::Transform);
        assert_eq!(lineages[1].events[1].detail, "eu");

        // Tags are stripped from the surviving records.
        assert!(!records[0].contains_key(LINEAGE_INDEX_FIELD));
    }

    #[test]
    fn test_untagged_record_is_ignored() {
        let mut tracker = LineageTracker::new();
        let untagged = record(json!({"sku": "x"}));
        tracker.record_event(&untagged, "s", LineageEventKind::Enrich, "n/a");
        let lineages = tracker.finish(&mut []);
        assert!(lineages.is_empty());
    }
}
