//! Batch processing results.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::lineage::DataLineage;
use super::quality::DataQualityMetrics;
use super::Record;

/// A non-fatal problem observed while processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingWarning {
    /// The stage that emitted the warning.
    pub stage_id: String,
    /// Index of the affected record in the original batch, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_index: Option<usize>,
    /// What happened.
    pub message: String,
}

impl ProcessingWarning {
    /// Creates a batch-level warning.
    #[must_use]
    pub fn new(stage_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage_id: stage_id.into(),
            record_index: None,
            message: message.into(),
        }
    }

    /// Attaches the affected record index.
    #[must_use]
    pub fn for_record(mut self, index: usize) -> Self {
        self.record_index = Some(index);
        self
    }
}

/// A record- or stage-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingError {
    /// The stage that failed.
    pub stage_id: String,
    /// Index of the affected record in the original batch, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_index: Option<usize>,
    /// What happened.
    pub message: String,
    /// Whether the failure aborted the stage (as opposed to dropping one
    /// record).
    #[serde(default)]
    pub fatal: bool,
}

impl ProcessingError {
    /// Creates a stage-level fatal error.
    #[must_use]
    pub fn fatal(stage_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage_id: stage_id.into(),
            record_index: None,
            message: message.into(),
            fatal: true,
        }
    }

    /// Creates a record-level error.
    #[must_use]
    pub fn for_record(
        stage_id: impl Into<String>,
        index: usize,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage_id: stage_id.into(),
            record_index: Some(index),
            message: message.into(),
            fatal: false,
        }
    }
}

/// Record counters for one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingCounts {
    /// Records in the input batch.
    pub processed: usize,
    /// Records that made it through every executed stage.
    pub succeeded: usize,
    /// Records dropped by a validation or transformation failure.
    pub failed: usize,
    /// Stages skipped by conditions.
    pub skipped_stages: usize,
    /// Records that received enrichment fields.
    pub enriched: usize,
    /// Records that had at least one transformation applied.
    pub transformed: usize,
}

/// The outcome of running one batch through a pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResult {
    /// The pipeline that ran.
    pub pipeline_id: String,
    /// Unique id of this execution.
    pub execution_id: String,
    /// Correlation id propagated from the caller, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// True when no stage produced a fatal failure, whether or not the
    /// error policy aborted the run.
    pub success: bool,
    /// The surviving output records.
    pub records: Vec<Record>,
    /// Routed destination → records, populated by routing stages.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub destinations: HashMap<String, Vec<Record>>,
    /// Record counters.
    pub counts: ProcessingCounts,
    /// Non-fatal warnings from all stages.
    pub warnings: Vec<ProcessingWarning>,
    /// Errors from all stages.
    pub errors: Vec<ProcessingError>,
    /// Quality metrics computed after the last stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<DataQualityMetrics>,
    /// Per-input-record lineage, ordered by original batch index.
    pub lineage: Vec<DataLineage>,
    /// Total wall-clock duration.
    pub duration_ms: u64,
    /// Records per second over the whole run.
    pub records_per_second: f64,
}

impl ProcessingResult {
    /// Returns true when at least one record failed but the run completed.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.success && self.counts.failed > 0
    }

    /// Returns the records routed to `destination`.
    #[must_use]
    pub fn routed_to(&self, destination: &str) -> &[Record] {
        self.destinations
            .get(destination)
            .map_or(&[], Vec::as_slice)
    }
}
