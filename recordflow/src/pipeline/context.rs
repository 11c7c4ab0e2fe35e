//! Execution-scoped state threaded through the stages.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::lineage::LineageTracker;
use super::result::{ProcessingError, ProcessingWarning};
use super::Record;
use crate::utils::{generate_correlation_id, generate_execution_id};

/// Caller-supplied identity of a processing request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataProcessingContext {
    /// The tenant the records belong to.
    pub tenant_id: String,
    /// The pipeline being invoked.
    pub pipeline_id: String,
    /// Where the records came from (platform or connector name).
    pub source: String,
    /// Correlation id for tracing across systems; generated when absent.
    pub correlation_id: String,
}

impl DataProcessingContext {
    /// Creates a context with a generated correlation id.
    #[must_use]
    pub fn new(
        tenant_id: impl Into<String>,
        pipeline_id: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            pipeline_id: pipeline_id.into(),
            source: source.into(),
            correlation_id: generate_correlation_id(),
        }
    }

    /// Sets an explicit correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

/// Terminal status of one stage execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// The stage ran and produced output.
    Completed,
    /// The stage failed fatally.
    Failed,
    /// Conditions did not hold; the stage passed its input through.
    Skipped,
}

/// Immutable record of one stage's execution.
#[derive(Debug, Clone, Serialize)]
pub struct StageExecutionResult {
    /// The stage that ran.
    pub stage_id: String,
    /// How it ended.
    pub status: StageStatus,
    /// The records it produced (its input, when skipped).
    pub output: Vec<Record>,
    /// Record- and stage-level errors.
    pub errors: Vec<ProcessingError>,
    /// Non-fatal warnings.
    pub warnings: Vec<ProcessingWarning>,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// Attempts used (greater than 1 under retry).
    pub attempts: usize,
    /// Stage-specific extras: routed buckets, quality scores, skip markers.
    pub metadata: HashMap<String, Value>,
}

impl StageExecutionResult {
    /// Creates a completed result.
    #[must_use]
    pub fn completed(stage_id: impl Into<String>, output: Vec<Record>) -> Self {
        Self {
            stage_id: stage_id.into(),
            status: StageStatus::Completed,
            output,
            errors: Vec::new(),
            warnings: Vec::new(),
            duration_ms: 0,
            attempts: 1,
            metadata: HashMap::new(),
        }
    }

    /// Creates a skipped result passing `input` through unchanged.
    #[must_use]
    pub fn skipped(stage_id: impl Into<String>, input: Vec<Record>) -> Self {
        let mut result = Self::completed(stage_id, input);
        result.status = StageStatus::Skipped;
        result
            .metadata
            .insert("skipped".to_string(), Value::Bool(true));
        result
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failed(stage_id: impl Into<String>, error: ProcessingError) -> Self {
        Self {
            stage_id: stage_id.into(),
            status: StageStatus::Failed,
            output: Vec::new(),
            errors: vec![error],
            warnings: Vec::new(),
            duration_ms: 0,
            attempts: 1,
            metadata: HashMap::new(),
        }
    }

    /// Returns true unless the stage failed.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status != StageStatus::Failed
    }
}

/// Mutable state for one pipeline invocation.
#[derive(Debug)]
pub struct ExecutionContext {
    /// Unique id of this execution.
    pub execution_id: String,
    /// The entity type being processed (product, order, customer...).
    pub entity_type: String,
    /// Caller identity.
    pub processing: DataProcessingContext,
    /// The original input batch, index-tagged for lineage.
    pub input: Vec<Record>,
    /// Results of stages that have run, by stage id.
    pub stage_results: HashMap<String, StageExecutionResult>,
    /// Lineage accumulator.
    pub lineage: LineageTracker,
}

impl ExecutionContext {
    /// Creates a context, tagging the input batch for lineage.
    #[must_use]
    pub fn new(
        entity_type: impl Into<String>,
        processing: DataProcessingContext,
        mut input: Vec<Record>,
    ) -> Self {
        let mut lineage = LineageTracker::new();
        lineage.tag_records(&mut input);
        Self {
            execution_id: generate_execution_id(),
            entity_type: entity_type.into(),
            processing,
            input,
            stage_results: HashMap::new(),
            lineage,
        }
    }

    /// Resolves the input records for a stage: the original batch when it has
    /// no dependencies, otherwise the output of its last listed dependency.
    #[must_use]
    pub fn input_for(&self, dependencies: &[String]) -> Vec<Record> {
        match dependencies.last() {
            None => self.input.clone(),
            Some(dep) => self
                .stage_results
                .get(dep)
                .map(|r| r.output.clone())
                .unwrap_or_default(),
        }
    }

    /// Stores a stage result.
    pub fn record_stage(&mut self, result: StageExecutionResult) {
        self.stage_results.insert(result.stage_id.clone(), result);
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
    fn test_input_wiring_uses_last_dependency() {
        let ctx_ids = DataProcessingContext::new("t1", "p1", "shopify");
        let mut ctx = ExecutionContext::new("product", ctx_ids, vec![record(json!({"a": 1}))]);

        ctx.record_stage(StageExecutionResult::completed(
            "first",
            vec![record(json!({"from": "first"}))],
        ));
        ctx.record_stage(StageExecutionResult::completed(
            "second",
            vec![record(json!({"from": "second"}))],
        ));

        let no_deps = ctx.input_for(&[]);
        assert_eq!(no_deps.len(), 1);
        assert!(no_deps[0].contains_key("a"));

        let wired = ctx.input_for(&["first".to_string(), "second".to_string()]);
        assert_eq!(wired[0].get("from"), Some(&json!("second")));
    }

    #[test]
    fn test_input_is_lineage_tagged() {
        let ctx_ids = DataProcessingContext::new("t1", "p1", "csv");
        let ctx = ExecutionContext::new("order", ctx_ids, vec![record(json!({"a": 1}))]);
        assert!(LineageTracker::index_of(&ctx.input[0]).is_some());
    }

    #[test]
    fn test_skipped_result_passes_input_through() {
        let input = vec![record(json!({"k": "v"}))];
        let result = StageExecutionResult::skipped("s", input.clone());
        assert_eq!(result.status, StageStatus::Skipped);
        assert_eq!(result.output, input);
        assert_eq!(result.metadata.get("skipped"), Some(&json!(true)));
        assert!(result.is_ok());
    }

    #[test]
    fn test_correlation_id_generated() {
        let ctx = DataProcessingContext::new("t", "p", "s");
        assert!(ctx.correlation_id.starts_with("corr_"));
    }
}
