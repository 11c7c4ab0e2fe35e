//! Error types for the recordflow engine.
//!
//! Configuration problems (invalid pipelines, dependency cycles) surface as
//! typed errors; runtime evaluation failures are returned as structured
//! result values by the evaluator and rule engine instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for recordflow operations.
#[derive(Debug, Error)]
pub enum RecordflowError {
    /// A pipeline configuration failed validation.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A cycle was detected in a pipeline's stage dependency graph.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// A stage execution error that aborted the pipeline.
    #[error("Stage execution error: {0}")]
    StageExecution(String),

    /// A stage exceeded its configured timeout.
    #[error("Stage '{stage}' timed out after {timeout_ms}ms")]
    StageTimeout {
        /// The stage that timed out.
        stage: String,
        /// The configured timeout in milliseconds.
        timeout_ms: u64,
    },

    /// A persistence collaborator failed.
    #[error("Store error: {0}")]
    Store(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error raised when a pipeline configuration is invalid.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("Pipeline validation failed: {message}")]
pub struct PipelineValidationError {
    /// Description of the validation failure.
    pub message: String,
    /// The stages involved, if known.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<String>,
}

impl PipelineValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Attaches the offending stage ids.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }
}

/// Error raised when the stage dependency graph contains a cycle.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("Dependency cycle detected involving stages: {}", cycle.join(" -> "))]
pub struct CycleDetectedError {
    /// The stages participating in the cycle, in traversal order.
    pub cycle: Vec<String>,
}

impl CycleDetectedError {
    /// Creates a new cycle error from the offending path.
    #[must_use]
    pub fn new(cycle: Vec<String>) -> Self {
        Self { cycle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = PipelineValidationError::new("missing field mappings")
            .with_stages(vec!["ingest".to_string()]);
        assert!(err.to_string().contains("missing field mappings"));
        assert_eq!(err.stages, vec!["ingest"]);
    }

    #[test]
    fn test_cycle_error_display() {
        let err = CycleDetectedError::new(vec!["a".into(), "b".into(), "a".into()]);
        assert!(err.to_string().contains("a -> b -> a"));
    }

    #[test]
    fn test_error_conversion() {
        let err: RecordflowError = PipelineValidationError::new("bad").into();
        assert!(matches!(err, RecordflowError::Validation(_)));
    }
}
