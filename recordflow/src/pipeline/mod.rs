//! Pipeline configuration and the stage executor.
//!
//! A [`Pipeline`] is immutable configuration: typed stages with a dependency
//! graph, validation rules, an error-handling strategy and a performance
//! target. The [`PipelineExecutor`] runs one batch of records through the
//! stages in dependency order and returns a [`ProcessingResult`].

mod config;
mod context;
mod dag;
mod executor;
mod lineage;
mod quality;
mod registry;
mod result;
mod retry;
pub mod stages;

#[cfg(test)]
mod integration_tests;

pub use config::{
    ConditionLogic, ConditionOperator, ErrorHandlingStrategy, FieldType, OnError,
    PerformanceTarget, Pipeline, ProcessingCondition, QualityDimension, QualityRule,
    RoutingRule, StageConfig, StageParams, StageType, TransformationSpec, TransformationStep,
    ValidationRule,
};
pub use context::{
    DataProcessingContext, ExecutionContext, StageExecutionResult, StageStatus,
};
pub use dag::{execution_order, parallel_batches};
pub use executor::{DeadLetterSink, PipelineExecutor};
pub use lineage::{DataLineage, LineageEvent, LineageEventKind, LineageTracker};
pub use quality::DataQualityMetrics;
pub use registry::{InMemoryPipelineStore, PipelineRegistry, PipelineStore};
pub use result::{ProcessingCounts, ProcessingError, ProcessingResult, ProcessingWarning};
pub use retry::{with_retry, BackoffStrategy, JitterStrategy, RetryStrategy};

/// A semi-structured business record.
pub type Record = serde_json::Map<String, serde_json::Value>;
