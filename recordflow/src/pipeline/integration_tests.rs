//! End-to-end executor tests over whole pipelines.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::stages::{CustomLogic, StageServices};
use super::{
    ConditionOperator, DataProcessingContext, ErrorHandlingStrategy, OnError, Pipeline,
    PipelineExecutor, ProcessingCondition, Record, RetryStrategy, RoutingRule, StageConfig,
    StageParams, TransformationStep,
};
use crate::errors::RecordflowError;
use crate::recovery::{DeadLetterStatus, ErrorRecoverySystem, InMemoryDeadLetterStore};
use crate::testing::{product_record, standard_product_pipeline, test_context, MockCustomLogic};

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other:?}"),
    }
}

fn transform_stage(id: &str, field: &str, expr: &str) -> StageConfig {
    StageConfig::new(
        id,
        StageParams::DataTransformation {
            transformations: vec![TransformationStep::expression(field, expr)],
        },
    )
}

fn custom_stage(id: &str, handler: &str) -> StageConfig {
    StageConfig::new(
        id,
        StageParams::CustomLogic {
            handler: handler.to_string(),
        },
    )
}

#[tokio::test]
async fn test_full_pipeline_end_to_end() {
    let pipeline = standard_product_pipeline("p1");
    let executor = PipelineExecutor::default();
    let records = vec![product_record("SKU-1", 10.0), product_record("SKU-2", 25.0)];

    let result = executor
        .execute(&pipeline, records, "product", test_context("p1"))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.counts.processed, 2);
    assert_eq!(result.counts.succeeded, 2);
    assert_eq!(result.counts.transformed, 2);
    assert_eq!(result.records[0].get("price_with_tax"), Some(&json!(12)));
    assert_eq!(result.records[1].get("price_with_tax"), Some(&json!(30)));

    let quality = result.quality.unwrap();
    assert_eq!(quality.completeness, 1.0);

    assert_eq!(result.lineage.len(), 2);
    assert!(result.lineage[0]
        .events
        .iter()
        .any(|e| e.stage_id == "transform"));
    // Internal tags never leak.
    assert!(!result.records[0].contains_key("_rf_index"));
}

#[tokio::test]
async fn test_cycle_fails_before_any_stage_runs() {
    let pipeline = Pipeline::new("cyclic", "Cyclic")
        .with_stage(transform_stage("a", "x", "1").with_dependency("b"))
        .with_stage(transform_stage("b", "y", "2").with_dependency("a"));

    let executor = PipelineExecutor::default();
    let err = executor
        .execute(&pipeline, vec![record(json!({}))], "product", test_context("cyclic"))
        .await
        .unwrap_err();
    assert!(matches!(err, RecordflowError::CycleDetected(_)));
}

#[tokio::test]
async fn test_conditional_skip_passes_records_through() {
    let pipeline = Pipeline::new("p", "P")
        .with_stage(transform_stage("first", "a", "1"))
        .with_stage(
            transform_stage("gated", "b", "2")
                .with_dependency("first")
                .with_condition(ProcessingCondition::new(
                    "missing_field",
                    ConditionOperator::Exists,
                    json!(null),
                )),
        )
        .with_stage(transform_stage("last", "c", "3").with_dependency("gated"));

    let executor = PipelineExecutor::default();
    let result = executor
        .execute(&pipeline, vec![record(json!({}))], "product", test_context("p"))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.counts.skipped_stages, 1);
    // The gated stage never wrote "b", but downstream still ran.
    assert_eq!(result.records[0].get("a"), Some(&json!(1)));
    assert_eq!(result.records[0].get("b"), None);
    assert_eq!(result.records[0].get("c"), Some(&json!(3)));
}

#[tokio::test]
async fn test_parallel_group_stages_all_execute() {
    let pipeline = Pipeline::new("p", "P")
        .with_stage(transform_stage("load", "loaded", "true"))
        .with_stage(
            transform_stage("x", "from_x", "1")
                .with_dependency("load")
                .with_parallel_group("fanout"),
        )
        .with_stage(
            transform_stage("y", "from_y", "2")
                .with_dependency("load")
                .with_parallel_group("fanout"),
        )
        .with_stage(transform_stage("merge", "merged", "true").with_dependency("x").with_dependency("y"));

    let executor = PipelineExecutor::default();
    let result = executor
        .execute(&pipeline, vec![record(json!({}))], "product", test_context("p"))
        .await
        .unwrap();

    assert!(result.success);
    // Merge consumes its last listed dependency's output.
    assert_eq!(result.records[0].get("from_y"), Some(&json!(2)));
    assert_eq!(result.records[0].get("merged"), Some(&json!(true)));
}

#[tokio::test]
async fn test_on_error_fail_aborts_pipeline() {
    let executor = PipelineExecutor::default();
    executor.services().register_custom_handler(
        "boom",
        Arc::new(MockCustomLogic::new(|_records| {
            Err(RecordflowError::Internal("handler exploded".to_string()))
        })),
    );

    let pipeline = Pipeline::new("p", "P")
        .with_stage(custom_stage("explode", "boom"))
        .with_stage(transform_stage("after", "x", "1").with_dependency("explode"))
        .with_error_handling(ErrorHandlingStrategy::new(OnError::Fail));

    let result = executor
        .execute(&pipeline, vec![record(json!({}))], "product", test_context("p"))
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.errors.iter().any(|e| e.fatal));
    assert!(result
        .errors
        .iter()
        .any(|e| e.message.contains("handler exploded")));
    // The downstream stage never ran.
    assert_eq!(result.records.first().and_then(|r| r.get("x")), None);
}

#[tokio::test]
async fn test_on_error_skip_continues_with_input() {
    let executor = PipelineExecutor::default();
    executor.services().register_custom_handler(
        "boom",
        Arc::new(MockCustomLogic::new(|_records| {
            Err(RecordflowError::Internal("handler exploded".to_string()))
        })),
    );

    let pipeline = Pipeline::new("p", "P")
        .with_stage(transform_stage("first", "a", "1"))
        .with_stage(custom_stage("explode", "boom").with_dependency("first"))
        .with_stage(transform_stage("after", "b", "2").with_dependency("explode"))
        .with_error_handling(ErrorHandlingStrategy::new(OnError::Skip));

    let result = executor
        .execute(&pipeline, vec![record(json!({}))], "product", test_context("p"))
        .await
        .unwrap();

    // Downstream stages still ran on the failed stage's input, but the
    // failure keeps the run from reporting success.
    assert!(!result.success);
    assert!(result
        .errors
        .iter()
        .any(|e| e.fatal && e.stage_id == "explode"));
    assert_eq!(result.records[0].get("a"), Some(&json!(1)));
    assert_eq!(result.records[0].get("b"), Some(&json!(2)));
}

#[tokio::test]
async fn test_retry_policy_reruns_failed_stage() {
    struct FlakyHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CustomLogic for FlakyHandler {
        async fn process(
            &self,
            records: Vec<Record>,
            _ctx: &DataProcessingContext,
        ) -> Result<Vec<Record>, RecordflowError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RecordflowError::Internal("transient".to_string()))
            } else {
                Ok(records)
            }
        }
    }

    let handler = Arc::new(FlakyHandler {
        calls: AtomicUsize::new(0),
    });
    let executor = PipelineExecutor::default();
    executor
        .services()
        .register_custom_handler("flaky", handler.clone());

    let pipeline = Pipeline::new("p", "P")
        .with_stage(custom_stage("sync", "flaky").with_retry(
            RetryStrategy::new()
                .with_max_attempts(3)
                .with_base_delay_ms(1)
                .with_jitter(super::JitterStrategy::None),
        ))
        .with_error_handling(ErrorHandlingStrategy::new(OnError::Retry));

    let result = executor
        .execute(&pipeline, vec![record(json!({}))], "product", test_context("p"))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_stage_timeout_is_fatal() {
    struct SleepyHandler;

    #[async_trait]
    impl CustomLogic for SleepyHandler {
        async fn process(
            &self,
            records: Vec<Record>,
            _ctx: &DataProcessingContext,
        ) -> Result<Vec<Record>, RecordflowError> {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(records)
        }
    }

    let executor = PipelineExecutor::default();
    executor
        .services()
        .register_custom_handler("sleepy", Arc::new(SleepyHandler));

    let pipeline = Pipeline::new("p", "P")
        .with_stage(custom_stage("slow", "sleepy").with_timeout_ms(20))
        .with_error_handling(ErrorHandlingStrategy::new(OnError::Fail));

    let result = executor
        .execute(&pipeline, vec![record(json!({}))], "product", test_context("p"))
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.errors.iter().any(|e| e.message.contains("timed out")));
}

#[tokio::test]
async fn test_dead_letter_policy_forwards_to_recovery() {
    let dead_letters = Arc::new(InMemoryDeadLetterStore::new());
    let recovery =
        Arc::new(ErrorRecoverySystem::new().with_dead_letter_store(dead_letters.clone()));

    let executor = PipelineExecutor::new(StageServices::default())
        .with_dead_letter_sink(recovery.clone());
    executor.services().register_custom_handler(
        "boom",
        Arc::new(MockCustomLogic::new(|_records| {
            Err(RecordflowError::Internal(
                "401 unauthorized: token expired".to_string(),
            ))
        })),
    );

    let pipeline = Pipeline::new("p", "P")
        .with_stage(custom_stage("push", "boom"))
        .with_error_handling(ErrorHandlingStrategy::new(OnError::DeadLetter));

    let result = executor
        .execute(&pipeline, vec![record(json!({}))], "product", test_context("p"))
        .await
        .unwrap();

    // The pipeline continues and the failure is escalated for triage, but
    // the run still reports the stage failure.
    assert!(!result.success);
    assert!(result.errors.iter().any(|e| e.fatal));
    let pending = recovery
        .list_dead_letters(DeadLetterStatus::Pending)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].error.operation, "push");
}

#[tokio::test]
async fn test_routing_produces_tagged_buckets() {
    let pipeline = Pipeline::new("p", "P").with_stage(StageConfig::new(
        "route",
        StageParams::Routing {
            routes: vec![
                RoutingRule {
                    destination: "premium".to_string(),
                    expression: "input.price >= 100".to_string(),
                },
                RoutingRule {
                    destination: "standard".to_string(),
                    expression: "true".to_string(),
                },
            ],
            default_destination: None,
        },
    ));

    let executor = PipelineExecutor::default();
    let result = executor
        .execute(
            &pipeline,
            vec![product_record("A", 150.0), product_record("B", 20.0)],
            "product",
            test_context("p"),
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.routed_to("premium").len(), 1);
    assert_eq!(result.routed_to("standard").len(), 1);
    assert_eq!(
        result.routed_to("premium")[0].get("destination"),
        Some(&json!("premium"))
    );
    assert!(!result.routed_to("premium")[0].contains_key("_rf_index"));
    assert!(result.lineage.iter().any(|l| l
        .events
        .iter()
        .any(|e| e.detail == "premium")));
}
