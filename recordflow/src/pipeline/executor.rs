//! The stage executor.
//!
//! Runs one batch of records through a validated pipeline in dependency
//! order, applying per-stage timeout, conditional skip and the pipeline's
//! error-handling policy, then aggregates quality metrics and lineage.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::config::{OnError, Pipeline, StageConfig, StageParams};
use super::context::{
    DataProcessingContext, ExecutionContext, StageExecutionResult, StageStatus,
};
use super::dag::parallel_batches;
use super::lineage::LineageTracker;
use super::result::{ProcessingCounts, ProcessingError, ProcessingResult, ProcessingWarning};
use super::retry::RetryStrategy;
use super::stages::{
    run_custom_logic, run_enrichment, run_ingestion, run_quality_scoring, run_routing,
    run_schema_validation, run_transformation, StageOutcome, StageServices,
};
use super::Record;
use super::quality::DataQualityMetrics;
use crate::errors::RecordflowError;
use crate::recovery::ErrorContext;
use crate::utils::now;

/// Receives error contexts from stages running under the `DeadLetter`
/// policy. Implemented by the error recovery system.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Accepts one failure for recovery or escalation.
    async fn forward(&self, error: ErrorContext);
}

/// Everything one stage run produced, before policy is applied.
struct StageRun {
    outcome: StageOutcome,
    lineage: LineageTracker,
    duration_ms: u64,
    attempts: usize,
    timed_out: bool,
}

/// Executes pipelines against batches of records.
#[derive(Clone)]
pub struct PipelineExecutor {
    services: StageServices,
    dead_letter_sink: Option<Arc<dyn DeadLetterSink>>,
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("services", &self.services)
            .field("dead_letter_sink", &self.dead_letter_sink.is_some())
            .finish()
    }
}

impl Default for PipelineExecutor {
    fn default() -> Self {
        Self::new(StageServices::default())
    }
}

impl PipelineExecutor {
    /// Creates an executor around shared stage services.
    #[must_use]
    pub fn new(services: StageServices) -> Self {
        Self {
            services,
            dead_letter_sink: None,
        }
    }

    /// Attaches the sink consulted by the `DeadLetter` error policy.
    #[must_use]
    pub fn with_dead_letter_sink(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letter_sink = Some(sink);
        self
    }

    /// Returns the stage services (for registering sources and handlers).
    #[must_use]
    pub fn services(&self) -> &StageServices {
        &self.services
    }

    /// Runs `records` through `pipeline`.
    ///
    /// Configuration problems (duplicate ids, unknown dependencies, cycles,
    /// missing per-type params) are returned as `Err` before any stage runs;
    /// processing failures are reported inside the [`ProcessingResult`].
    ///
    /// # Errors
    ///
    /// Returns [`RecordflowError::Validation`] or
    /// [`RecordflowError::CycleDetected`] for invalid configuration.
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        records: Vec<Record>,
        entity_type: &str,
        processing: DataProcessingContext,
    ) -> Result<ProcessingResult, RecordflowError> {
        pipeline.validate()?;
        let order = pipeline.execution_order()?;
        let batches = parallel_batches(&order, &pipeline.stages);

        let started = Instant::now();
        let input_count = records.len();
        let mut ctx = ExecutionContext::new(entity_type, processing, records);

        info!(
            pipeline_id = %pipeline.id,
            execution_id = %ctx.execution_id,
            correlation_id = %ctx.processing.correlation_id,
            records = input_count,
            stages = order.len(),
            "executing pipeline"
        );

        let mut counts = ProcessingCounts {
            processed: input_count,
            ..ProcessingCounts::default()
        };
        let mut errors: Vec<ProcessingError> = Vec::new();
        let mut warnings: Vec<ProcessingWarning> = Vec::new();
        let mut destinations: HashMap<String, Vec<Record>> = HashMap::new();
        let mut aborted = false;
        let mut last_stage_id: Option<String> = None;

        'batches: for batch in &batches {
            // Resolve inputs against already-recorded results, then run the
            // whole batch concurrently; members of a batch never depend on
            // each other.
            let mut pending: Vec<(&StageConfig, Vec<Record>)> = Vec::new();
            for stage_id in batch {
                let Some(stage) = pipeline.stage(stage_id) else {
                    continue;
                };
                let input = ctx.input_for(&stage.dependencies);

                if !stage.conditions_hold(input.first()) {
                    debug!(stage_id = %stage.id, "conditions not met, skipping");
                    counts.skipped_stages += 1;
                    ctx.record_stage(StageExecutionResult::skipped(&stage.id, input));
                    last_stage_id = Some(stage.id.clone());
                    continue;
                }
                pending.push((stage, input));
            }

            let runs = join_all(pending.iter().map(|(stage, input)| {
                self.run_stage_with_policy(
                    stage,
                    input.clone(),
                    &ctx.processing,
                    pipeline.error_handling.on_processing_error,
                )
            }))
            .await;

            for ((stage, input), mut run) in pending.into_iter().zip(runs) {
                ctx.lineage.merge(run.lineage);
                warnings.append(&mut run.outcome.warnings);
                counts.enriched += run.outcome.enriched;
                counts.transformed += run.outcome.transformed;
                for (dest, mut bucket) in run.outcome.destinations.drain() {
                    destinations.entry(dest).or_default().append(&mut bucket);
                }

                let fatal_message = if run.timed_out {
                    Some(format!(
                        "stage '{}' timed out after {}ms",
                        stage.id,
                        stage.timeout().as_millis()
                    ))
                } else {
                    run.outcome.fatal.clone()
                };

                let mut result = match &fatal_message {
                    Some(message) => {
                        StageExecutionResult::failed(&stage.id, ProcessingError::fatal(&stage.id, message.clone()))
                    }
                    None => {
                        let mut ok =
                            StageExecutionResult::completed(&stage.id, run.outcome.output);
                        ok.errors = std::mem::take(&mut run.outcome.errors);
                        ok.metadata = std::mem::take(&mut run.outcome.metadata);
                        ok
                    }
                };
                result.duration_ms = run.duration_ms;
                result.attempts = run.attempts;
                errors.extend(result.errors.iter().cloned());
                last_stage_id = Some(stage.id.clone());

                if let Some(message) = fatal_message {
                    warn!(stage_id = %stage.id, error = %message, "stage failed");
                    match pipeline.error_handling.on_processing_error {
                        OnError::Fail | OnError::Retry => {
                            // Retry already ran inside the policy wrapper.
                            ctx.record_stage(result);
                            aborted = true;
                            break 'batches;
                        }
                        OnError::Skip => {
                            result.status = StageStatus::Failed;
                            result.output = input;
                            ctx.record_stage(result);
                        }
                        OnError::DeadLetter => {
                            self.forward_to_dead_letter(&message, stage, &ctx).await;
                            result.status = StageStatus::Failed;
                            result.output = input;
                            ctx.record_stage(result);
                        }
                    }
                } else {
                    ctx.record_stage(result);
                }
            }
        }

        let mut final_records: Vec<Record> = last_stage_id
            .as_ref()
            .and_then(|id| ctx.stage_results.get(id))
            .map(|r| r.output.clone())
            .unwrap_or_else(|| ctx.input.clone());

        let lineage = std::mem::take(&mut ctx.lineage).finish(&mut final_records);
        for bucket in destinations.values_mut() {
            for record in bucket.iter_mut() {
                LineageTracker::strip_tag(record);
            }
        }

        counts.succeeded = final_records.len();
        counts.failed = counts.processed.saturating_sub(counts.succeeded);

        let quality = if aborted {
            None
        } else {
            Some(DataQualityMetrics::compute(
                &final_records,
                &pipeline.validation_rules,
                counts.processed,
                counts.failed,
            ))
        };

        let duration = started.elapsed();
        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = duration.as_millis() as u64;
        let records_per_second = if duration.as_secs_f64() > 0.0 {
            #[allow(clippy::cast_precision_loss)]
            let rps = counts.processed as f64 / duration.as_secs_f64();
            rps
        } else {
            0.0
        };

        if let Some(max) = pipeline.performance.max_duration_ms {
            if duration_ms > max {
                warnings.push(ProcessingWarning::new(
                    "pipeline",
                    format!("duration {duration_ms}ms exceeded target {max}ms"),
                ));
            }
        }
        if let Some(min_rps) = pipeline.performance.min_records_per_second {
            if records_per_second < min_rps && counts.processed > 0 {
                warnings.push(ProcessingWarning::new(
                    "pipeline",
                    format!("throughput {records_per_second:.1} rec/s below target {min_rps:.1}"),
                ));
            }
        }

        // Skip/DeadLetter keep processing past a failed stage, but a stage
        // failure still makes the run unsuccessful.
        let success = !aborted && errors.iter().all(|e| !e.fatal);
        info!(
            pipeline_id = %pipeline.id,
            execution_id = %ctx.execution_id,
            success,
            succeeded = counts.succeeded,
            failed = counts.failed,
            duration_ms,
            "pipeline finished"
        );

        Ok(ProcessingResult {
            pipeline_id: pipeline.id.clone(),
            execution_id: ctx.execution_id,
            correlation_id: Some(ctx.processing.correlation_id),
            success,
            records: final_records,
            destinations,
            counts,
            warnings,
            errors,
            quality,
            lineage,
            duration_ms,
            records_per_second,
        })
    }

    /// Runs one stage under its timeout, re-attempting per its retry
    /// strategy when the pipeline policy is `Retry`.
    async fn run_stage_with_policy(
        &self,
        stage: &StageConfig,
        input: Vec<Record>,
        processing: &DataProcessingContext,
        on_error: OnError,
    ) -> StageRun {
        let retry = if on_error == OnError::Retry {
            stage.retry.clone()
        } else {
            RetryStrategy::new().with_max_attempts(1)
        };

        let mut attempt = 0;
        loop {
            let started = Instant::now();
            let mut lineage = LineageTracker::new();
            let attempt_input = input.clone();

            let ran = tokio::time::timeout(
                stage.timeout(),
                self.run_stage_once(stage, attempt_input, processing, &mut lineage),
            )
            .await;
            #[allow(clippy::cast_possible_truncation)]
            let duration_ms = started.elapsed().as_millis() as u64;
            attempt += 1;

            let (outcome, timed_out) = match ran {
                Ok(outcome) => (outcome, false),
                Err(_) => (StageOutcome::default(), true),
            };

            let failed = timed_out || outcome.fatal.is_some();
            if failed && attempt < retry.max_attempts {
                let delay = retry.delay_for_attempt(attempt - 1);
                debug!(
                    stage_id = %stage.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying stage"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return StageRun {
                outcome,
                lineage,
                duration_ms,
                attempts: attempt,
                timed_out,
            };
        }
    }

    async fn run_stage_once(
        &self,
        stage: &StageConfig,
        input: Vec<Record>,
        processing: &DataProcessingContext,
        lineage: &mut LineageTracker,
    ) -> StageOutcome {
        match &stage.params {
            StageParams::Ingestion {
                field_mappings,
                required_fields,
            } => run_ingestion(&stage.id, input, field_mappings, required_fields, lineage),
            StageParams::SchemaValidation {
                rules,
                auto_correct,
            } => run_schema_validation(&stage.id, input, rules, *auto_correct, lineage),
            StageParams::DataTransformation { transformations } => {
                run_transformation(&stage.id, input, transformations, &self.services, lineage)
            }
            StageParams::Enrichment { source, fields } => {
                run_enrichment(&stage.id, input, source, fields, &self.services, lineage).await
            }
            StageParams::QualityScoring { rules } => {
                run_quality_scoring(&stage.id, input, rules, &self.services)
            }
            StageParams::Routing {
                routes,
                default_destination,
            } => run_routing(
                &stage.id,
                input,
                routes,
                default_destination.as_deref(),
                &self.services,
                lineage,
            ),
            StageParams::CustomLogic { handler } => {
                run_custom_logic(input, handler, &self.services, processing).await
            }
        }
    }

    async fn forward_to_dead_letter(
        &self,
        message: &str,
        stage: &StageConfig,
        ctx: &ExecutionContext,
    ) {
        let Some(sink) = &self.dead_letter_sink else {
            warn!(stage_id = %stage.id, "dead-letter policy set but no sink attached");
            return;
        };
        let mut metadata = HashMap::new();
        metadata.insert(
            "pipeline_id".to_string(),
            ctx.processing.pipeline_id.clone(),
        );
        metadata.insert("execution_id".to_string(), ctx.execution_id.clone());
        metadata.insert(
            "correlation_id".to_string(),
            ctx.processing.correlation_id.clone(),
        );
        sink.forward(ErrorContext {
            message: message.to_string(),
            operation: stage.id.clone(),
            platform: ctx.processing.source.clone(),
            attempt: 1,
            timestamp: now(),
            metadata,
        })
        .await;
    }
}
