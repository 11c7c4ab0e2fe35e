//! Pipeline and stage configuration types with validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use super::dag;
use super::retry::RetryStrategy;
use crate::errors::{PipelineValidationError, RecordflowError};

/// Default per-stage timeout when none is configured.
pub const DEFAULT_STAGE_TIMEOUT_MS: u64 = 30_000;

/// The responsibility of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    /// Field normalization and required-field checks on raw input.
    Ingestion,
    /// Required-field and type validation, optionally auto-correcting.
    SchemaValidation,
    /// Per-record expression transformations via the rule engine.
    DataTransformation,
    /// Best-effort merge of supplementary fields from a named source.
    Enrichment,
    /// Weighted 0-1 scoring with a quality distribution.
    QualityScoring,
    /// Partitioning records into named destination buckets.
    Routing,
    /// Delegation to an externally supplied handler.
    CustomLogic,
}

impl std::fmt::Display for StageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Ingestion => "ingestion",
            Self::SchemaValidation => "schema_validation",
            Self::DataTransformation => "data_transformation",
            Self::Enrichment => "enrichment",
            Self::QualityScoring => "quality_scoring",
            Self::Routing => "routing",
            Self::CustomLogic => "custom_logic",
        };
        write!(f, "{name}")
    }
}

/// Comparison operator for a processing condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Greater or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less or equal.
    Lte,
    /// String/array containment.
    Contains,
    /// Field is present and non-null.
    Exists,
}

/// How a stage's conditions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionLogic {
    /// Every condition must hold (AND).
    #[default]
    All,
    /// At least one condition must hold (OR).
    Any,
}

/// Gates stage execution by a field check.
///
/// Conditions are evaluated against the first record of the stage's input;
/// an empty input batch satisfies no condition except a negated `Exists`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingCondition {
    /// The record field to inspect.
    pub field: String,
    /// The comparison operator.
    pub operator: ConditionOperator,
    /// The comparison value (ignored for `Exists`).
    #[serde(default)]
    pub value: Value,
}

impl ProcessingCondition {
    /// Creates a condition.
    #[must_use]
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Evaluates the condition against a record.
    #[must_use]
    pub fn matches(&self, record: &super::Record) -> bool {
        let field_value = record.get(&self.field);
        match self.operator {
            ConditionOperator::Exists => field_value.is_some_and(|v| !v.is_null()),
            ConditionOperator::Eq => field_value == Some(&self.value),
            ConditionOperator::Ne => field_value != Some(&self.value),
            ConditionOperator::Gt | ConditionOperator::Gte
            | ConditionOperator::Lt | ConditionOperator::Lte => {
                let Some(lhs) = field_value.and_then(Value::as_f64) else {
                    return false;
                };
                let Some(rhs) = self.value.as_f64() else {
                    return false;
                };
                match self.operator {
                    ConditionOperator::Gt => lhs > rhs,
                    ConditionOperator::Gte => lhs >= rhs,
                    ConditionOperator::Lt => lhs < rhs,
                    ConditionOperator::Lte => lhs <= rhs,
                    _ => unreachable!(),
                }
            }
            ConditionOperator::Contains => match (field_value, &self.value) {
                (Some(Value::String(s)), Value::String(needle)) => s.contains(needle.as_str()),
                (Some(Value::Array(items)), needle) => items.contains(needle),
                _ => false,
            },
        }
    }
}

/// Expected JSON type for a validated field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// JSON string.
    String,
    /// JSON number.
    Number,
    /// JSON boolean.
    Boolean,
    /// JSON array.
    Array,
    /// JSON object.
    Object,
}

impl FieldType {
    /// Returns true when `value` already has this type.
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    /// Attempts a lossless-enough coercion for auto-correction.
    #[must_use]
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        match self {
            Self::String => match value {
                Value::Number(n) => Some(Value::String(n.to_string())),
                Value::Bool(b) => Some(Value::String(b.to_string())),
                _ => None,
            },
            Self::Number => match value {
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number),
                Value::Bool(b) => Some(Value::from(i32::from(*b))),
                _ => None,
            },
            Self::Boolean => match value {
                Value::String(s) => match s.trim().to_lowercase().as_str() {
                    "true" | "yes" | "1" => Some(Value::Bool(true)),
                    "false" | "no" | "0" => Some(Value::Bool(false)),
                    _ => None,
                },
                Value::Number(n) => n.as_f64().map(|f| Value::Bool(f != 0.0)),
                _ => None,
            },
            Self::Array | Self::Object => None,
        }
    }
}

/// A declared field requirement for schema validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRule {
    /// The field name.
    pub field: String,
    /// The expected type, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_type: Option<FieldType>,
    /// Whether the field must be present and non-null.
    #[serde(default)]
    pub required: bool,
}

impl ValidationRule {
    /// Creates a required-field rule.
    #[must_use]
    pub fn required(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            expected_type: None,
            required: true,
        }
    }

    /// Creates a typed rule.
    #[must_use]
    pub fn typed(field: impl Into<String>, expected_type: FieldType) -> Self {
        Self {
            field: field.into(),
            expected_type: Some(expected_type),
            required: false,
        }
    }

    /// Marks the rule as required.
    #[must_use]
    pub fn and_required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// What a transformation step executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformationSpec {
    /// A registered rule id.
    Rule {
        /// The rule to execute.
        rule_id: String,
    },
    /// An inline expression.
    Expression {
        /// The expression text.
        expression: String,
    },
}

/// One ordered transformation applied per record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformationStep {
    /// The field the result is written to.
    pub target_field: String,
    /// What to execute.
    #[serde(flatten)]
    pub spec: TransformationSpec,
}

impl TransformationStep {
    /// Creates a step backed by a registered rule.
    #[must_use]
    pub fn rule(target_field: impl Into<String>, rule_id: impl Into<String>) -> Self {
        Self {
            target_field: target_field.into(),
            spec: TransformationSpec::Rule {
                rule_id: rule_id.into(),
            },
        }
    }

    /// Creates a step backed by an inline expression.
    #[must_use]
    pub fn expression(target_field: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            target_field: target_field.into(),
            spec: TransformationSpec::Expression {
                expression: expression.into(),
            },
        }
    }
}

/// Scored quality dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityDimension {
    /// Fraction of the listed fields that are populated.
    Completeness,
    /// Expression-based validity check.
    Validity,
    /// Expression-based consistency check.
    Consistency,
}

/// One weighted rule contributing to a record's quality score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityRule {
    /// The dimension being scored.
    pub dimension: QualityDimension,
    /// Relative weight (normalized across the stage's rules).
    pub weight: f64,
    /// Fields inspected by completeness scoring.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    /// Expression for validity/consistency scoring; truthy scores 1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

/// A routing rule: records matching `expression` go to `destination`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    /// The destination bucket name.
    pub destination: String,
    /// The gate expression, evaluated per record.
    pub expression: String,
}

/// Per-type stage parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageParams {
    /// Field-name normalization and presence warnings.
    Ingestion {
        /// source field name → normalized field name.
        #[serde(default)]
        field_mappings: HashMap<String, String>,
        /// Fields whose absence produces a (non-fatal) warning.
        #[serde(default)]
        required_fields: Vec<String>,
    },
    /// Required-field and type validation.
    SchemaValidation {
        /// The rules to check.
        rules: Vec<ValidationRule>,
        /// When set, coercible type mismatches produce a corrected record
        /// instead of a failure.
        #[serde(default)]
        auto_correct: bool,
    },
    /// Ordered per-record transformations.
    DataTransformation {
        /// Steps applied in order.
        transformations: Vec<TransformationStep>,
    },
    /// Supplementary-field merge from a named source.
    Enrichment {
        /// The registered source id.
        source: String,
        /// Fields taken from the source payload; empty means all.
        #[serde(default)]
        fields: Vec<String>,
    },
    /// Weighted quality scoring.
    QualityScoring {
        /// The scoring rules.
        rules: Vec<QualityRule>,
    },
    /// Rule-based partitioning into destination buckets.
    Routing {
        /// Routes tried in order; first match wins.
        routes: Vec<RoutingRule>,
        /// Bucket for records matching no route.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_destination: Option<String>,
    },
    /// Externally supplied handler.
    CustomLogic {
        /// The registered handler id.
        handler: String,
    },
}

impl StageParams {
    /// Returns the stage type these parameters belong to.
    #[must_use]
    pub fn stage_type(&self) -> StageType {
        match self {
            Self::Ingestion { .. } => StageType::Ingestion,
            Self::SchemaValidation { .. } => StageType::SchemaValidation,
            Self::DataTransformation { .. } => StageType::DataTransformation,
            Self::Enrichment { .. } => StageType::Enrichment,
            Self::QualityScoring { .. } => StageType::QualityScoring,
            Self::Routing { .. } => StageType::Routing,
            Self::CustomLogic { .. } => StageType::CustomLogic,
        }
    }

    fn validate(&self, stage_id: &str) -> Result<(), PipelineValidationError> {
        let fail = |msg: String| {
            Err(PipelineValidationError::new(msg).with_stages(vec![stage_id.to_string()]))
        };
        match self {
            Self::SchemaValidation { rules, .. } if rules.is_empty() => {
                fail(format!("stage '{stage_id}': schema_validation requires rules"))
            }
            Self::DataTransformation { transformations } if transformations.is_empty() => fail(
                format!("stage '{stage_id}': data_transformation requires transformations"),
            ),
            Self::Enrichment { source, .. } if source.trim().is_empty() => {
                fail(format!("stage '{stage_id}': enrichment requires a source"))
            }
            Self::QualityScoring { rules } if rules.is_empty() => {
                fail(format!("stage '{stage_id}': quality_scoring requires rules"))
            }
            Self::Routing {
                routes,
                default_destination,
            } if routes.is_empty() && default_destination.is_none() => fail(format!(
                "stage '{stage_id}': routing requires routes or a default destination"
            )),
            Self::CustomLogic { handler } if handler.trim().is_empty() => {
                fail(format!("stage '{stage_id}': custom_logic requires a handler"))
            }
            _ => Ok(()),
        }
    }
}

/// Configuration of one pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage id within the pipeline.
    pub id: String,
    /// Per-type parameters (also determine the stage type).
    pub params: StageParams,
    /// Ids of stages this stage depends on, in declaration order. A stage
    /// with dependencies consumes the output of its *last* listed
    /// dependency.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Stages sharing a tag and no mutual dependency may run concurrently.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_group: Option<String>,
    /// Stage timeout in milliseconds; enforced by the executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Retry behavior when the pipeline's error handling is `Retry`.
    #[serde(default)]
    pub retry: RetryStrategy,
    /// Conditions gating execution.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ProcessingCondition>,
    /// How conditions combine.
    #[serde(default)]
    pub condition_logic: ConditionLogic,
}

impl StageConfig {
    /// Creates a stage with defaults.
    #[must_use]
    pub fn new(id: impl Into<String>, params: StageParams) -> Self {
        Self {
            id: id.into(),
            params,
            dependencies: Vec::new(),
            parallel_group: None,
            timeout_ms: None,
            retry: RetryStrategy::default(),
            conditions: Vec::new(),
            condition_logic: ConditionLogic::All,
        }
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.push(dep.into());
        self
    }

    /// Tags the stage for parallel execution.
    #[must_use]
    pub fn with_parallel_group(mut self, group: impl Into<String>) -> Self {
        self.parallel_group = Some(group.into());
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Sets the retry strategy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryStrategy) -> Self {
        self.retry = retry;
        self
    }

    /// Adds a condition.
    #[must_use]
    pub fn with_condition(mut self, condition: ProcessingCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Sets the condition logic.
    #[must_use]
    pub fn with_condition_logic(mut self, logic: ConditionLogic) -> Self {
        self.condition_logic = logic;
        self
    }

    /// Returns the stage type.
    #[must_use]
    pub fn stage_type(&self) -> StageType {
        self.params.stage_type()
    }

    /// Returns the effective timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_STAGE_TIMEOUT_MS))
    }

    /// Evaluates the stage's conditions against a record.
    #[must_use]
    pub fn conditions_hold(&self, record: Option<&super::Record>) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        let empty = super::Record::new();
        let record = record.unwrap_or(&empty);
        match self.condition_logic {
            ConditionLogic::All => self.conditions.iter().all(|c| c.matches(record)),
            ConditionLogic::Any => self.conditions.iter().any(|c| c.matches(record)),
        }
    }
}

/// What the executor does when a stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Abort the whole pipeline immediately.
    #[default]
    Fail,
    /// Re-attempt the stage with its retry strategy, then abort.
    Retry,
    /// Record the failure and continue; dependents see the stage's input.
    Skip,
    /// Forward to the error recovery system, then continue as `Skip`.
    DeadLetter,
}

/// Pipeline-level failure policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorHandlingStrategy {
    /// Behavior when a stage produces a fatal failure.
    #[serde(default)]
    pub on_processing_error: OnError,
}

impl ErrorHandlingStrategy {
    /// Creates a policy.
    #[must_use]
    pub fn new(on_processing_error: OnError) -> Self {
        Self {
            on_processing_error,
        }
    }
}

/// Performance expectations; exceeding them produces warnings, not failures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceTarget {
    /// Maximum acceptable total duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_ms: Option<u64>,
    /// Minimum acceptable throughput.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_records_per_second: Option<f64>,
}

/// Immutable pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline id.
    pub id: String,
    /// Monotonically increasing version, bumped by the registry on update.
    #[serde(default)]
    pub version: u64,
    /// Display name.
    pub name: String,
    /// Only enabled pipelines are cached as active.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Ordered stage configurations.
    pub stages: Vec<StageConfig>,
    /// Pipeline-level validation rules, also the field universe for
    /// completeness metrics.
    #[serde(default)]
    pub validation_rules: Vec<ValidationRule>,
    /// Failure policy.
    #[serde(default)]
    pub error_handling: ErrorHandlingStrategy,
    /// Performance expectations.
    #[serde(default)]
    pub performance: PerformanceTarget,
}

fn default_enabled() -> bool {
    true
}

impl Pipeline {
    /// Creates an enabled pipeline with defaults.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: 1,
            name: name.into(),
            enabled: true,
            stages: Vec::new(),
            validation_rules: Vec::new(),
            error_handling: ErrorHandlingStrategy::default(),
            performance: PerformanceTarget::default(),
        }
    }

    /// Adds a stage.
    #[must_use]
    pub fn with_stage(mut self, stage: StageConfig) -> Self {
        self.stages.push(stage);
        self
    }

    /// Adds a pipeline-level validation rule.
    #[must_use]
    pub fn with_validation_rule(mut self, rule: ValidationRule) -> Self {
        self.validation_rules.push(rule);
        self
    }

    /// Sets the failure policy.
    #[must_use]
    pub fn with_error_handling(mut self, strategy: ErrorHandlingStrategy) -> Self {
        self.error_handling = strategy;
        self
    }

    /// Sets the performance target.
    #[must_use]
    pub fn with_performance(mut self, target: PerformanceTarget) -> Self {
        self.performance = target;
        self
    }

    /// Returns a stage by id.
    #[must_use]
    pub fn stage(&self, id: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Validates the configuration: unique stage ids, known dependencies,
    /// an acyclic dependency graph, per-type parameters and parallel-group
    /// independence.
    ///
    /// # Errors
    ///
    /// Returns the first configuration problem found; a dependency cycle is
    /// reported as [`RecordflowError::CycleDetected`] before any stage could
    /// run.
    pub fn validate(&self) -> Result<(), RecordflowError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new(format!(
                "pipeline '{}' has no stages",
                self.id
            ))
            .into());
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.id.clone()) {
                return Err(PipelineValidationError::new(format!(
                    "duplicate stage id '{}'",
                    stage.id
                ))
                .with_stages(vec![stage.id.clone()])
                .into());
            }
        }

        for stage in &self.stages {
            for dep in &stage.dependencies {
                if dep == &stage.id {
                    return Err(PipelineValidationError::new(format!(
                        "stage '{}' cannot depend on itself",
                        stage.id
                    ))
                    .with_stages(vec![stage.id.clone()])
                    .into());
                }
                if !seen.contains(dep) {
                    return Err(PipelineValidationError::new(format!(
                        "stage '{}' depends on unknown stage '{dep}'",
                        stage.id
                    ))
                    .with_stages(vec![stage.id.clone()])
                    .into());
                }
            }
            stage.params.validate(&stage.id)?;
        }

        // Stages sharing a parallel group may run concurrently, so they must
        // not depend on one another.
        for stage in &self.stages {
            let Some(group) = &stage.parallel_group else {
                continue;
            };
            for dep in &stage.dependencies {
                let dep_in_same_group = self
                    .stage(dep)
                    .and_then(|d| d.parallel_group.as_ref())
                    .is_some_and(|g| g == group);
                if dep_in_same_group {
                    return Err(PipelineValidationError::new(format!(
                        "stage '{}' depends on '{dep}' within parallel group '{group}'",
                        stage.id
                    ))
                    .with_stages(vec![stage.id.clone(), dep.clone()])
                    .into());
                }
            }
        }

        dag::execution_order(&self.stages)?;
        Ok(())
    }

    /// Returns a valid topological execution order over the stages.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::CycleDetectedError`] when the dependency
    /// graph contains a cycle.
    pub fn execution_order(&self) -> Result<Vec<String>, crate::errors::CycleDetectedError> {
        dag::execution_order(&self.stages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ingestion(id: &str) -> StageConfig {
        StageConfig::new(
            id,
            StageParams::Ingestion {
                field_mappings: HashMap::new(),
                required_fields: Vec::new(),
            },
        )
    }

    #[test]
    fn test_condition_operators() {
        let mut record = super::super::Record::new();
        record.insert("qty".to_string(), json!(5));
        record.insert("name".to_string(), json!("blue widget"));

        let gt = ProcessingCondition::new("qty", ConditionOperator::Gt, json!(3));
        assert!(gt.matches(&record));

        let lt = ProcessingCondition::new("qty", ConditionOperator::Lt, json!(3));
        assert!(!lt.matches(&record));

        let contains = ProcessingCondition::new("name", ConditionOperator::Contains, json!("widget"));
        assert!(contains.matches(&record));

        let exists = ProcessingCondition::new("missing", ConditionOperator::Exists, json!(null));
        assert!(!exists.matches(&record));
    }

    #[test]
    fn test_condition_logic_all_vs_any() {
        let mut record = super::super::Record::new();
        record.insert("qty".to_string(), json!(5));

        let stage = ingestion("s")
            .with_condition(ProcessingCondition::new("qty", ConditionOperator::Gt, json!(3)))
            .with_condition(ProcessingCondition::new("qty", ConditionOperator::Lt, json!(4)));
        assert!(!stage.conditions_hold(Some(&record)));

        let stage = stage.with_condition_logic(ConditionLogic::Any);
        assert!(stage.conditions_hold(Some(&record)));
    }

    #[test]
    fn test_field_type_coercion() {
        assert_eq!(
            FieldType::Number.coerce(&json!("12.5")),
            Some(json!(12.5))
        );
        assert_eq!(
            FieldType::Boolean.coerce(&json!("yes")),
            Some(json!(true))
        );
        assert_eq!(FieldType::String.coerce(&json!(7)), Some(json!("7")));
        assert_eq!(FieldType::Number.coerce(&json!("abc")), None);
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let pipeline = Pipeline::new("p", "P")
            .with_stage(ingestion("a"))
            .with_stage(ingestion("a"));
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_dependency() {
        let pipeline = Pipeline::new("p", "P").with_stage(ingestion("a").with_dependency("ghost"));
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_cycle_before_execution() {
        let pipeline = Pipeline::new("p", "P")
            .with_stage(ingestion("a").with_dependency("b"))
            .with_stage(ingestion("b").with_dependency("a"));
        let err = pipeline.validate().unwrap_err();
        assert!(matches!(err, RecordflowError::CycleDetected(_)));
    }

    #[test]
    fn test_validate_rejects_empty_transformations() {
        let pipeline = Pipeline::new("p", "P").with_stage(StageConfig::new(
            "t",
            StageParams::DataTransformation {
                transformations: Vec::new(),
            },
        ));
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_dependency_inside_parallel_group() {
        let pipeline = Pipeline::new("p", "P")
            .with_stage(ingestion("a").with_parallel_group("g"))
            .with_stage(
                ingestion("b")
                    .with_parallel_group("g")
                    .with_dependency("a"),
            );
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn test_stage_params_roundtrip_serde() {
        let stage = StageConfig::new(
            "route",
            StageParams::Routing {
                routes: vec![RoutingRule {
                    destination: "eu".to_string(),
                    expression: "input.region == 'eu'".to_string(),
                }],
                default_destination: Some("rest".to_string()),
            },
        );
        let json_text = serde_json::to_string(&stage).unwrap();
        let back: StageConfig = serde_json::from_str(&json_text).unwrap();
        assert_eq!(back.stage_type(), StageType::Routing);
    }
}
