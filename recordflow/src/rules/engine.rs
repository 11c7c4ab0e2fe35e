//! Named transformation rule registry.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::expr::{EvalError, EvalOutcome, Evaluator};

/// A named, versionless transformation expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformationRule {
    /// Unique rule id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// The expression text.
    pub expression: String,
    /// Per-rule evaluation timeout override, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TransformationRule {
    /// Creates a rule whose name defaults to its id.
    #[must_use]
    pub fn new(id: impl Into<String>, expression: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            expression: expression.into(),
            timeout_ms: None,
            description: None,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the timeout override.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Registry of transformation rules with execution entry points.
///
/// Execution failures (including unknown rule ids) are reported inside the
/// returned [`EvalOutcome`]; nothing here panics or throws past the
/// boundary.
#[derive(Debug)]
pub struct RuleEngine {
    evaluator: Arc<Evaluator>,
    rules: DashMap<String, TransformationRule>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEngine {
    /// Creates an engine with a fresh evaluator.
    #[must_use]
    pub fn new() -> Self {
        Self::with_evaluator(Arc::new(Evaluator::new()))
    }

    /// Creates an engine sharing an existing evaluator.
    #[must_use]
    pub fn with_evaluator(evaluator: Arc<Evaluator>) -> Self {
        Self {
            evaluator,
            rules: DashMap::new(),
        }
    }

    /// Returns the underlying evaluator.
    #[must_use]
    pub fn evaluator(&self) -> &Arc<Evaluator> {
        &self.evaluator
    }

    /// Registers a rule, replacing any rule with the same id.
    pub fn register_rule(&self, rule: TransformationRule) {
        self.rules.insert(rule.id.clone(), rule);
    }

    /// Removes a rule. Returns true if it existed.
    pub fn unregister_rule(&self, rule_id: &str) -> bool {
        self.rules.remove(rule_id).is_some()
    }

    /// Returns a rule by id.
    #[must_use]
    pub fn get_rule(&self, rule_id: &str) -> Option<TransformationRule> {
        self.rules.get(rule_id).map(|entry| entry.clone())
    }

    /// Lists all registered rules, sorted by id.
    #[must_use]
    pub fn list_rules(&self) -> Vec<TransformationRule> {
        let mut rules: Vec<TransformationRule> =
            self.rules.iter().map(|entry| entry.clone()).collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        rules
    }

    /// Executes a registered rule against `context`.
    ///
    /// A rule-level `timeout_ms` overrides the evaluator default. An unknown
    /// rule id yields a failure outcome containing "not found".
    #[must_use]
    pub fn execute_rule(&self, rule_id: &str, context: &Map<String, Value>) -> EvalOutcome {
        let Some(rule) = self.get_rule(rule_id) else {
            return EvalOutcome::failure(format!("Rule '{rule_id}' not found"), 0.0);
        };

        let timeout = rule
            .timeout_ms
            .map_or_else(|| self.evaluator.default_timeout(), Duration::from_millis);
        self.evaluator
            .evaluate_with_timeout(&rule.expression, context, timeout)
    }

    /// Executes an ad-hoc expression against `context`.
    #[must_use]
    pub fn execute_expression(&self, expression: &str, context: &Map<String, Value>) -> EvalOutcome {
        self.evaluator.evaluate(expression, context)
    }

    /// Smoke-checks an expression by evaluating it against dummy data.
    ///
    /// Reports evaluator success or failure only; a passing check does not
    /// imply the expression is semantically correct for real records.
    #[must_use]
    pub fn validate_expression(&self, expression: &str) -> EvalOutcome {
        let dummy = dummy_record();
        self.evaluator.evaluate(expression, &dummy)
    }

    /// Registers a custom function on the shared evaluator.
    pub fn register_function<F>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        self.evaluator.register_function(name, func);
    }

    /// Removes a custom function from the shared evaluator.
    pub fn unregister_function(&self, name: &str) -> bool {
        self.evaluator.unregister_function(name)
    }
}

fn dummy_record() -> Map<String, Value> {
    let mut record = Map::new();
    record.insert("value".to_string(), Value::from(1));
    record.insert("price".to_string(), Value::from(9.99));
    record.insert("qty".to_string(), Value::from(1));
    record.insert("name".to_string(), Value::String("sample".to_string()));
    record.insert("sku".to_string(), Value::String("SKU-1".to_string()));
    record
}
