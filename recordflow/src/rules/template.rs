//! Reusable, parameterized transformation templates.
//!
//! A template bundles several rules for a common entity-conversion scenario
//! and shares a `variables` map with every rule; execution yields a result
//! map keyed by rule id.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::engine::{RuleEngine, TransformationRule};

/// A bundle of rules with shared variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformationTemplate {
    /// Unique template id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// The entity type this template converts (product, order, customer...).
    pub entity_type: String,
    /// The rules executed by this template.
    pub rules: Vec<TransformationRule>,
    /// Variables bound under `variables` in every rule's context.
    #[serde(default)]
    pub variables: Map<String, Value>,
}

impl TransformationTemplate {
    /// Creates an empty template.
    #[must_use]
    pub fn new(id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            entity_type: entity_type.into(),
            rules: Vec::new(),
            variables: Map::new(),
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Adds a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: TransformationRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Sets a shared variable.
    #[must_use]
    pub fn with_variable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    /// Executes every rule against `input`, sharing the template variables.
    #[must_use]
    pub fn execute(&self, engine: &RuleEngine, input: &Map<String, Value>) -> TemplateResult {
        self.execute_with_variables(engine, input, &Map::new())
    }

    /// Executes with instance-level variable overrides layered over the
    /// template's own variables. The template itself stays read-only.
    #[must_use]
    pub fn execute_with_variables(
        &self,
        engine: &RuleEngine,
        input: &Map<String, Value>,
        overrides: &Map<String, Value>,
    ) -> TemplateResult {
        let mut variables = self.variables.clone();
        for (k, v) in overrides {
            variables.insert(k.clone(), v.clone());
        }

        let mut bindings = Map::new();
        bindings.insert("variables".to_string(), Value::Object(variables));

        let mut outputs = HashMap::new();
        let mut errors = HashMap::new();

        for rule in &self.rules {
            let outcome = engine
                .evaluator()
                .evaluate_with_bindings(
                    &rule.expression,
                    input,
                    &bindings,
                    rule.timeout_ms.map_or_else(
                        || engine.evaluator().default_timeout(),
                        std::time::Duration::from_millis,
                    ),
                );
            if outcome.success {
                outputs.insert(rule.id.clone(), outcome.output_or_null());
            } else {
                errors.insert(
                    rule.id.clone(),
                    outcome.error.unwrap_or_else(|| "unknown error".to_string()),
                );
            }
        }

        TemplateResult {
            template_id: self.id.clone(),
            success: errors.is_empty(),
            outputs,
            errors,
        }
    }
}

/// Result of executing a template: per-rule outputs keyed by rule id.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateResult {
    /// The template that produced this result.
    pub template_id: String,
    /// True when every rule evaluated successfully.
    pub success: bool,
    /// Rule id → produced value.
    pub outputs: HashMap<String, Value>,
    /// Rule id → error description for failed rules.
    pub errors: HashMap<String, String>,
}

/// Thread-safe store of templates with entity-type lookup.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: DashMap<String, Arc<TransformationTemplate>>,
}

impl TemplateRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry seeded with the starter templates for the common
    /// product/order/customer conversion scenarios.
    #[must_use]
    pub fn with_standard_templates() -> Self {
        let registry = Self::new();
        for template in standard_templates() {
            registry.register(template);
        }
        registry
    }

    /// Registers a template, replacing any with the same id.
    pub fn register(&self, template: TransformationTemplate) {
        self.templates
            .insert(template.id.clone(), Arc::new(template));
    }

    /// Removes a template. Returns true if it existed.
    pub fn unregister(&self, id: &str) -> bool {
        self.templates.remove(id).is_some()
    }

    /// Returns a template by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<TransformationTemplate>> {
        self.templates.get(id).map(|entry| Arc::clone(&entry))
    }

    /// Lists template ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.templates.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Returns all templates for an entity type.
    #[must_use]
    pub fn for_entity_type(&self, entity_type: &str) -> Vec<Arc<TransformationTemplate>> {
        let mut found: Vec<Arc<TransformationTemplate>> = self
            .templates
            .iter()
            .filter(|e| e.entity_type == entity_type)
            .map(|e| Arc::clone(&e))
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }
}

fn standard_templates() -> Vec<TransformationTemplate> {
    vec![
        TransformationTemplate::new("product_listing", "product")
            .with_name("Product listing conversion")
            .with_variable("markup", Value::from(1.0))
            .with_rule(TransformationRule::new("title", "trim(input.name)"))
            .with_rule(TransformationRule::new(
                "price",
                "round(input.price * variables.markup, 2)",
            ))
            .with_rule(TransformationRule::new(
                "sku",
                "upper(coalesce(input.sku, ''))",
            )),
        TransformationTemplate::new("order_import", "order")
            .with_name("Order import conversion")
            .with_rule(TransformationRule::new(
                "total",
                "round(input.subtotal + coalesce(input.tax, 0), 2)",
            ))
            .with_rule(TransformationRule::new(
                "status",
                "lookup(variables.status_map, input.status, 'pending')",
            ))
            .with_variable("status_map", serde_json::json!({"paid": "complete"})),
        TransformationTemplate::new("customer_profile", "customer")
            .with_name("Customer profile conversion")
            .with_rule(TransformationRule::new(
                "full_name",
                "trim(concat(coalesce(input.first_name, ''), ' ', coalesce(input.last_name, '')))",
            ))
            .with_rule(TransformationRule::new("email", "lower(input.email)")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ctx(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn test_template_execution_keyed_by_rule_id() {
        let engine = RuleEngine::new();
        let template = TransformationTemplate::new("t", "product")
            .with_rule(TransformationRule::new("double", "input.value*2"))
            .with_rule(TransformationRule::new("label", "upper(input.name)"));

        let result = template.execute(&engine, &ctx(json!({"value": 5, "name": "abc"})));
        assert!(result.success);
        assert_eq!(result.outputs.get("double"), Some(&json!(10)));
        assert_eq!(result.outputs.get("label"), Some(&json!("ABC")));
    }

    #[test]
    fn test_template_variables_and_overrides() {
        let engine = RuleEngine::new();
        let template = TransformationTemplate::new("t", "product")
            .with_variable("markup", json!(2))
            .with_rule(TransformationRule::new("price", "input.price * variables.markup"));

        let input = ctx(json!({"price": 10}));
        let result = template.execute(&engine, &input);
        assert_eq!(result.outputs.get("price"), Some(&json!(20)));

        let overrides = ctx(json!({"markup": 3}));
        let result = template.execute_with_variables(&engine, &input, &overrides);
        assert_eq!(result.outputs.get("price"), Some(&json!(30)));
        // Overrides are instance-level; the template is unchanged.
        assert_eq!(template.variables.get("markup"), Some(&json!(2)));
    }

    #[test]
    fn test_template_partial_failure() {
        let engine = RuleEngine::new();
        let template = TransformationTemplate::new("t", "product")
            .with_rule(TransformationRule::new("ok", "1 + 1"))
            .with_rule(TransformationRule::new("bad", "1 +"));

        let result = template.execute(&engine, &Map::new());
        assert!(!result.success);
        assert_eq!(result.outputs.get("ok"), Some(&json!(2)));
        assert!(result.errors.contains_key("bad"));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = TemplateRegistry::with_standard_templates();
        assert!(registry.get("product_listing").is_some());
        let products = registry.for_entity_type("product");
        assert_eq!(products.len(), 1);
        assert!(registry.for_entity_type("order").len() == 1);
    }

    #[test]
    fn test_standard_product_template_runs() {
        let engine = RuleEngine::new();
        let registry = TemplateRegistry::with_standard_templates();
        let template = registry.get("product_listing").unwrap();

        let input = ctx(json!({"name": " Widget ", "price": 10.0, "sku": "w-1"}));
        let result = template.execute(&engine, &input);
        assert!(result.success, "errors: {:?}", result.errors);
        assert_eq!(result.outputs.get("title"), Some(&json!("Widget")));
        assert_eq!(result.outputs.get("price"), Some(&json!(10)));
        assert_eq!(result.outputs.get("sku"), Some(&json!("W-1")));
    }
}
