//! Record and pipeline fixtures.

use serde_json::{json, Value};
use std::collections::HashMap;

use crate::pipeline::{
    DataProcessingContext, FieldType, Pipeline, Record, StageConfig, StageParams,
    TransformationStep, ValidationRule,
};

fn as_record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("fixture must be a JSON object, got {other:?}"),
    }
}

/// A plausible product record.
#[must_use]
pub fn product_record(sku: &str, price: f64) -> Record {
    as_record(json!({
        "sku": sku,
        "name": "Widget",
        "price": price,
        "qty": 10,
        "category": "tools",
    }))
}

/// A plausible order record.
#[must_use]
pub fn order_record(order_id: &str, subtotal: f64) -> Record {
    as_record(json!({
        "order_id": order_id,
        "subtotal": subtotal,
        "tax": subtotal * 0.2,
        "status": "paid",
    }))
}

/// A plausible customer record.
#[must_use]
pub fn customer_record(email: &str) -> Record {
    as_record(json!({
        "first_name": "Ada",
        "last_name": "Lovelace",
        "email": email,
    }))
}

/// A processing context for tests.
#[must_use]
pub fn test_context(pipeline_id: &str) -> DataProcessingContext {
    DataProcessingContext::new("test-tenant", pipeline_id, "test-source")
        .with_correlation_id("corr_test")
}

/// A three-stage ingest → validate → transform product pipeline.
#[must_use]
pub fn standard_product_pipeline(id: &str) -> Pipeline {
    let mut mappings = HashMap::new();
    mappings.insert("Product Name".to_string(), "name".to_string());

    Pipeline::new(id, "Standard product pipeline")
        .with_validation_rule(ValidationRule::required("sku"))
        .with_validation_rule(ValidationRule::typed("price", FieldType::Number))
        .with_stage(StageConfig::new(
            "ingest",
            StageParams::Ingestion {
                field_mappings: mappings,
                required_fields: vec!["sku".to_string()],
            },
        ))
        .with_stage(
            StageConfig::new(
                "validate",
                StageParams::SchemaValidation {
                    rules: vec![
                        ValidationRule::required("sku"),
                        ValidationRule::typed("price", FieldType::Number),
                    ],
                    auto_correct: true,
                },
            )
            .with_dependency("ingest"),
        )
        .with_stage(
            StageConfig::new(
                "transform",
                StageParams::DataTransformation {
                    transformations: vec![TransformationStep::expression(
                        "price_with_tax",
                        "round(input.price * 1.2, 2)",
                    )],
                },
            )
            .with_dependency("validate"),
        )
}
