//! Identifier generation for executions and correlation.

use uuid::Uuid;

/// Generates a random v4 UUID string.
#[must_use]
pub fn generate_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// Generates an execution id with a recognizable prefix.
#[must_use]
pub fn generate_execution_id() -> String {
    format!("exec_{}", Uuid::new_v4().simple())
}

/// Generates a correlation id with a recognizable prefix.
#[must_use]
pub fn generate_correlation_id() -> String {
    format!("corr_{}", Uuid::new_v4().simple())
}
