//! Transformation rules and reusable templates layered on the evaluator.

mod engine;
mod template;

pub use engine::{RuleEngine, TransformationRule};
pub use template::{TemplateRegistry, TemplateResult, TransformationTemplate};
