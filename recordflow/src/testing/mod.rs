//! Testing utilities for recordflow pipelines.
//!
//! This module provides:
//! - Record and pipeline fixtures
//! - Mock collaborators (enrichment sources, custom logic, platform
//!   operations, AI diagnostics)

mod fixtures;
mod mocks;

pub use fixtures::{
    customer_record, order_record, product_record, standard_product_pipeline, test_context,
};
pub use mocks::{
    MockAiDiagnostics, MockCustomLogic, MockEnrichmentSource, MockPlatformOperation,
};
