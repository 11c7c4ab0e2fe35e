//! Stage implementations and their collaborator traits.
//!
//! Each stage consumes a batch of records and produces a [`StageOutcome`];
//! the executor wraps outcomes into [`super::StageExecutionResult`]s and
//! applies timeout, retry and error-handling policy around them.

mod custom;
mod enrichment;
mod ingestion;
mod quality;
mod routing;
mod transform;
mod validation;

pub use quality::{QualityBand, QualityDistribution};

pub(crate) use custom::run_custom_logic;
pub(crate) use enrichment::run_enrichment;
pub(crate) use ingestion::run_ingestion;
pub(crate) use quality::run_quality_scoring;
pub(crate) use routing::run_routing;
pub(crate) use transform::run_transformation;
pub(crate) use validation::run_schema_validation;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::context::DataProcessingContext;
use super::result::{ProcessingError, ProcessingWarning};
use super::Record;
use crate::errors::RecordflowError;
use crate::rules::RuleEngine;

/// Supplies supplementary fields for enrichment stages.
///
/// Implementations wrap an external API, an internal store or a cache;
/// failures degrade to warnings on the stage, never hard failures.
#[async_trait]
pub trait EnrichmentSource: Send + Sync {
    /// Fetches supplementary fields for one record.
    async fn fetch(&self, record: &Record) -> Result<Record, RecordflowError>;
}

/// Externally supplied handler backing custom-logic stages.
///
/// Any returned error becomes a stage-level fatal error.
#[async_trait]
pub trait CustomLogic: Send + Sync {
    /// Processes the whole batch.
    async fn process(
        &self,
        records: Vec<Record>,
        ctx: &DataProcessingContext,
    ) -> Result<Vec<Record>, RecordflowError>;
}

/// Shared services stages draw on: the rule engine plus registered
/// enrichment sources and custom handlers.
#[derive(Clone)]
pub struct StageServices {
    engine: Arc<RuleEngine>,
    enrichment_sources: Arc<DashMap<String, Arc<dyn EnrichmentSource>>>,
    custom_handlers: Arc<DashMap<String, Arc<dyn CustomLogic>>>,
}

impl std::fmt::Debug for StageServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageServices")
            .field("enrichment_sources", &self.enrichment_sources.len())
            .field("custom_handlers", &self.custom_handlers.len())
            .finish_non_exhaustive()
    }
}

impl Default for StageServices {
    fn default() -> Self {
        Self::new(Arc::new(RuleEngine::new()))
    }
}

impl StageServices {
    /// Creates services around an existing rule engine.
    #[must_use]
    pub fn new(engine: Arc<RuleEngine>) -> Self {
        Self {
            engine,
            enrichment_sources: Arc::new(DashMap::new()),
            custom_handlers: Arc::new(DashMap::new()),
        }
    }

    /// Returns the rule engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<RuleEngine> {
        &self.engine
    }

    /// Registers an enrichment source under an id.
    pub fn register_enrichment_source(
        &self,
        id: impl Into<String>,
        source: Arc<dyn EnrichmentSource>,
    ) {
        self.enrichment_sources.insert(id.into(), source);
    }

    /// Returns an enrichment source by id.
    #[must_use]
    pub fn enrichment_source(&self, id: &str) -> Option<Arc<dyn EnrichmentSource>> {
        self.enrichment_sources.get(id).map(|e| Arc::clone(&e))
    }

    /// Registers a custom-logic handler under an id.
    pub fn register_custom_handler(&self, id: impl Into<String>, handler: Arc<dyn CustomLogic>) {
        self.custom_handlers.insert(id.into(), handler);
    }

    /// Returns a custom-logic handler by id.
    #[must_use]
    pub fn custom_handler(&self, id: &str) -> Option<Arc<dyn CustomLogic>> {
        self.custom_handlers.get(id).map(|e| Arc::clone(&e))
    }
}

/// What one stage run produced, before policy is applied.
#[derive(Debug, Default)]
pub(crate) struct StageOutcome {
    /// The surviving records.
    pub output: Vec<Record>,
    /// Record-level errors (failed records are dropped from `output`).
    pub errors: Vec<ProcessingError>,
    /// Non-fatal warnings.
    pub warnings: Vec<ProcessingWarning>,
    /// Stage-specific metadata surfaced on the stage result.
    pub metadata: HashMap<String, Value>,
    /// Destination → records, populated by routing stages.
    pub destinations: HashMap<String, Vec<Record>>,
    /// Records that received enrichment fields.
    pub enriched: usize,
    /// Records with at least one transformation applied.
    pub transformed: usize,
    /// Stage-level fatal error, set by custom-logic failures and missing
    /// collaborators.
    pub fatal: Option<String>,
}

impl StageOutcome {
    pub(crate) fn passthrough(output: Vec<Record>) -> Self {
        Self {
            output,
            ..Self::default()
        }
    }

    pub(crate) fn fatal(message: impl Into<String>) -> Self {
        Self {
            fatal: Some(message.into()),
            ..Self::default()
        }
    }
}
