//! Pipeline cache over a persistence collaborator.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::config::Pipeline;
use crate::errors::RecordflowError;

/// Persistence collaborator for pipeline configuration.
///
/// The engine only needs load-all-active and upsert semantics; schema and
/// storage are the caller's concern.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Loads every enabled pipeline.
    async fn load_active(&self) -> Result<Vec<Pipeline>, RecordflowError>;

    /// Loads one pipeline by id, enabled or not.
    async fn load(&self, id: &str) -> Result<Option<Pipeline>, RecordflowError>;

    /// Inserts or replaces a pipeline.
    async fn save(&self, pipeline: &Pipeline) -> Result<(), RecordflowError>;
}

/// Map-backed store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryPipelineStore {
    pipelines: RwLock<HashMap<String, Pipeline>>,
}

impl InMemoryPipelineStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PipelineStore for InMemoryPipelineStore {
    async fn load_active(&self) -> Result<Vec<Pipeline>, RecordflowError> {
        let mut active: Vec<Pipeline> = self
            .pipelines
            .read()
            .values()
            .filter(|p| p.enabled)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(active)
    }

    async fn load(&self, id: &str) -> Result<Option<Pipeline>, RecordflowError> {
        Ok(self.pipelines.read().get(id).cloned())
    }

    async fn save(&self, pipeline: &Pipeline) -> Result<(), RecordflowError> {
        self.pipelines
            .write()
            .insert(pipeline.id.clone(), pipeline.clone());
        Ok(())
    }
}

/// Caches enabled pipelines by id, rehydrating from the store.
///
/// `upsert` validates before persisting, bumps the version and refreshes the
/// cache entry so stale configuration is never served.
pub struct PipelineRegistry {
    store: Arc<dyn PipelineStore>,
    cache: DashMap<String, Arc<Pipeline>>,
}

impl std::fmt::Debug for PipelineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRegistry")
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl PipelineRegistry {
    /// Creates a registry over a store.
    #[must_use]
    pub fn new(store: Arc<dyn PipelineStore>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
        }
    }

    /// Loads every enabled pipeline into the cache. Returns how many were
    /// loaded.
    ///
    /// # Errors
    ///
    /// Returns the store's error unchanged.
    pub async fn load_active(&self) -> Result<usize, RecordflowError> {
        let active = self.store.load_active().await?;
        let count = active.len();
        self.cache.clear();
        for pipeline in active {
            self.cache.insert(pipeline.id.clone(), Arc::new(pipeline));
        }
        info!(count, "loaded active pipelines");
        Ok(count)
    }

    /// Returns a pipeline, from cache when possible.
    ///
    /// Disabled pipelines are never cached and resolve to `None`.
    ///
    /// # Errors
    ///
    /// Returns the store's error unchanged on a cache miss.
    pub async fn get(&self, id: &str) -> Result<Option<Arc<Pipeline>>, RecordflowError> {
        if let Some(cached) = self.cache.get(id) {
            return Ok(Some(Arc::clone(&cached)));
        }
        let Some(pipeline) = self.store.load(id).await? else {
            return Ok(None);
        };
        if !pipeline.enabled {
            return Ok(None);
        }
        let pipeline = Arc::new(pipeline);
        self.cache.insert(id.to_string(), Arc::clone(&pipeline));
        debug!(pipeline_id = %id, "cached pipeline on demand");
        Ok(Some(pipeline))
    }

    /// Validates and persists a pipeline, bumping its version past any
    /// stored one and refreshing the cache entry.
    ///
    /// # Errors
    ///
    /// Returns validation errors before anything is persisted, and store
    /// errors unchanged.
    pub async fn upsert(&self, mut pipeline: Pipeline) -> Result<u64, RecordflowError> {
        pipeline.validate()?;

        if let Some(existing) = self.store.load(&pipeline.id).await? {
            pipeline.version = existing.version + 1;
        }
        self.store.save(&pipeline).await?;

        let version = pipeline.version;
        if pipeline.enabled {
            self.cache
                .insert(pipeline.id.clone(), Arc::new(pipeline.clone()));
        } else {
            self.cache.remove(&pipeline.id);
        }
        info!(pipeline_id = %pipeline.id, version, "pipeline upserted");
        Ok(version)
    }

    /// Ids currently cached, sorted.
    #[must_use]
    pub fn cached_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.cache.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::config::StageParams;
    use crate::pipeline::StageConfig;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap as StdHashMap;

    fn pipeline(id: &str) -> Pipeline {
        Pipeline::new(id, id).with_stage(StageConfig::new(
            "ingest",
            StageParams::Ingestion {
                field_mappings: StdHashMap::new(),
                required_fields: Vec::new(),
            },
        ))
    }

    #[tokio::test]
    async fn test_upsert_bumps_version_and_caches() {
        let store = Arc::new(InMemoryPipelineStore::new());
        let registry = PipelineRegistry::new(store);

        let v1 = registry.upsert(pipeline("p1")).await.unwrap();
        assert_eq!(v1, 1);
        let v2 = registry.upsert(pipeline("p1")).await.unwrap();
        assert_eq!(v2, 2);

        let cached = registry.get("p1").await.unwrap().unwrap();
        assert_eq!(cached.version, 2);
    }

    #[tokio::test]
    async fn test_upsert_rejects_invalid_pipeline() {
        let store = Arc::new(InMemoryPipelineStore::new());
        let registry = PipelineRegistry::new(store.clone());

        let invalid = Pipeline::new("bad", "Bad");
        assert!(registry.upsert(invalid).await.is_err());
        assert!(store.load("bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disabling_evicts_from_cache() {
        let store = Arc::new(InMemoryPipelineStore::new());
        let registry = PipelineRegistry::new(store);

        registry.upsert(pipeline("p1")).await.unwrap();
        assert_eq!(registry.cached_ids(), vec!["p1"]);

        let mut disabled = pipeline("p1");
        disabled.enabled = false;
        registry.upsert(disabled).await.unwrap();
        assert!(registry.cached_ids().is_empty());
        assert!(registry.get("p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_active_skips_disabled() {
        let store = Arc::new(InMemoryPipelineStore::new());
        let mut off = pipeline("off");
        off.enabled = false;
        store.save(&pipeline("on")).await.unwrap();
        store.save(&off).await.unwrap();

        let registry = PipelineRegistry::new(store);
        let count = registry.load_active().await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(registry.cached_ids(), vec!["on"]);
    }
}
