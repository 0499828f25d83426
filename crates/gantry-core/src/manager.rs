//! Model manager: cache-or-load orchestration with per-id load coalescing.

use gantry_abstraction::{
    LoaderError, ModelHandle, ModelLoader, PredictionRequest, PredictionResponse,
};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, CacheStats, CacheStore};
use crate::config::{Config, ConfigError, ModelConfig};
use crate::registry::LoaderRegistry;
use crate::types::{ModelInfo, ModelSummary, SystemStatus};

/// Errors surfaced by the model manager.
///
/// Clonable so a single load failure can be delivered to every caller that
/// joined the in-flight operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManagerError {
    /// The id has no entry in the model catalog.
    #[error("Model '{0}' is not configured")]
    ModelNotConfigured(String),

    /// No loader is registered for the model's declared format.
    #[error("No loader available for model type: {0}")]
    LoaderUnavailable(String),

    /// The model could not be served (prediction path).
    #[error("Model '{0}' not found")]
    ModelNotFound(String),

    /// A loader capability failed (load or predict).
    #[error(transparent)]
    Loader(#[from] LoaderError),

    /// The cache rejected the loaded model.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

type LoadResult = Result<ModelHandle, ManagerError>;

/// Outcome of consulting the in-flight registry: either this caller leads
/// the load, or it joins one already in progress.
enum Flight {
    Lead(broadcast::Sender<LoadResult>),
    Join(broadcast::Receiver<LoadResult>),
}

/// Orchestrates model residency: resolves ids to loaders via configuration,
/// coalesces concurrent loads per id, keeps results in the byte-bounded
/// cache, and serves predictions.
///
/// Construct one explicitly and share it (`Arc<ModelManager>`); there is no
/// global instance.
pub struct ModelManager {
    config: Config,
    cache: Arc<CacheStore>,
    loaders: LoaderRegistry,
    /// Single-flight registry: one sender per id currently being loaded.
    /// Joiners subscribe; the winner publishes the shared outcome.
    in_flight: Mutex<HashMap<String, broadcast::Sender<LoadResult>>>,
    started_at: Instant,
}

impl ModelManager {
    /// Creates a manager from validated configuration and a loader registry.
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration fails validation.
    pub fn new(config: Config, loaders: LoaderRegistry) -> Result<Self, ConfigError> {
        let sizing = config.validate()?;
        let cache = Arc::new(CacheStore::new(
            sizing.max_size_bytes,
            Some(sizing.soft_limit_bytes),
        ));
        info!(
            configured_models = config.models.len(),
            max_size_bytes = sizing.max_size_bytes,
            "Initialized model manager"
        );
        Ok(Self {
            config,
            cache,
            loaders,
            in_flight: Mutex::new(HashMap::new()),
            started_at: Instant::now(),
        })
    }

    /// The cache store backing this manager (shared with the sweeper).
    #[must_use]
    pub fn cache(&self) -> Arc<CacheStore> {
        Arc::clone(&self.cache)
    }

    /// The configuration this manager was built from.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns a ready-to-use handle for the model, loading it on a miss.
    ///
    /// At most one load per id is in flight at any instant: concurrent
    /// callers for the same uncached id join the existing operation and
    /// receive its outcome, success or failure alike. Failures are not
    /// cached; the next call retries from scratch.
    ///
    /// # Errors
    /// `ModelNotConfigured`, `LoaderUnavailable`, or the load failure shared
    /// by every joined caller.
    pub async fn get_model(&self, model_id: &str) -> Result<ModelHandle, ManagerError> {
        if let Some(handle) = self.cache.get(model_id) {
            return Ok(handle);
        }

        let model_config = self
            .config
            .model(model_id)
            .ok_or_else(|| ManagerError::ModelNotConfigured(model_id.to_string()))?;
        let loader = self
            .loaders
            .resolve(&model_config.format)
            .ok_or_else(|| ManagerError::LoaderUnavailable(model_config.format.clone()))?;

        let flight = {
            let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
            match in_flight.entry(model_id.to_string()) {
                Entry::Occupied(entry) => Flight::Join(entry.get().subscribe()),
                Entry::Vacant(entry) => {
                    let (tx, _rx) = broadcast::channel(1);
                    entry.insert(tx.clone());
                    Flight::Lead(tx)
                }
            }
        };

        match flight {
            Flight::Join(mut rx) => {
                debug!(model_id = %model_id, "Joining in-flight load");
                rx.recv().await.unwrap_or_else(|_| {
                    // The winner went away without publishing; surface it as
                    // a failed load so the caller can retry.
                    Err(ManagerError::Loader(LoaderError::LoadFailed(format!(
                        "in-flight load for '{model_id}' was abandoned"
                    ))))
                })
            }
            Flight::Lead(tx) => {
                let result = self
                    .load_and_cache(model_id, model_config, loader.as_ref())
                    .await;
                self.in_flight
                    .lock()
                    .expect("in-flight lock poisoned")
                    .remove(model_id);
                // No receivers is fine: nobody joined this flight.
                let _ = tx.send(result.clone());
                result
            }
        }
    }

    /// Loads the model and inserts it into the cache under its id.
    ///
    /// Re-checks the cache first: the miss that started this flight may have
    /// been resolved by a flight that completed in between.
    async fn load_and_cache(
        &self,
        model_id: &str,
        model_config: &ModelConfig,
        loader: &dyn ModelLoader,
    ) -> LoadResult {
        if let Some(handle) = self.cache.get(model_id) {
            return Ok(handle);
        }

        info!(
            model_id = %model_id,
            path = %model_config.path.display(),
            format = %model_config.format,
            "Loading model"
        );
        let handle = loader.load(&model_config.path).await?;
        let memory_usage = loader.memory_usage(&handle);
        info!(model_id = %model_id, memory_usage, "Model loaded");

        self.cache.put(model_id, handle.clone(), memory_usage)?;
        Ok(handle)
    }

    /// Runs a prediction against the model, loading it if necessary.
    ///
    /// # Errors
    /// `ModelNotFound` for ids outside the catalog, `PredictionFailed` (via
    /// `Loader`) when inference fails, or any load error from `get_model`.
    pub async fn predict(
        &self,
        model_id: &str,
        request: &PredictionRequest,
    ) -> Result<PredictionResponse, ManagerError> {
        let handle = self.get_model(model_id).await.map_err(|err| match err {
            ManagerError::ModelNotConfigured(id) => ManagerError::ModelNotFound(id),
            other => other,
        })?;

        let model_config = self
            .config
            .model(model_id)
            .ok_or_else(|| ManagerError::ModelNotFound(model_id.to_string()))?;
        let loader = self
            .loaders
            .resolve(&model_config.format)
            .ok_or_else(|| ManagerError::LoaderUnavailable(model_config.format.clone()))?;

        debug!(model_id = %model_id, "Running prediction");
        let outputs = loader.predict(&handle, request).await?;
        Ok(PredictionResponse {
            model_id: model_id.to_string(),
            outputs,
            metadata: serde_json::Map::new(),
        })
    }

    /// Assembles model metadata, ensuring the model is loaded so the memory
    /// figure reflects the loader's current report.
    ///
    /// # Errors
    /// Same failure modes as `get_model`.
    pub async fn get_model_info(&self, model_id: &str) -> Result<ModelInfo, ManagerError> {
        let model_config = self
            .config
            .model(model_id)
            .ok_or_else(|| ManagerError::ModelNotConfigured(model_id.to_string()))?;

        let handle = self.get_model(model_id).await?;
        let loader = self
            .loaders
            .resolve(&model_config.format)
            .ok_or_else(|| ManagerError::LoaderUnavailable(model_config.format.clone()))?;

        Ok(ModelInfo {
            version: model_config.version.clone(),
            format: model_config.format.to_lowercase(),
            input_schema: model_config
                .input_schema
                .clone()
                .unwrap_or(serde_json::Value::Null),
            output_schema: model_config
                .output_schema
                .clone()
                .unwrap_or(serde_json::Value::Null),
            memory_usage: loader.memory_usage(&handle),
            last_used: self.cache.last_access_time(model_id),
        })
    }

    /// Summaries for every configured model, sorted by id.
    #[must_use]
    pub fn list_models(&self) -> Vec<ModelSummary> {
        let mut summaries: Vec<ModelSummary> = self
            .config
            .models
            .iter()
            .map(|(model_id, model_config)| {
                let resident = self.cache.peek(model_id);
                ModelSummary {
                    model_id: model_id.clone(),
                    status: if resident.is_some() { "loaded" } else { "unloaded" }.to_string(),
                    format: model_config.format.to_lowercase(),
                    memory_usage_bytes: resident.map_or(0, |(size, _)| size),
                    last_used: resident.map(|(_, last_used)| last_used),
                    is_loaded: resident.is_some(),
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        summaries
    }

    /// System-wide status snapshot.
    #[must_use]
    pub fn system_status(&self) -> SystemStatus {
        let stats = self.cache.stats();
        SystemStatus {
            active_models: stats.item_count,
            configured_models: self.config.models.len(),
            total_memory_usage_bytes: stats.current_size_bytes,
            cache_utilization: stats.utilization,
            healthy: true,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    /// Eagerly loads every model configured with `preload = true`, skipping
    /// individual failures. Returns the number of models loaded.
    pub async fn preload(&self) -> usize {
        let mut model_ids: Vec<&String> = self
            .config
            .models
            .iter()
            .filter(|(_, model_config)| model_config.preload)
            .map(|(model_id, _)| model_id)
            .collect();
        model_ids.sort();

        let mut loaded = 0;
        for model_id in model_ids {
            match self.get_model(model_id).await {
                Ok(_) => loaded += 1,
                Err(err) => {
                    warn!(model_id = %model_id, error = %err, "Preload failed");
                }
            }
        }
        loaded
    }

    /// Explicitly drops a model from the cache. Returns whether it was
    /// resident.
    pub fn unload_model(&self, model_id: &str) -> bool {
        let removed = self.cache.remove(model_id);
        if removed {
            info!(model_id = %model_id, "Unloaded model");
        }
        removed
    }

    /// Cache statistics pass-through for the API layer.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("configured_models", &self.config.models.len())
            .field("cache", &self.cache)
            .field("loaders", &self.loaders)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheSettings;
    use crate::registry::ModelFormat;
    use crate::MockLoader;
    use std::path::PathBuf;

    fn test_config(models: Vec<(&str, &str, bool)>) -> Config {
        let models = models
            .into_iter()
            .map(|(id, format, preload)| {
                (
                    id.to_string(),
                    ModelConfig {
                        path: PathBuf::from(format!("models/{id}.bin")),
                        format: format.to_string(),
                        version: "1.0.0".to_string(),
                        memory_estimate: None,
                        preload,
                        input_schema: None,
                        output_schema: None,
                    },
                )
            })
            .collect();
        Config {
            models,
            cache: CacheSettings {
                max_memory: "4KB".to_string(),
                soft_limit: None,
                ..CacheSettings::default()
            },
        }
    }

    fn test_manager(models: Vec<(&str, &str, bool)>, loader: Arc<MockLoader>) -> ModelManager {
        let registry = LoaderRegistry::new().with_loader(ModelFormat::Mock, loader);
        ModelManager::new(test_config(models), registry).unwrap()
    }

    #[tokio::test]
    async fn test_get_model_not_configured() {
        let manager = test_manager(vec![], Arc::new(MockLoader::new(1024)));
        let err = manager.get_model("ghost").await.unwrap_err();
        assert_eq!(err, ManagerError::ModelNotConfigured("ghost".to_string()));
    }

    #[tokio::test]
    async fn test_get_model_loader_unavailable() {
        let manager = test_manager(
            vec![("classifier", "tensorflow", false)],
            Arc::new(MockLoader::new(1024)),
        );
        let err = manager.get_model("classifier").await.unwrap_err();
        assert_eq!(
            err,
            ManagerError::LoaderUnavailable("tensorflow".to_string())
        );
    }

    #[tokio::test]
    async fn test_get_model_loads_once_then_hits_cache() {
        let loader = Arc::new(MockLoader::new(1024));
        let manager = test_manager(vec![("m", "mock", false)], Arc::clone(&loader));

        let first = manager.get_model("m").await.unwrap();
        let second = manager.get_model("m").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.load_calls(), 1);
        assert_eq!(manager.cache_stats().item_count, 1);
    }

    #[tokio::test]
    async fn test_predict_maps_unconfigured_to_not_found() {
        let manager = test_manager(vec![], Arc::new(MockLoader::new(1024)));
        let err = manager
            .predict("ghost", &PredictionRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err, ManagerError::ModelNotFound("ghost".to_string()));
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let loader = Arc::new(MockLoader::new(1024).fail_times(1));
        let manager = test_manager(vec![("m", "mock", false)], Arc::clone(&loader));

        let err = manager.get_model("m").await.unwrap_err();
        assert!(matches!(
            err,
            ManagerError::Loader(LoaderError::LoadFailed(_))
        ));
        assert_eq!(manager.cache_stats().item_count, 0);

        // The next call retries from scratch and succeeds.
        manager.get_model("m").await.unwrap();
        assert_eq!(loader.load_calls(), 2);
    }

    #[tokio::test]
    async fn test_model_too_large_for_cache() {
        // 8KB model against a 4KB budget.
        let loader = Arc::new(MockLoader::new(8192));
        let manager = test_manager(vec![("big", "mock", false)], loader);

        let err = manager.get_model("big").await.unwrap_err();
        assert!(matches!(
            err,
            ManagerError::Cache(CacheError::EntryTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_unload_model() {
        let manager = test_manager(vec![("m", "mock", false)], Arc::new(MockLoader::new(64)));
        manager.get_model("m").await.unwrap();

        assert!(manager.unload_model("m"));
        assert!(!manager.unload_model("m"));
        assert_eq!(manager.cache_stats().item_count, 0);
    }
}
