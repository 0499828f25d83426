//! Memory-bounded model serving core for Gantry.
//!
//! This crate keeps a bounded working set of loaded models resident under a
//! strict byte budget and coalesces concurrent loads of the same model.
//!
//! # Components
//!
//! - [`CacheStore`]: byte-budget key/value store with LRU eviction
//! - [`ModelManager`]: cache-or-load orchestration and predictions
//! - [`LoaderRegistry`]: per-format loader capabilities
//! - [`CacheSweeper`]: proactive cleanup against the soft limit
//!
//! The HTTP surface, metrics backends, and real per-format loaders live
//! outside this crate; loaders are registered through the
//! [`gantry_abstraction::ModelLoader`] capability trait.

pub mod cache;
pub mod config;
pub mod error;
pub mod manager;
pub mod registry;
pub mod tasks;
pub mod types;

use async_trait::async_trait;
use gantry_abstraction::{
    LoaderError, ModelHandle, ModelLoader, PredictionOutputs, PredictionRequest,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub use cache::{CacheError, CacheSettings, CacheSizing, CacheStats, CacheStore};
pub use config::{format_size, parse_size, Config, ConfigError, ModelConfig};
pub use error::{GantryError, Result};
pub use manager::{ManagerError, ModelManager};
pub use registry::{LoaderRegistry, ModelFormat};
pub use tasks::CacheSweeper;
pub use types::{ModelInfo, ModelSummary, SystemStatus};

/// Artifact produced by [`MockLoader`].
#[derive(Debug)]
pub struct MockArtifact {
    /// Path the artifact was "loaded" from.
    pub path: PathBuf,
    /// Reported memory footprint in bytes.
    pub size_bytes: u64,
}

/// A mock implementation of the `ModelLoader` capability for tests and
/// development.
///
/// Loads never touch the filesystem; the loader fabricates an artifact with
/// a configurable reported size, optional artificial latency, and optional
/// forced failures, and counts how many loads were attempted.
#[derive(Debug)]
pub struct MockLoader {
    size_bytes: u64,
    load_delay: Option<Duration>,
    remaining_failures: AtomicUsize,
    load_calls: AtomicUsize,
}

impl MockLoader {
    /// Creates a loader whose artifacts report the given size.
    #[must_use]
    pub fn new(size_bytes: u64) -> Self {
        Self {
            size_bytes,
            load_delay: None,
            remaining_failures: AtomicUsize::new(0),
            load_calls: AtomicUsize::new(0),
        }
    }

    /// Adds artificial latency to every load.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    /// Makes the next `n` loads fail before loads start succeeding again.
    #[must_use]
    pub fn fail_times(self, n: usize) -> Self {
        self.remaining_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Makes every load fail.
    #[must_use]
    pub fn failing(self) -> Self {
        self.fail_times(usize::MAX)
    }

    /// Number of load attempts observed so far.
    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelLoader for MockLoader {
    async fn load(&self, path: &Path) -> std::result::Result<ModelHandle, LoaderError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        debug!(path = %path.display(), "MockLoader loading artifact");

        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }

        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != usize::MAX {
                self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(LoaderError::LoadFailed(format!(
                "mock load failure for {}",
                path.display()
            )));
        }

        Ok(Arc::new(MockArtifact {
            path: path.to_path_buf(),
            size_bytes: self.size_bytes,
        }))
    }

    fn memory_usage(&self, handle: &ModelHandle) -> u64 {
        handle
            .downcast_ref::<MockArtifact>()
            .map_or(0, |artifact| artifact.size_bytes)
    }

    async fn predict(
        &self,
        handle: &ModelHandle,
        request: &PredictionRequest,
    ) -> std::result::Result<PredictionOutputs, LoaderError> {
        let artifact = handle.downcast_ref::<MockArtifact>().ok_or_else(|| {
            LoaderError::PredictionFailed("handle was not produced by this loader".to_string())
        })?;

        debug!(path = %artifact.path.display(), "MockLoader running prediction");
        let mut outputs = PredictionOutputs::new();
        outputs.insert(
            "echo".to_string(),
            serde_json::Value::Object(request.inputs.clone()),
        );
        if !request.parameters.is_empty() {
            outputs.insert(
                "parameters".to_string(),
                serde_json::Value::Object(request.parameters.clone()),
            );
        }
        Ok(outputs)
    }
}
