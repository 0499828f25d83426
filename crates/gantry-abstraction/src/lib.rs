//! Loader abstraction layer for Gantry.
//!
//! This crate defines the capability interface between the serving core and
//! the per-format artifact loaders, along with the request/response types
//! exchanged across that boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Opaque handle to a loaded model artifact.
///
/// A handle is meaningful only to the loader that produced it; the serving
/// core treats it as an opaque, cheaply clonable reference. Dropping the
/// cache's copy (on eviction) does not destroy the underlying resource while
/// other callers still hold clones.
pub type ModelHandle = Arc<dyn Any + Send + Sync>;

/// Represents an error that can occur inside a model loader.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoaderError {
    /// Loading the artifact from storage failed (missing file, corrupt
    /// serialization, out of memory in the loader, ...).
    #[error("Load failed: {0}")]
    LoadFailed(String),

    /// Running inference against a loaded artifact failed.
    #[error("Prediction failed: {0}")]
    PredictionFailed(String),
}

/// A JSON object passed to or returned from a loader's predict capability.
pub type PredictionOutputs = serde_json::Map<String, serde_json::Value>;

/// Input payload for a prediction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictionRequest {
    /// Model input data, keyed by input name.
    pub inputs: serde_json::Map<String, serde_json::Value>,

    /// Optional inference parameters (temperature, batch size, ...).
    /// Interpretation is up to the loader; unknown keys are ignored.
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl PredictionRequest {
    /// Creates a request carrying only inputs.
    #[must_use]
    pub fn new(inputs: serde_json::Map<String, serde_json::Value>) -> Self {
        Self { inputs, parameters: serde_json::Map::new() }
    }

    /// Sets the inference parameters for this request.
    #[must_use]
    pub fn with_parameters(
        mut self,
        parameters: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Result of a prediction, as handed back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    /// ID of the model that produced the outputs.
    pub model_id: String,

    /// Model outputs, keyed by output name.
    pub outputs: PredictionOutputs,

    /// Additional metadata the loader chose to attach.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Capability interface implemented once per artifact format.
///
/// Loaders are the only components that understand what a handle actually
/// contains. All implementations must be `Send + Sync`; a single loader
/// instance serves every model of its format concurrently.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// Loads a model artifact from the given path.
    ///
    /// # Errors
    /// Returns `LoaderError::LoadFailed` if the artifact cannot be read or
    /// deserialized.
    async fn load(&self, path: &Path) -> Result<ModelHandle, LoaderError>;

    /// Reports the resident memory footprint of a loaded artifact, in bytes.
    ///
    /// This figure is what the cache accounts against its byte budget, so it
    /// should reflect the dominant allocations (weights, buffers), not every
    /// last bookkeeping byte.
    fn memory_usage(&self, handle: &ModelHandle) -> u64;

    /// Runs inference against a loaded artifact.
    ///
    /// # Errors
    /// Returns `LoaderError::PredictionFailed` if inference fails, including
    /// when the handle was not produced by this loader.
    async fn predict(
        &self,
        handle: &ModelHandle,
        request: &PredictionRequest,
    ) -> Result<PredictionOutputs, LoaderError>;
}
