//! Reporting types assembled by the manager for the API layer.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Model metadata, computed fresh per query from configuration, the loader's
/// current memory report, and the cache's last-access timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    /// Configured model version.
    pub version: String,
    /// Artifact format tag.
    pub format: String,
    /// JSON schema describing the model's inputs.
    pub input_schema: serde_json::Value,
    /// JSON schema describing the model's outputs.
    pub output_schema: serde_json::Value,
    /// Resident memory as currently reported by the loader, in bytes.
    pub memory_usage: u64,
    /// When the model was last served from cache, if resident.
    pub last_used: Option<DateTime<Utc>>,
}

/// Summary line for the model listing.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    /// Model id from configuration.
    pub model_id: String,
    /// "loaded" or "unloaded".
    pub status: String,
    /// Artifact format tag.
    pub format: String,
    /// Cached size in bytes, 0 when not resident.
    pub memory_usage_bytes: u64,
    /// When the model was last served from cache, if resident.
    pub last_used: Option<DateTime<Utc>>,
    /// Whether the model is currently resident.
    pub is_loaded: bool,
}

/// System-wide status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    /// Number of models currently resident in the cache.
    pub active_models: usize,
    /// Number of models in the configuration catalog.
    pub configured_models: usize,
    /// Sum of resident model sizes in bytes.
    pub total_memory_usage_bytes: u64,
    /// Resident bytes over the hard budget.
    pub cache_utilization: f64,
    /// Whether the service considers itself healthy.
    pub healthy: bool,
    /// Seconds since the manager was constructed.
    pub uptime_secs: u64,
}
