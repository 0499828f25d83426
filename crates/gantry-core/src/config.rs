//! Service configuration loading and size-unit parsing.
//!
//! Configuration is a TOML document mapping model ids to their on-disk
//! location and format, plus the cache sizing section. Model paths are
//! resolved relative to the config file's directory.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::cache::{CacheSettings, CacheSizing};

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading the config file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A size string did not match the expected human-unit format.
    #[error("Invalid size format: '{0}'. Expected format: '1GB', '100MB', etc.")]
    InvalidSizeFormat(String),

    /// Configuration values are inconsistent.
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Per-model configuration entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    /// Path to the serialized artifact, absolute or relative to the config
    /// file's directory.
    pub path: PathBuf,

    /// Artifact format tag, resolved to a loader at request time.
    #[serde(rename = "type")]
    pub format: String,

    /// Model version string.
    #[serde(default = "default_version")]
    pub version: String,

    /// Expected memory footprint, informational ("750MB"). The cache accounts
    /// the loader's actual report, not this estimate.
    #[serde(default)]
    pub memory_estimate: Option<String>,

    /// Whether to load this model eagerly at startup.
    #[serde(default)]
    pub preload: bool,

    /// JSON schema describing the model's inputs.
    #[serde(default)]
    pub input_schema: Option<serde_json::Value>,

    /// JSON schema describing the model's outputs.
    #[serde(default)]
    pub output_schema: Option<serde_json::Value>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Root configuration: model catalog plus cache sizing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Configured models by id.
    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,

    /// Cache sizing and sweep settings.
    #[serde(default)]
    pub cache: CacheSettings,
}

impl Config {
    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError::Parse` on malformed TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Loads configuration from a TOML file and resolves relative model
    /// paths against the file's directory.
    ///
    /// # Errors
    /// Returns `ConfigError::Io` if the file cannot be read and
    /// `ConfigError::Parse` on malformed TOML.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)?;

        if let Some(config_dir) = path.parent() {
            for model in config.models.values_mut() {
                if model.path.is_relative() {
                    model.path = config_dir.join(&model.path);
                }
            }
        }
        Ok(config)
    }

    /// Validates the configuration and resolves the cache byte budgets.
    ///
    /// # Errors
    /// Returns `ConfigError` if any size string is malformed or the cache
    /// section is inconsistent.
    pub fn validate(&self) -> Result<CacheSizing, ConfigError> {
        for (id, model) in &self.models {
            if let Some(estimate) = &model.memory_estimate {
                parse_size(estimate).map_err(|_| {
                    ConfigError::Validation(format!(
                        "models.{id}.memory_estimate: invalid size '{estimate}'"
                    ))
                })?;
            }
        }
        self.cache.resolve()
    }

    /// Looks up the configuration entry for a model id.
    #[must_use]
    pub fn model(&self, id: &str) -> Option<&ModelConfig> {
        self.models.get(id)
    }
}

const SIZE_UNITS: [(&str, u64); 5] = [
    ("B", 1),
    ("KB", 1024),
    ("MB", 1024 * 1024),
    ("GB", 1024 * 1024 * 1024),
    ("TB", 1024_u64.pow(4)),
];

/// Converts a human-unit size string ("1GB", "512 MB", "1.5gb") to bytes.
///
/// Units use binary multipliers (1KB = 1024B). The unit is required; a bare
/// number is rejected.
///
/// # Errors
/// Returns `ConfigError::InvalidSizeFormat` if the input does not match
/// `<number><optional whitespace><unit>`.
pub fn parse_size(size: &str) -> Result<u64, ConfigError> {
    let normalized = size.trim().to_uppercase();
    let invalid = || ConfigError::InvalidSizeFormat(size.to_string());

    let number_end = normalized
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .ok_or_else(invalid)?;
    let (number_part, unit_part) = normalized.split_at(number_end);
    let unit_part = unit_part.trim_start();

    let multiplier = SIZE_UNITS
        .iter()
        .find(|(unit, _)| *unit == unit_part)
        .map(|(_, multiplier)| *multiplier)
        .ok_or_else(invalid)?;

    let value: f64 = number_part.parse().map_err(|_| invalid())?;
    if !value.is_finite() {
        return Err(invalid());
    }
    Ok((value * multiplier as f64) as u64)
}

/// Formats a byte count in the largest binary unit that keeps the value
/// readable ("1.5GB", "512MB", "0B").
#[must_use]
pub fn format_size(bytes: u64) -> String {
    let (unit, multiplier) = SIZE_UNITS
        .iter()
        .rev()
        .find(|(_, multiplier)| bytes >= *multiplier)
        .unwrap_or(&SIZE_UNITS[0]);

    let value = bytes as f64 / *multiplier as f64;
    if value.fract() < 0.05 {
        format!("{value:.0}{unit}")
    } else {
        format!("{value:.1}{unit}")
    }
}
