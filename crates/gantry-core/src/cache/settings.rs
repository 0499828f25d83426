//! Cache sizing and sweep configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{parse_size, ConfigError};

/// Cache section of the service configuration.
///
/// Sizes are given in human units ("1GB", "512MB") and resolved to bytes
/// with [`CacheSettings::resolve`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheSettings {
    /// Hard byte budget for resident models.
    pub max_memory: String,

    /// Advisory soft limit for proactive cleanup. Defaults to 85% of
    /// `max_memory` when omitted.
    #[serde(default)]
    pub soft_limit: Option<String>,

    /// Seconds of inactivity before the sweeper drops a model (default: 3600).
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// How often the background sweeper runs, in seconds (default: 60).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_memory: "1GB".to_string(),
            soft_limit: None,
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CacheSettings {
    /// Resolves the human-unit size strings into byte values.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidSizeFormat` for malformed sizes and
    /// `ConfigError::Validation` for inconsistent or zero values.
    pub fn resolve(&self) -> Result<CacheSizing, ConfigError> {
        let max_size_bytes = parse_size(&self.max_memory)?;
        if max_size_bytes == 0 {
            return Err(ConfigError::Validation(
                "cache.max_memory must be greater than 0".to_string(),
            ));
        }

        let soft_limit_bytes = match &self.soft_limit {
            Some(size) => parse_size(size)?,
            None => max_size_bytes / 100 * 85,
        };
        if soft_limit_bytes > max_size_bytes {
            return Err(ConfigError::Validation(format!(
                "cache.soft_limit ({soft_limit_bytes} bytes) exceeds cache.max_memory ({max_size_bytes} bytes)"
            )));
        }

        if self.ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "cache.ttl_secs must be greater than 0".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "cache.sweep_interval_secs must be greater than 0".to_string(),
            ));
        }

        Ok(CacheSizing { max_size_bytes, soft_limit_bytes })
    }

    /// Inactivity horizon as a Duration.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Sweep interval as a Duration.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Resolved byte budgets for the cache store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSizing {
    /// Hard limit, immutable after construction.
    pub max_size_bytes: u64,
    /// Advisory threshold for the background sweeper.
    pub soft_limit_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = CacheSettings::default();
        assert_eq!(settings.max_memory, "1GB");
        assert_eq!(settings.soft_limit, None);
        assert_eq!(settings.ttl_secs, 3600);
        assert_eq!(settings.sweep_interval_secs, 60);
        assert_eq!(settings.ttl(), Duration::from_secs(3600));
        assert_eq!(settings.sweep_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_resolve_explicit_soft_limit() {
        let settings = CacheSettings {
            max_memory: "1GB".to_string(),
            soft_limit: Some("800MB".to_string()),
            ..CacheSettings::default()
        };
        let sizing = settings.resolve().unwrap();
        assert_eq!(sizing.max_size_bytes, 1024 * 1024 * 1024);
        assert_eq!(sizing.soft_limit_bytes, 800 * 1024 * 1024);
    }

    #[test]
    fn test_resolve_default_soft_limit() {
        let settings = CacheSettings {
            max_memory: "1000B".to_string(),
            ..CacheSettings::default()
        };
        let sizing = settings.resolve().unwrap();
        assert_eq!(sizing.soft_limit_bytes, 850);
    }

    #[test]
    fn test_resolve_rejects_soft_limit_above_max() {
        let settings = CacheSettings {
            max_memory: "100MB".to_string(),
            soft_limit: Some("1GB".to_string()),
            ..CacheSettings::default()
        };
        assert!(matches!(
            settings.resolve(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_resolve_rejects_malformed_size() {
        let settings = CacheSettings {
            max_memory: "lots".to_string(),
            ..CacheSettings::default()
        };
        assert!(matches!(
            settings.resolve(),
            Err(ConfigError::InvalidSizeFormat(_))
        ));
    }

    #[test]
    fn test_resolve_rejects_zero_intervals() {
        let settings = CacheSettings {
            max_memory: "1GB".to_string(),
            ttl_secs: 0,
            ..CacheSettings::default()
        };
        assert!(settings.resolve().is_err());

        let settings = CacheSettings {
            max_memory: "1GB".to_string(),
            sweep_interval_secs: 0,
            ..CacheSettings::default()
        };
        assert!(settings.resolve().is_err());
    }
}
