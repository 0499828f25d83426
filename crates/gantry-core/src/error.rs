//! Error types for Gantry Core.

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::manager::ManagerError;
use gantry_abstraction::LoaderError;
use thiserror::Error;

/// Core error type for Gantry operations.
#[derive(Error, Debug)]
pub enum GantryError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Cache store errors
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Loader capability errors
    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    /// Model serving errors
    #[error("Serving error: {0}")]
    Manager(#[from] ManagerError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Gantry operations.
pub type Result<T> = std::result::Result<T, GantryError>;
