//! Loader registry: maps artifact format tags to loader capabilities.

use gantry_abstraction::ModelLoader;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Artifact format enumeration.
///
/// The set of formats is closed; loaders for each format are registered by
/// the embedding application. Unknown configuration tags fail at lookup time,
/// not at config-load time, so a catalog can mention formats a given
/// deployment does not serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFormat {
    /// TorchScript artifacts.
    Pytorch,
    /// TensorFlow SavedModel artifacts.
    Tensorflow,
    /// In-memory mock artifacts for tests and development.
    Mock,
}

impl ModelFormat {
    /// Canonical lowercase tag for this format.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pytorch => "pytorch",
            Self::Tensorflow => "tensorflow",
            Self::Mock => "mock",
        }
    }
}

impl std::fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pytorch" | "torch" | "torchscript" => Ok(Self::Pytorch),
            "tensorflow" | "tf" | "savedmodel" => Ok(Self::Tensorflow),
            "mock" => Ok(Self::Mock),
            _ => Err(()),
        }
    }
}

/// Registry of loader capabilities, one per artifact format.
#[derive(Default, Clone)]
pub struct LoaderRegistry {
    loaders: HashMap<ModelFormat, Arc<dyn ModelLoader>>,
}

impl LoaderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { loaders: HashMap::new() }
    }

    /// Registers a loader for a format, replacing any previous registration.
    pub fn register(&mut self, format: ModelFormat, loader: Arc<dyn ModelLoader>) {
        debug!(format = %format, "Registered model loader");
        self.loaders.insert(format, loader);
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with_loader(mut self, format: ModelFormat, loader: Arc<dyn ModelLoader>) -> Self {
        self.register(format, loader);
        self
    }

    /// Resolves the loader for a configuration format tag.
    ///
    /// Returns `None` for unknown tags and for formats with no registered
    /// loader.
    #[must_use]
    pub fn resolve(&self, format_tag: &str) -> Option<Arc<dyn ModelLoader>> {
        let format = ModelFormat::from_str(format_tag).ok()?;
        self.loaders.get(&format).cloned()
    }

    /// Formats with a registered loader.
    #[must_use]
    pub fn registered_formats(&self) -> Vec<ModelFormat> {
        self.loaders.keys().copied().collect()
    }
}

impl std::fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("formats", &self.registered_formats())
            .finish()
    }
}
