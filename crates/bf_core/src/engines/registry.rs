//! Engine discovery and registration.
//!
//! Maps engine names to factories. Instances are created on first use
//! and cached; an engine that cannot initialize (missing credential,
//! missing binary) stays listed with its capability profile and simply
//! fails its connection test.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::engines::{edge::EdgeEngine, gtts::GttsEngine, xtts::XttsEngine};
use crate::engines::{CredentialStore, TtsEngine};
use crate::project::layout;

/// Factory producing an engine instance.
pub type EngineFactory = Box<dyn Fn() -> Arc<dyn TtsEngine> + Send + Sync>;

/// Errors from registry lookups.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Engine '{name}' not registered. Available: {available}")]
    NotRegistered { name: String, available: String },
}

/// Static capability profile of an engine.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineCapabilities {
    pub name: String,
    pub supports_cloning: bool,
    pub supports_ssml: bool,
    pub requires_gpu: bool,
}

/// Name -> factory registry with lazy, cached instantiation.
pub struct EngineRegistry {
    factories: BTreeMap<String, EngineFactory>,
    instances: Mutex<BTreeMap<String, Arc<dyn TtsEngine>>>,
}

impl EngineRegistry {
    /// Empty registry; register factories explicitly (tests).
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
            instances: Mutex::new(BTreeMap::new()),
        }
    }

    /// Registry with the built-in engines, configured from the
    /// project's credential store and request spacing.
    pub fn with_defaults(project_path: &Path, rate_limit_ms: u64) -> Self {
        let credentials = CredentialStore::load(&project_path.join(layout::ENGINES_FILE));
        let mut registry = Self::new();

        let creds = credentials.clone();
        registry.register("edge", move || {
            Arc::new(EdgeEngine::new(&creds, rate_limit_ms)) as Arc<dyn TtsEngine>
        });

        let creds = credentials.clone();
        registry.register("gtts", move || {
            Arc::new(GttsEngine::new(&creds, rate_limit_ms)) as Arc<dyn TtsEngine>
        });

        let creds = credentials;
        registry.register("xtts", move || {
            Arc::new(XttsEngine::new(&creds)) as Arc<dyn TtsEngine>
        });

        registry
    }

    /// Register a factory under a name.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn TtsEngine> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Get an engine by name, instantiating on first use.
    pub fn get(&self, name: &str) -> Result<Arc<dyn TtsEngine>, RegistryError> {
        if let Some(engine) = self.instances.lock().get(name) {
            return Ok(Arc::clone(engine));
        }

        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| RegistryError::NotRegistered {
                name: name.to_string(),
                available: self.list_available().join(", "),
            })?;

        let engine = factory();
        self.instances
            .lock()
            .insert(name.to_string(), Arc::clone(&engine));
        Ok(engine)
    }

    /// Capability profile without keeping the instance.
    pub fn capabilities(&self, name: &str) -> Result<EngineCapabilities, RegistryError> {
        let engine = self.get(name)?;
        Ok(EngineCapabilities {
            name: engine.name().to_string(),
            supports_cloning: engine.supports_cloning(),
            supports_ssml: engine.supports_ssml(),
            requires_gpu: engine.requires_gpu(),
        })
    }

    /// Names of all registered engines, sorted.
    pub fn list_available(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Whether a name is registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}
