use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Settings;
use crate::engine::{
    DictBackend, DictDataBackend, DictSchemeBackend, Engine, FullBackend, TransactionBackend, VersionSchemeBackend,
};
use crate::error::{DictError, Result};
use crate::model::Dict;

/// Implementations of one capability keyed by engine name.
pub struct BackendProvider<T: ?Sized + Engine> {
    capability: &'static str,
    backends: BTreeMap<String, Arc<T>>,
}

impl<T: ?Sized + Engine> BackendProvider<T> {
    /// Every available engine must have exactly one implementation; an
    /// implementation for an engine that is not available only warns.
    pub fn new(capability: &'static str, available: &BTreeSet<String>, implemented: Vec<Arc<T>>) -> Result<Self> {
        let mut backends = BTreeMap::new();
        for backend in implemented {
            let name = backend.engine_name().to_string();
            if backends.insert(name.clone(), backend).is_some() {
                return Err(DictError::Engine(format!(
                    "More than one {} implementation for engine '{}'",
                    capability, name
                )));
            }
        }
        let missing: Vec<&str> = available
            .iter()
            .filter(|name| !backends.contains_key(*name))
            .map(|name| name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(DictError::Engine(format!(
                "No {} implementation for engines {:?}",
                capability, missing
            )));
        }
        for name in backends.keys().filter(|name| !available.contains(*name)) {
            warn!(capability, engine = %name, "backend implemented for an engine that is not configured as available");
        }
        Ok(Self { capability, backends })
    }

    pub fn get_backend_by_engine_name(&self, name: &str) -> Result<Arc<T>> {
        self.backends.get(name).cloned().ok_or_else(|| {
            DictError::Engine(format!(
                "Engine '{}' has no {} implementation, known engines: {}",
                name,
                self.capability,
                self.engine_names().join(", ")
            ))
        })
    }

    pub fn engine_names(&self) -> Vec<&str> {
        self.backends.keys().map(|k| k.as_str()).collect()
    }

    pub fn backends(&self) -> impl Iterator<Item = &Arc<T>> {
        self.backends.values()
    }
}

/// Maps engine names to backends, per capability.
pub struct EngineRegistry {
    default_engine: String,
    engines: BackendProvider<dyn Engine>,
    dicts: BackendProvider<dyn DictBackend>,
    schemes: BackendProvider<dyn DictSchemeBackend>,
    data: BackendProvider<dyn DictDataBackend>,
    versions: BackendProvider<dyn VersionSchemeBackend>,
    transactions: BackendProvider<dyn TransactionBackend>,
}

#[derive(Default)]
pub struct EngineRegistryBuilder {
    available: BTreeSet<String>,
    default_engine: String,
    engines: Vec<Arc<dyn Engine>>,
    dicts: Vec<Arc<dyn DictBackend>>,
    schemes: Vec<Arc<dyn DictSchemeBackend>>,
    data: Vec<Arc<dyn DictDataBackend>>,
    versions: Vec<Arc<dyn VersionSchemeBackend>>,
    transactions: Vec<Arc<dyn TransactionBackend>>,
}

impl EngineRegistryBuilder {
    pub fn register<B: FullBackend + 'static>(mut self, backend: Arc<B>) -> Self {
        self.engines.push(backend.clone());
        self.dicts.push(backend.clone());
        self.schemes.push(backend.clone());
        self.data.push(backend.clone());
        self.versions.push(backend.clone());
        self.transactions.push(backend);
        self
    }

    pub fn build(self) -> Result<EngineRegistry> {
        if !self.available.contains(&self.default_engine) {
            return Err(DictError::Engine(format!(
                "Default engine '{}' is not available",
                self.default_engine
            )));
        }
        let available = &self.available;
        Ok(EngineRegistry {
            default_engine: self.default_engine,
            engines: BackendProvider::new("engine", available, self.engines)?,
            dicts: BackendProvider::new("dict", available, self.dicts)?,
            schemes: BackendProvider::new("dict scheme", available, self.schemes)?,
            data: BackendProvider::new("dict data", available, self.data)?,
            versions: BackendProvider::new("version scheme", available, self.versions)?,
            transactions: BackendProvider::new("transaction", available, self.transactions)?,
        })
    }
}

impl EngineRegistry {
    pub fn builder<S: AsRef<str>>(available: &[S], default_engine: &str) -> EngineRegistryBuilder {
        EngineRegistryBuilder {
            available: available.iter().map(|s| s.as_ref().to_string()).collect(),
            default_engine: default_engine.to_string(),
            ..Default::default()
        }
    }

    pub fn from_settings(settings: &Settings) -> EngineRegistryBuilder {
        let available: Vec<&String> = settings.engines.available.iter().collect();
        Self::builder(&available, &settings.engines.default)
    }

    pub fn default_engine(&self) -> &str {
        &self.default_engine
    }

    /// Creates the dict and history stores of the default engine.
    pub fn initialize(&self) -> Result<()> {
        let engine = self.engines.get_backend_by_engine_name(&self.default_engine)?;
        if !engine.dict_exists()? {
            self.dict_backend()?.create_dict_store()?;
            info!(engine = %self.default_engine, "dict store created");
        }
        if !engine.version_scheme_exists()? {
            self.version_backend()?.create_version_store()?;
            info!(engine = %self.default_engine, "version store created");
        }
        Ok(())
    }

    pub fn engines(&self) -> impl Iterator<Item = &Arc<dyn Engine>> {
        self.engines.backends()
    }

    pub fn engine_names(&self) -> Vec<&str> {
        self.engines.engine_names()
    }

    /// Metadata store of the default engine.
    pub fn dict_backend(&self) -> Result<Arc<dyn DictBackend>> {
        self.dicts.get_backend_by_engine_name(&self.default_engine)
    }

    pub fn dict_backend_by_engine_name(&self, name: &str) -> Result<Arc<dyn DictBackend>> {
        self.dicts.get_backend_by_engine_name(name)
    }

    /// History store of the default engine.
    pub fn version_backend(&self) -> Result<Arc<dyn VersionSchemeBackend>> {
        self.versions.get_backend_by_engine_name(&self.default_engine)
    }

    pub fn scheme_backend(&self, name: &str) -> Result<Arc<dyn DictSchemeBackend>> {
        self.schemes.get_backend_by_engine_name(name)
    }

    pub fn scheme_backends(&self) -> impl Iterator<Item = &Arc<dyn DictSchemeBackend>> {
        self.schemes.backends()
    }

    pub fn data_backend(&self, name: &str) -> Result<Arc<dyn DictDataBackend>> {
        self.data.get_backend_by_engine_name(name)
    }

    pub fn transaction_backend(&self, name: &str) -> Result<Arc<dyn TransactionBackend>> {
        self.transactions.get_backend_by_engine_name(name)
    }

    pub fn transaction_backends(&self) -> Vec<Arc<dyn TransactionBackend>> {
        self.transactions.backends().cloned().collect()
    }

    /// Engine owning a dict's data; a dict without one is not usable yet.
    pub fn engine_of<'d>(&self, dict: &'d Dict) -> Result<&'d str> {
        dict.engine
            .as_deref()
            .ok_or_else(|| DictError::Engine(format!("Engine of dict '{}' is not resolved", dict.id)))
    }
}
