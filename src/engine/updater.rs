use std::sync::Arc;

use tracing::warn;

use crate::engine::{Engine, EngineRegistry};
use crate::error::{DictError, Result};
use crate::model::Dict;

/// Assigns an engine to dicts stored without one, by finding the backend
/// that actually holds their scheme. Runs once at startup, before items
/// are accessed.
pub struct DictEngineUpdater {
    registry: Arc<EngineRegistry>,
}

impl DictEngineUpdater {
    pub fn new(registry: Arc<EngineRegistry>) -> Self {
        Self { registry }
    }

    /// Returns the dicts that were updated.
    pub fn setup_dict_engines_if_null(&self) -> Result<Vec<Dict>> {
        let Some(engine) = self.initialized_engine()? else {
            return Ok(Vec::new());
        };
        let dict_backend = self.registry.dict_backend_by_engine_name(engine.engine_name())?;
        let mut updated = Vec::new();
        for mut dict in dict_backend.all_dicts()?.into_iter().filter(|d| d.engine.is_none()) {
            let found = self.locate(&dict)?;
            dict.engine = Some(found.clone());
            dict_backend.save_dict(&dict)?;
            warn!(dict = %dict.id, engine = %found, "engine of dict was not set, assigned the engine holding its scheme");
            updated.push(dict);
        }
        Ok(updated)
    }

    /// First engine, the default one preferred, whose metadata and history
    /// stores both exist.
    fn initialized_engine(&self) -> Result<Option<Arc<dyn Engine>>> {
        let default_engine = self.registry.default_engine();
        let mut engines: Vec<&Arc<dyn Engine>> = self.registry.engines().collect();
        engines.sort_by_key(|e| e.engine_name() != default_engine);
        for engine in engines {
            if engine.dict_exists()? && engine.version_scheme_exists()? {
                return Ok(Some(engine.clone()));
            }
        }
        Ok(None)
    }

    fn locate(&self, dict: &Dict) -> Result<String> {
        for backend in self.registry.scheme_backends() {
            if backend.scheme_exists(&dict.id)? {
                return Ok(backend.engine_name().to_string());
            }
        }
        Err(DictError::Engine(format!("The dict '{}' doesn't exist in any engine", dict.id)))
    }
}
