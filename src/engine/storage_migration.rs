use std::sync::Arc;

use tracing::{error, info};

use crate::engine::{DictSchemeBackend, EngineRegistry};
use crate::error::{DictError, Result};
use crate::model::Dict;
use crate::service::DictService;

/// Moves the data of a dict from its engine to another one.
pub struct DictStorageMigrationService {
    registry: Arc<EngineRegistry>,
    dicts: Arc<DictService>,
}

impl DictStorageMigrationService {
    pub fn new(registry: Arc<EngineRegistry>, dicts: Arc<DictService>) -> Self {
        Self { registry, dicts }
    }

    /// Creates the scheme in `target_engine`, copies every item with its
    /// version and history, drops the source scheme and records the new
    /// engine. On failure the target scheme is dropped again.
    pub fn migrate(&self, dict_id: &str, target_engine: &str) -> Result<Dict> {
        let dict = self.dicts.get_by_id(dict_id)?;
        let source_engine = self.registry.engine_of(&dict)?.to_string();
        if source_engine == target_engine {
            return Err(DictError::DictStorageMigration {
                dict_id: dict_id.to_string(),
                message: format!("dict is already stored in '{}'", target_engine),
            });
        }
        let storage_error = |e: DictError| DictError::DictStorageMigration {
            dict_id: dict_id.to_string(),
            message: e.to_string(),
        };
        let target_scheme = self.registry.scheme_backend(target_engine).map_err(storage_error)?;
        if target_scheme.scheme_exists(dict_id).map_err(storage_error)? {
            return Err(storage_error(DictError::Engine(format!(
                "scheme already exists in '{}'",
                target_engine
            ))));
        }
        info!(dict = %dict_id, from = %source_engine, to = %target_engine, "storage migration started");

        let mut migrated = dict.clone();
        migrated.engine = Some(target_engine.to_string());
        if let Err(e) = self.copy(&dict, &migrated, &*target_scheme) {
            error!(dict = %dict_id, to = %target_engine, error = %e, "storage migration failed");
            return Err(self.roll_back(&migrated, &*target_scheme, e));
        }
        let finished = self.dicts.set_engine(dict_id, target_engine).and_then(|updated| {
            let dropped = self
                .registry
                .scheme_backend(&source_engine)
                .and_then(|source| source.drop_scheme(&dict));
            match dropped {
                Ok(()) => Ok(updated),
                Err(e) => self.dicts.set_engine(dict_id, &source_engine).and(Err(e)),
            }
        });
        match finished {
            Ok(dict) => {
                info!(dict = %dict_id, from = %source_engine, to = %target_engine, "storage migration finished");
                Ok(dict)
            }
            Err(e) => {
                error!(dict = %dict_id, to = %target_engine, error = %e, "storage migration failed");
                Err(self.roll_back(&migrated, &*target_scheme, e))
            }
        }
    }

    fn copy(&self, source: &Dict, target: &Dict, target_scheme: &dyn DictSchemeBackend) -> Result<()> {
        let target_engine = self.registry.engine_of(target)?;
        let items = self.registry.data_backend(self.registry.engine_of(source)?)?.all_items(source)?;
        let target_data = self.registry.data_backend(target_engine)?;
        let transaction = self.registry.transaction_backend(target_engine)?;
        target_scheme.create_scheme(target)?;
        crate::engine::in_transaction(&[transaction], || {
            for item in &items {
                target_data.insert(target, item)?;
            }
            Ok(())
        })?;
        info!(dict = %source.id, items = items.len(), "items copied");
        Ok(())
    }

    fn roll_back(&self, target: &Dict, target_scheme: &dyn DictSchemeBackend, cause: DictError) -> DictError {
        match target_scheme.scheme_exists(&target.id).and_then(|exists| {
            if exists { target_scheme.drop_scheme(target) } else { Ok(()) }
        }) {
            Ok(()) => DictError::DictStorageMigration { dict_id: target.id.clone(), message: cause.to_string() },
            Err(rollback) => {
                error!(dict = %target.id, error = %rollback, "rollback of storage migration failed");
                DictError::DictRollback {
                    dict_id: target.id.clone(),
                    message: format!("{}; rollback failed: {}", cause, rollback),
                }
            }
        }
    }
}
