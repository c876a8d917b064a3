use std::sync::Arc;

use tracing::info;

use crate::ddl::ast::TableParameter;
use crate::engine::{EngineRegistry, in_transaction};
use crate::error::{DictError, Result};
use crate::model::{self, Dict, DictConstraint, DictEnum, DictField, DictIndex};
use crate::service::validation;

/// Schema operations on dicts. Metadata lives in the default engine, the
/// structure of each dict in the engine that owns it.
pub struct DictService {
    registry: Arc<EngineRegistry>,
}

impl DictService {
    pub fn new(registry: Arc<EngineRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    pub fn find(&self, dict_id: &str) -> Result<Option<Dict>> {
        Ok(self.registry.dict_backend()?.get_dict(dict_id)?.filter(|d| !d.is_deleted()))
    }

    pub fn get_by_id(&self, dict_id: &str) -> Result<Dict> {
        self.find(dict_id)?
            .ok_or_else(|| DictError::DictNotFound { dict_id: dict_id.to_string() })
    }

    pub fn all(&self) -> Result<Vec<Dict>> {
        Ok(self
            .registry
            .dict_backend()?
            .all_dicts()?
            .into_iter()
            .filter(|d| !d.is_deleted())
            .collect())
    }

    /// The dict together with the dicts its reference fields point to.
    pub fn catalog(&self, dict: &Dict) -> Result<Vec<Dict>> {
        let mut catalog = vec![dict.clone()];
        for dict_id in dict.referenced_dict_ids() {
            if dict_id != dict.id {
                catalog.push(self.get_by_id(&dict_id)?);
            }
        }
        Ok(catalog)
    }

    /// Creates the dict in its engine (the default one when unset).
    pub fn create(&self, mut dict: Dict) -> Result<Dict> {
        if dict.engine.is_none() {
            dict.engine = Some(self.registry.default_engine().to_string());
        }
        self.validate(&dict)?;
        let dict_backend = self.registry.dict_backend()?;
        let engine = self.registry.engine_of(&dict)?.to_string();
        let scheme = self.registry.scheme_backend(&engine)?;
        // a deleted dict keeps its id and structure
        if dict_backend.get_dict(&dict.id)?.is_some() || scheme.scheme_exists(&dict.id)? {
            return Err(DictError::AlreadyExists { dict_id: dict.id.clone() });
        }
        in_transaction(&self.registry.transaction_backends(), || {
            scheme.create_scheme(&dict)?;
            dict_backend.save_dict(&dict)
        })?;
        info!(dict = %dict.id, engine = %engine, "dict created");
        Ok(dict)
    }

    /// Replaces the definition of a dict; its id and engine are kept.
    pub fn update(&self, dict_id: &str, mut updated: Dict) -> Result<Dict> {
        let previous = self.get_by_id(dict_id)?;
        updated.id = previous.id.clone();
        updated.engine = previous.engine.clone();
        updated.deleted = None;
        self.replace(&previous, updated)
    }

    fn replace(&self, previous: &Dict, updated: Dict) -> Result<Dict> {
        self.validate(&updated)?;
        let engine = self.registry.engine_of(previous)?;
        let scheme = self.registry.scheme_backend(engine)?;
        let dict_backend = self.registry.dict_backend()?;
        in_transaction(&self.registry.transaction_backends(), || {
            scheme.update_scheme(previous, &updated)?;
            dict_backend.save_dict(&updated)
        })?;
        Ok(updated)
    }

    /// Marks the dict deleted; its structure and records stay in place.
    pub fn delete(&self, dict_id: &str) -> Result<Dict> {
        let mut dict = self.get_by_id(dict_id)?;
        let referencing: Vec<String> = self
            .all()?
            .into_iter()
            .filter(|d| d.id != dict.id && d.referenced_dict_ids().contains(&dict.id))
            .map(|d| d.id)
            .collect();
        if !referencing.is_empty() {
            return Err(DictError::Validation(format!(
                "Dict '{}' is referenced by {}",
                dict.id,
                referencing.join(", ")
            )));
        }
        dict.deleted = Some(model::now());
        self.registry.dict_backend()?.save_dict(&dict)?;
        info!(dict = %dict.id, "dict deleted");
        Ok(dict)
    }

    /// Records a new owning engine without touching any storage.
    pub fn set_engine(&self, dict_id: &str, engine: &str) -> Result<Dict> {
        let mut dict = self.get_by_id(dict_id)?;
        dict.engine = Some(engine.to_string());
        self.registry.dict_backend()?.save_dict(&dict)?;
        Ok(dict)
    }

    // ------------- Fields -------------
    pub fn add_field(&self, dict_id: &str, field: DictField) -> Result<Dict> {
        let previous = self.get_by_id(dict_id)?;
        let mut updated = previous.clone();
        updated.fields.push(field);
        self.replace(&previous, updated)
    }

    pub fn drop_field(&self, dict_id: &str, field_id: &str) -> Result<Dict> {
        let previous = self.get_by_id(dict_id)?;
        if previous.field(field_id).is_none() {
            return Err(DictError::UnknownField { dict_id: dict_id.to_string(), field_id: field_id.to_string() });
        }
        let used = previous.indexes.iter().map(|i| &i.fields).chain(previous.constraints.iter().map(|c| &c.fields));
        if used.flatten().any(|f| f.eq_ignore_ascii_case(field_id)) {
            return Err(DictError::Validation(format!(
                "Field '{}' of dict '{}' is used by an index or constraint",
                field_id, dict_id
            )));
        }
        let mut updated = previous.clone();
        updated.fields.retain(|f| !f.id.eq_ignore_ascii_case(field_id));
        self.replace(&previous, updated)
    }

    pub fn rename_field(&self, dict_id: &str, from: &str, to: &str, name: Option<String>) -> Result<Dict> {
        let previous = self.get_by_id(dict_id)?;
        let current_id = previous
            .field(from)
            .map(|f| f.id.clone())
            .ok_or_else(|| DictError::UnknownField { dict_id: dict_id.to_string(), field_id: from.to_string() })?;
        let mut updated = previous.clone();
        for field in updated.fields.iter_mut().filter(|f| f.id == current_id) {
            field.id = to.to_string();
            if name.is_some() {
                field.name = name.clone();
            }
        }
        for fields in updated
            .indexes
            .iter_mut()
            .map(|i| &mut i.fields)
            .chain(updated.constraints.iter_mut().map(|c| &mut c.fields))
        {
            for field in fields.iter_mut().filter(|f| **f == current_id) {
                *field = to.to_string();
            }
        }
        self.validate(&updated)?;
        let scheme = self.registry.scheme_backend(self.registry.engine_of(&previous)?)?;
        let dict_backend = self.registry.dict_backend()?;
        in_transaction(&self.registry.transaction_backends(), || {
            scheme.rename_field(&previous, &current_id, to)?;
            dict_backend.save_dict(&updated)
        })?;
        Ok(updated)
    }

    // ------------- Indexes and constraints -------------
    pub fn create_index(&self, dict_id: &str, index: DictIndex) -> Result<Dict> {
        let previous = self.get_by_id(dict_id)?;
        let mut updated = previous.clone();
        updated.indexes.push(index);
        self.replace(&previous, updated)
    }

    pub fn delete_index(&self, dict_id: &str, index_id: &str) -> Result<Dict> {
        let previous = self.get_by_id(dict_id)?;
        if !previous.indexes.iter().any(|i| i.id == index_id) {
            return Err(DictError::Validation(format!("Index '{}' not found in dict '{}'", index_id, dict_id)));
        }
        let mut updated = previous.clone();
        updated.indexes.retain(|i| i.id != index_id);
        self.replace(&previous, updated)
    }

    pub fn create_constraint(&self, dict_id: &str, constraint: DictConstraint) -> Result<Dict> {
        let previous = self.get_by_id(dict_id)?;
        let mut updated = previous.clone();
        updated.constraints.push(constraint);
        self.replace(&previous, updated)
    }

    pub fn delete_constraint(&self, dict_id: &str, constraint_id: &str) -> Result<Dict> {
        let previous = self.get_by_id(dict_id)?;
        if !previous.constraints.iter().any(|c| c.id == constraint_id) {
            return Err(DictError::Validation(format!(
                "Constraint '{}' not found in dict '{}'",
                constraint_id, dict_id
            )));
        }
        let mut updated = previous.clone();
        updated.constraints.retain(|c| c.id != constraint_id);
        self.replace(&previous, updated)
    }

    // ------------- Enums -------------
    pub fn create_enum(&self, dict_id: &str, dict_enum: DictEnum) -> Result<Dict> {
        let previous = self.get_by_id(dict_id)?;
        let mut updated = previous.clone();
        updated.enums.push(dict_enum);
        self.replace(&previous, updated)
    }

    pub fn add_enum_value(&self, dict_id: &str, enum_id: &str, value: &str) -> Result<Dict> {
        let previous = self.get_by_id(dict_id)?;
        let mut updated = previous.clone();
        let dict_enum = updated
            .enums
            .iter_mut()
            .find(|e| e.id == enum_id)
            .ok_or_else(|| DictError::EnumNotFound { dict_id: dict_id.to_string(), enum_id: enum_id.to_string() })?;
        if dict_enum.values.iter().any(|v| v == value) {
            return Err(DictError::Validation(format!("Value '{}' already exists in enum '{}'", value, enum_id)));
        }
        dict_enum.values.push(value.to_string());
        self.replace(&previous, updated)
    }

    pub fn delete_enum(&self, dict_id: &str, enum_id: &str) -> Result<Dict> {
        let previous = self.get_by_id(dict_id)?;
        if previous.dict_enum(enum_id).is_none() {
            return Err(DictError::EnumNotFound { dict_id: dict_id.to_string(), enum_id: enum_id.to_string() });
        }
        let mut updated = previous.clone();
        updated.enums.retain(|e| e.id != enum_id);
        self.replace(&previous, updated)
    }

    pub fn set_parameter(&self, dict_id: &str, parameter: TableParameter, value: Option<String>) -> Result<Dict> {
        let previous = self.get_by_id(dict_id)?;
        let mut updated = previous.clone();
        match parameter {
            TableParameter::ReadPermission => updated.view_permission = value,
            TableParameter::WritePermission => updated.edit_permission = value,
        }
        self.registry.dict_backend()?.save_dict(&updated)?;
        Ok(updated)
    }

    fn validate(&self, dict: &Dict) -> Result<()> {
        let dict_backend = self.registry.dict_backend()?;
        let known: Vec<String> = dict_backend
            .all_dicts()?
            .into_iter()
            .filter(|d| !d.is_deleted())
            .map(|d| d.id)
            .collect();
        validation::validate_dict(dict, &|id| known.iter().any(|k| k == id))
    }
}
