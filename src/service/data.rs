use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::engine::{DictDataBackend, in_transaction};
use crate::error::{DictError, Result};
use crate::model::{self, DataMap, Dict, DictFieldType, DictItem};
use crate::query::{self, CompareOp, Expression, Field, Operand};
use crate::query::constant::{Constant, ConstantType};
use crate::service::dict::DictService;
use crate::service::history::{HistoryArchive, HistoryRetention};
use crate::service::validation;

/// Record operations with optimistic concurrency, inline history and
/// soft delete.
pub struct DictDataService {
    dicts: Arc<DictService>,
    retention: HistoryRetention,
    archive: Option<Arc<dyn HistoryArchive>>,
}

impl DictDataService {
    pub fn new(dicts: Arc<DictService>) -> Self {
        Self { dicts, retention: HistoryRetention::default(), archive: None }
    }

    pub fn with_retention(mut self, retention: HistoryRetention) -> Self {
        self.retention = retention;
        self
    }

    /// Snapshots trimmed from an item's history go to `archive`; without
    /// one they are dropped.
    pub fn with_archive(mut self, archive: Arc<dyn HistoryArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    fn archive(&self, dict: &Dict, item_id: &str, evicted: Vec<DataMap>) -> Result<()> {
        if evicted.is_empty() {
            return Ok(());
        }
        match &self.archive {
            Some(archive) => archive.archive(&dict.id, item_id, evicted),
            None => {
                debug!(dict = %dict.id, item = %item_id, dropped = evicted.len(), "history trimmed");
                Ok(())
            }
        }
    }

    fn backend(&self, dict: &Dict) -> Result<Arc<dyn DictDataBackend>> {
        let registry = self.dicts.registry();
        registry.data_backend(registry.engine_of(dict)?)
    }

    fn transactional<T>(&self, dict: &Dict, action: impl FnOnce() -> Result<T>) -> Result<T> {
        let registry = self.dicts.registry();
        let backend = registry.transaction_backend(registry.engine_of(dict)?)?;
        in_transaction(&[backend], action)
    }

    /// Creates a record with version 1. An `id` entry in `data` chooses
    /// the record id, otherwise one is generated.
    pub fn create(&self, dict_id: &str, mut data: DataMap) -> Result<DictItem> {
        let dict = self.dicts.get_by_id(dict_id)?;
        let id = match data.remove(model::ID) {
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(Value::Null) | None => uuid::Uuid::new_v4().to_string(),
            Some(other) => return Err(DictError::Validation(format!("Item id {} is not a string", other))),
        };
        let data = validation::validate_item(&dict, data)?;
        self.check_references(&dict, &data)?;
        let backend = self.backend(&dict)?;
        let item = DictItem::new(id, data, model::now());
        self.transactional(&dict, || {
            if backend.get_by_id(&dict, &item.id)?.is_some() {
                return Err(DictError::Validation(format!("Item '{}' already exists in dict '{}'", item.id, dict.id)));
            }
            self.check_unique(&dict, &item.id, &item.data)?;
            backend.insert(&dict, &item)
        })?;
        debug!(dict = %dict.id, item = %item.id, "item created");
        Ok(item)
    }

    /// Creates all records or none.
    pub fn create_many(&self, dict_id: &str, items: Vec<DataMap>) -> Result<Vec<DictItem>> {
        let dict = self.dicts.get_by_id(dict_id)?;
        self.transactional(&dict, || items.into_iter().map(|data| self.create(dict_id, data)).collect())
    }

    pub fn get_by_id(&self, dict_id: &str, item_id: &str, include_deleted: bool) -> Result<DictItem> {
        let dict = self.dicts.get_by_id(dict_id)?;
        self.backend(&dict)?
            .get_by_id(&dict, item_id)?
            .filter(|item| include_deleted || !item.is_deleted())
            .ok_or_else(|| DictError::ItemNotFound { dict_id: dict_id.to_string(), item_id: item_id.to_string() })
    }

    /// Records matching `query`; deleted records only when asked for.
    pub fn get_by_filter(&self, dict_id: &str, query: &str, include_deleted: bool) -> Result<Vec<DictItem>> {
        let expression = query::parse(query)?;
        self.get_by_expression(dict_id, &expression, include_deleted)
    }

    pub fn get_by_expression(&self, dict_id: &str, expression: &Expression, include_deleted: bool) -> Result<Vec<DictItem>> {
        let dict = self.dicts.get_by_id(dict_id)?;
        let catalog = self.dicts.catalog(&dict)?;
        self.backend(&dict)?.find(&dict, &catalog, expression, include_deleted)
    }

    /// Replaces the data of a record whose stored version is
    /// `expected_version`; a stale version fails without any change.
    pub fn update(&self, dict_id: &str, item_id: &str, expected_version: i64, data: DataMap) -> Result<DictItem> {
        let dict = self.dicts.get_by_id(dict_id)?;
        let data = validation::validate_item(&dict, data)?;
        self.check_references(&dict, &data)?;
        let backend = self.backend(&dict)?;
        let retention = self.retention;
        let result = self.transactional(&dict, || {
            self.check_unique(&dict, item_id, &data)?;
            let mut evicted = Vec::new();
            let item = backend.modify(&dict, item_id, Some(expected_version), &mut |mut item: DictItem| {
                if item.is_deleted() {
                    return Err(DictError::Validation(format!("Item '{}' of dict '{}' is deleted", item.id, dict.id)));
                }
                evicted = retention.record(&mut item);
                item.data = data.clone();
                item.version += 1;
                item.updated = model::now();
                Ok(item)
            })?;
            self.archive(&dict, item_id, evicted)?;
            Ok(item)
        });
        if let Err(DictError::DictConcurrentUpdate { expected, actual, .. }) = &result {
            debug!(dict = %dict.id, item = %item_id, expected, actual, "stale update rejected");
        }
        result
    }

    /// Soft delete: the record stays, marked with the time and reason.
    pub fn delete(&self, dict_id: &str, item_id: &str, reason: Option<String>) -> Result<DictItem> {
        let dict = self.dicts.get_by_id(dict_id)?;
        let backend = self.backend(&dict)?;
        let retention = self.retention;
        self.transactional(&dict, || {
            let mut evicted = Vec::new();
            let item = backend.modify(&dict, item_id, None, &mut |mut item: DictItem| {
                if item.is_deleted() {
                    return Ok(item);
                }
                evicted = retention.record(&mut item);
                let now = model::now();
                item.version += 1;
                item.updated = now;
                item.deleted = Some(now);
                item.deletion_reason = reason.clone();
                Ok(item)
            })?;
            self.archive(&dict, item_id, evicted)?;
            Ok(item)
        })
    }

    /// Soft-deletes every record matching `expression`.
    pub fn delete_by_expression(&self, dict_id: &str, expression: &Expression, reason: Option<String>) -> Result<usize> {
        let items = self.get_by_expression(dict_id, expression, false)?;
        let dict = self.dicts.get_by_id(dict_id)?;
        self.transactional(&dict, || {
            for item in &items {
                self.delete(dict_id, &item.id, reason.clone())?;
            }
            Ok(items.len())
        })
    }

    fn check_references(&self, dict: &Dict, data: &DataMap) -> Result<()> {
        for field in dict.fields.iter().filter(|f| f.field_type == DictFieldType::Dict) {
            let (Some(value), Some(reference)) = (data.get(&field.id), field.dict_ref.as_ref()) else {
                continue;
            };
            let ids: Vec<&str> = match value {
                Value::Array(values) => values.iter().filter_map(|v| v.as_str()).collect(),
                other => other.as_str().into_iter().collect(),
            };
            let target = if reference.dict_id == dict.id { dict.clone() } else { self.dicts.get_by_id(&reference.dict_id)? };
            let backend = self.backend(&target)?;
            for id in ids {
                if !backend.get_by_id(&target, id)?.is_some_and(|item| !item.is_deleted()) {
                    return Err(DictError::ItemNotFound { dict_id: target.id.clone(), item_id: id.to_string() });
                }
            }
        }
        Ok(())
    }

    fn check_unique(&self, dict: &Dict, item_id: &str, data: &DataMap) -> Result<()> {
        let backend = self.backend(dict)?;
        let catalog = [dict.clone()];
        for constraint in &dict.constraints {
            let conditions: Option<Vec<Expression>> = constraint
                .fields
                .iter()
                .map(|field_id| {
                    let constant = scalar_constant(data.get(field_id)?)?;
                    Some(Expression::Compare {
                        field: Field::new(field_id),
                        op: CompareOp::Eq,
                        value: Operand::Constant(constant),
                    })
                })
                .collect();
            // a missing value never collides
            let filter = conditions.and_then(|c| c.into_iter().reduce(Expression::and));
            let Some(filter) = filter else { continue };
            if backend.find(dict, &catalog, &filter, false)?.iter().any(|other| other.id != item_id) {
                return Err(DictError::Validation(format!(
                    "Unique constraint '{}' of dict '{}' is violated",
                    constraint.id, dict.id
                )));
            }
        }
        Ok(())
    }
}

fn scalar_constant(value: &Value) -> Option<Constant> {
    match value {
        Value::String(s) => Some(Constant::new(s, ConstantType::String)),
        Value::Bool(b) => Some(Constant::new(&b.to_string(), ConstantType::Boolean)),
        Value::Number(n) if n.is_i64() => Some(Constant::new(&n.to_string(), ConstantType::Integer)),
        Value::Number(n) => Some(Constant::new(&n.to_string(), ConstantType::Decimal)),
        _ => None,
    }
}
