//! Loads records from a JSON document of the form
//! `{ "<dict id>": [ { field: value, ... }, ... ] }`.
//!
//! A reference field may hold the referenced record itself (an object
//! with an `id`); such records are created in the referenced dict first,
//! unless they already exist there, and the field keeps only the id.
//! Service fields other than `id` are ignored.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::engine::in_transaction;
use crate::error::{DictError, Result};
use crate::model::{self, DataMap, DictFieldType, DictItem};
use crate::service::data::DictDataService;
use crate::service::dict::DictService;

pub struct ImportJsonService {
    dicts: Arc<DictService>,
    data: Arc<DictDataService>,
}

impl ImportJsonService {
    pub fn new(dicts: Arc<DictService>, data: Arc<DictDataService>) -> Self {
        Self { dicts, data }
    }

    /// Creates the records listed under `dict_id`; other keys of the
    /// document are ignored. All records are created or none.
    pub fn import(&self, dict_id: &str, json: &[u8]) -> Result<Vec<DictItem>> {
        let dict = self.dicts.get_by_id(dict_id)?;
        let mut document: serde_json::Map<String, Value> = serde_json::from_slice(json)?;
        let records = match document.remove(dict_id) {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Array(records)) => records,
            Some(other) => {
                return Err(DictError::Validation(format!(
                    "Records of '{}' must be an array, got {}",
                    dict_id, other
                )));
            }
        };
        let backends = self.dicts.registry().transaction_backends();
        let created = in_transaction(&backends, || {
            let mut created = Vec::with_capacity(records.len());
            for record in records {
                let Value::Object(record) = record else {
                    return Err(DictError::Validation(format!("Record of '{}' is not an object", dict_id)));
                };
                let mut record = insertable(record);
                for field in dict.fields.iter().filter(|f| f.field_type == DictFieldType::Dict) {
                    let (Some(reference), Some(value)) = (field.dict_ref.as_ref(), record.get_mut(&field.id)) else {
                        continue;
                    };
                    *value = self.embedded(&reference.dict_id, value.take())?;
                }
                created.push(self.data.create(dict_id, record)?);
            }
            Ok(created)
        })?;
        info!(dict = %dict_id, items = created.len(), "records imported");
        Ok(created)
    }

    /// Replaces embedded records by their ids, creating the ones the
    /// referenced dict does not hold yet.
    fn embedded(&self, dict_id: &str, value: Value) -> Result<Value> {
        match value {
            Value::Object(record) if record.contains_key(model::ID) || record.contains_key(model::MONGO_ID) => {
                let record = insertable(record);
                let Some(id) = record.get(model::ID).and_then(|id| id.as_str()).map(str::to_string) else {
                    return Err(DictError::Validation(format!("Embedded record of '{}' has no string id", dict_id)));
                };
                match self.data.get_by_id(dict_id, &id, true) {
                    Ok(_) => {}
                    Err(DictError::ItemNotFound { .. }) => {
                        self.data.create(dict_id, record)?;
                    }
                    Err(e) => return Err(e),
                }
                Ok(Value::String(id))
            }
            Value::Array(values) => Ok(Value::Array(
                values.into_iter().map(|v| self.embedded(dict_id, v)).collect::<Result<_>>()?,
            )),
            other => Ok(other),
        }
    }
}

/// Field values plus the record id (`_id` read as `id`).
fn insertable(record: DataMap) -> DataMap {
    let mut result = DataMap::new();
    for (key, value) in record {
        if key == model::ID || key == model::MONGO_ID {
            result.insert(model::ID.to_string(), value);
        } else if !model::is_service_field(&key) {
            result.insert(key, value);
        }
    }
    result
}
