//! Checks on dict schemas and item data.

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Number, Value};

use crate::error::{DictError, Result};
use crate::model::{self, DataMap, Dict, DictField, DictFieldType};
use crate::query::constant;

lazy_static! {
    static ref RE_IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

fn invalid(message: String) -> DictError {
    DictError::Validation(message)
}

/// Validates a schema. `dict_exists` tells whether a referenced dict is
/// known; a dict may reference itself.
pub fn validate_dict(dict: &Dict, dict_exists: &dyn Fn(&str) -> bool) -> Result<()> {
    if !RE_IDENTIFIER.is_match(&dict.id) {
        return Err(invalid(format!("Dict id '{}' is not a valid identifier", dict.id)));
    }
    let mut field_ids = HashSet::new();
    for field in &dict.fields {
        if !RE_IDENTIFIER.is_match(&field.id) {
            return Err(invalid(format!("Field id '{}' of dict '{}' is not a valid identifier", field.id, dict.id)));
        }
        if model::is_service_field(&field.id) {
            return Err(invalid(format!("Field id '{}' of dict '{}' is reserved", field.id, dict.id)));
        }
        if !field_ids.insert(field.id.to_ascii_lowercase()) {
            return Err(invalid(format!("Field id '{}' is declared twice in dict '{}'", field.id, dict.id)));
        }
        validate_field(dict, field, dict_exists)?;
    }
    let mut enum_ids = HashSet::new();
    for dict_enum in &dict.enums {
        if !enum_ids.insert(dict_enum.id.as_str()) {
            return Err(invalid(format!("Enum '{}' is declared twice in dict '{}'", dict_enum.id, dict.id)));
        }
        let distinct: HashSet<&String> = dict_enum.values.iter().collect();
        if distinct.len() != dict_enum.values.len() {
            return Err(invalid(format!("Enum '{}' of dict '{}' has repeated values", dict_enum.id, dict.id)));
        }
    }
    let mut index_ids = HashSet::new();
    for index in &dict.indexes {
        if !index_ids.insert(index.id.as_str()) {
            return Err(invalid(format!("Index '{}' is declared twice in dict '{}'", index.id, dict.id)));
        }
        check_fields_exist(dict, &index.id, &index.fields)?;
    }
    let mut constraint_ids = HashSet::new();
    for constraint in &dict.constraints {
        if !constraint_ids.insert(constraint.id.as_str()) {
            return Err(invalid(format!("Constraint '{}' is declared twice in dict '{}'", constraint.id, dict.id)));
        }
        check_fields_exist(dict, &constraint.id, &constraint.fields)?;
    }
    Ok(())
}

fn validate_field(dict: &Dict, field: &DictField, dict_exists: &dyn Fn(&str) -> bool) -> Result<()> {
    match field.field_type {
        DictFieldType::Enum => {
            let enum_id = field
                .enum_id
                .as_deref()
                .ok_or_else(|| invalid(format!("Enum field '{}' of dict '{}' has no enum", field.id, dict.id)))?;
            if dict.dict_enum(enum_id).is_none() {
                return Err(DictError::EnumNotFound { dict_id: dict.id.clone(), enum_id: enum_id.to_string() });
            }
        }
        DictFieldType::Dict => {
            let reference = field
                .dict_ref
                .as_ref()
                .ok_or_else(|| invalid(format!("Reference field '{}' of dict '{}' has no target", field.id, dict.id)))?;
            if reference.dict_id != dict.id && !dict_exists(&reference.dict_id) {
                return Err(DictError::DictNotFound { dict_id: reference.dict_id.clone() });
            }
        }
        _ => {}
    }
    if let (Some(min), Some(max)) = (field.min_size, field.max_size) {
        if min > max {
            return Err(invalid(format!("Field '{}' of dict '{}' has minSize above maxSize", field.id, dict.id)));
        }
    }
    Ok(())
}

fn check_fields_exist(dict: &Dict, owner: &str, fields: &[String]) -> Result<()> {
    if fields.is_empty() {
        return Err(invalid(format!("'{}' of dict '{}' names no fields", owner, dict.id)));
    }
    for field_id in fields {
        if dict.field(field_id).is_none() && model::service_field_type(field_id).is_none() {
            return Err(DictError::UnknownField { dict_id: dict.id.clone(), field_id: field_id.clone() });
        }
    }
    Ok(())
}

/// Validates item data against the dict and returns it in canonical form:
/// declared field ids, nulls dropped, decimals as plain strings, dates and
/// timestamps in the record text formats.
pub fn validate_item(dict: &Dict, data: DataMap) -> Result<DataMap> {
    let mut normalized = DataMap::new();
    for (key, value) in data {
        let field = dict.field(&key).ok_or_else(|| DictError::UnknownField {
            dict_id: dict.id.clone(),
            field_id: key.clone(),
        })?;
        if value.is_null() {
            continue;
        }
        let value = if field.multivalued {
            match value {
                Value::Array(values) => Value::Array(
                    values
                        .into_iter()
                        .map(|v| normalize_value(dict, field, v))
                        .collect::<Result<Vec<_>>>()?,
                ),
                _ => return Err(invalid(format!("Field '{}' of dict '{}' expects a list", field.id, dict.id))),
            }
        } else {
            normalize_value(dict, field, value)?
        };
        normalized.insert(field.id.clone(), value);
    }
    for field in dict.fields.iter().filter(|f| f.required) {
        if !normalized.contains_key(&field.id) {
            return Err(invalid(format!("Required field '{}' of dict '{}' is missing", field.id, dict.id)));
        }
    }
    Ok(normalized)
}

fn normalize_value(dict: &Dict, field: &DictField, value: Value) -> Result<Value> {
    let mismatch = |value: &Value| {
        invalid(format!(
            "Value {} does not fit field '{}' of type {} in dict '{}'",
            value, field.id, field.field_type, dict.id
        ))
    };
    let normalized = match field.field_type {
        DictFieldType::Integer => {
            let integer = match &value {
                Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            };
            let integer = integer.ok_or_else(|| mismatch(&value))?;
            check_bounds(dict, field, integer as f64)?;
            Value::Number(Number::from(integer))
        }
        DictFieldType::Decimal => {
            let text = match &value {
                Value::Number(n) => n.to_string(),
                Value::String(s) => s.clone(),
                _ => return Err(mismatch(&value)),
            };
            let canonical = constant::canonical_decimal(&text).map_err(|_| mismatch(&value))?;
            if let Ok(number) = canonical.parse::<f64>() {
                check_bounds(dict, field, number)?;
            }
            Value::String(canonical)
        }
        DictFieldType::String => match value {
            Value::String(s) => {
                check_bounds(dict, field, s.chars().count() as f64)?;
                Value::String(s)
            }
            other => return Err(mismatch(&other)),
        },
        DictFieldType::Boolean => match value {
            Value::Bool(b) => Value::Bool(b),
            Value::String(ref s) if s == "true" || s == "false" => Value::Bool(s == "true"),
            other => return Err(mismatch(&other)),
        },
        DictFieldType::Date => match &value {
            Value::String(s) => {
                let date = constant::parse_date(s)?;
                Value::String(date.format(model::DATE_FORMAT).to_string())
            }
            _ => return Err(mismatch(&value)),
        },
        DictFieldType::Timestamp => match &value {
            Value::String(s) => Value::String(model::format_timestamp(&constant::parse_timestamp(s)?)),
            _ => return Err(mismatch(&value)),
        },
        DictFieldType::Enum => match value {
            Value::String(s) => {
                let enum_id = field.enum_id.as_deref().unwrap_or_default();
                let dict_enum = dict.dict_enum(enum_id).ok_or_else(|| DictError::EnumNotFound {
                    dict_id: dict.id.clone(),
                    enum_id: enum_id.to_string(),
                })?;
                if !dict_enum.values.contains(&s) {
                    return Err(invalid(format!("'{}' is not a value of enum '{}' in dict '{}'", s, enum_id, dict.id)));
                }
                Value::String(s)
            }
            other => return Err(mismatch(&other)),
        },
        DictFieldType::Attachment | DictFieldType::Dict => match value {
            Value::String(s) if !s.is_empty() => Value::String(s),
            other => return Err(mismatch(&other)),
        },
        DictFieldType::Json => value,
        DictFieldType::GeoJson => match &value {
            Value::Object(o) if o.get("type").is_some_and(|t| t.is_string()) => value,
            _ => return Err(mismatch(&value)),
        },
    };
    Ok(normalized)
}

fn check_bounds(dict: &Dict, field: &DictField, measure: f64) -> Result<()> {
    if field.min_size.is_some_and(|min| measure < min) || field.max_size.is_some_and(|max| measure > max) {
        return Err(invalid(format!(
            "Field '{}' of dict '{}' is out of bounds [{}, {}]",
            field.id,
            dict.id,
            field.min_size.map(|m| m.to_string()).unwrap_or_default(),
            field.max_size.map(|m| m.to_string()).unwrap_or_default()
        )));
    }
    Ok(())
}
