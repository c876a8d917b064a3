use bigdecimal::BigDecimal;

use crate::error::{DictError, Result};
use crate::model::{self, Dict, DictFieldType};
use crate::query::ast::{Field, Operand};
use crate::query::constant::{self, Value};

/// A field as declared, with its canonical id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogField {
    pub id: String,
    pub field_type: DictFieldType,
    pub multivalued: bool,
}

/// Read-only lookup of declared fields, supplied by schema storage.
pub trait FieldCatalog {
    fn field(&self, dict_id: &str, field_id: &str) -> Option<CatalogField>;

    fn field_type(&self, dict_id: &str, field_id: &str) -> Option<DictFieldType> {
        self.field(dict_id, field_id).map(|f| f.field_type)
    }
}

impl FieldCatalog for [Dict] {
    fn field(&self, dict_id: &str, field_id: &str) -> Option<CatalogField> {
        let dict = self.iter().find(|d| d.id == dict_id)?;
        if let Some(field_type) = model::service_field_type(field_id) {
            let id = match field_id.to_ascii_lowercase() {
                id if id == model::MONGO_ID => model::ID.to_string(),
                id => id,
            };
            return Some(CatalogField { id, field_type, multivalued: false });
        }
        dict.field(field_id).map(|f| CatalogField {
            id: f.id.clone(),
            field_type: f.field_type,
            multivalued: f.multivalued,
        })
    }
}

impl FieldCatalog for &[Dict] {
    fn field(&self, dict_id: &str, field_id: &str) -> Option<CatalogField> {
        (**self).field(dict_id, field_id)
    }
}

impl FieldCatalog for Vec<Dict> {
    fn field(&self, dict_id: &str, field_id: &str) -> Option<CatalogField> {
        self.as_slice().field(dict_id, field_id)
    }
}

/// Dict being queried plus the catalog its fields resolve against.
pub struct TranslationContext<'a> {
    pub dict_id: &'a str,
    pub catalog: &'a dyn FieldCatalog,
}

/// A field reference checked against the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    pub dict_id: String,
    pub id: String,
    pub field_type: DictFieldType,
    pub multivalued: bool,
    /// Field of a referenced dict rather than of the queried one.
    pub joined: bool,
}

impl<'a> TranslationContext<'a> {
    pub fn new(dict_id: &'a str, catalog: &'a dyn FieldCatalog) -> Self {
        Self { dict_id, catalog }
    }

    /// An undotted reference always means a field of the queried dict.
    pub fn resolve(&self, field: &Field) -> Result<ResolvedField> {
        let dict_id = field.dict_id.as_deref().unwrap_or(self.dict_id);
        let found = self.catalog.field(dict_id, &field.name).ok_or_else(|| DictError::UnknownField {
            dict_id: dict_id.to_string(),
            field_id: field.name.clone(),
        })?;
        Ok(ResolvedField {
            dict_id: dict_id.to_string(),
            id: found.id,
            field_type: found.field_type,
            multivalued: found.multivalued,
            joined: dict_id != self.dict_id,
        })
    }

    /// Value of an operand as compared against `field`. Casts must target
    /// the field's type family; strings compared to temporal fields are
    /// read as dates and integers compared to decimals become decimals.
    pub fn operand_value(&self, field: &ResolvedField, operand: &Operand) -> Result<Value> {
        if let Some(target) = operand.cast_target() {
            if !field.field_type.is_temporal() {
                return Err(DictError::IncompatibleCast {
                    field: field.id.clone(),
                    field_type: field.field_type.to_string(),
                    target: target.to_string(),
                });
            }
        }
        let value = operand.value()?;
        Ok(match (field.field_type, value) {
            (DictFieldType::Date, Value::String(raw)) => Value::Date(constant::parse_date(&raw)?),
            (DictFieldType::Timestamp, Value::String(raw)) => Value::Timestamp(constant::parse_timestamp(&raw)?),
            (DictFieldType::Date, Value::Timestamp(ts)) => Value::Date(ts.date()),
            (DictFieldType::Timestamp, Value::Date(date)) => Value::Timestamp(date.and_time(chrono::NaiveTime::MIN)),
            (DictFieldType::Decimal, Value::Integer(i)) => Value::Decimal(constant::plain_decimal(&BigDecimal::from(i))),
            (_, value) => value,
        })
    }

    /// Values of an `all`/`any` list without duplicates, and whether the
    /// list named null. No element is null, and a single-valued field
    /// counts as its one element.
    pub fn element_values(&self, field: &ResolvedField, operands: &[Operand]) -> Result<(Vec<Value>, bool)> {
        let mut values: Vec<Value> = Vec::with_capacity(operands.len());
        let mut with_null = false;
        for operand in operands {
            let value = self.operand_value(field, operand)?;
            if value.is_null() {
                with_null = true;
            } else if !values.contains(&value) {
                values.push(value);
            }
        }
        Ok((values, with_null))
    }
}
