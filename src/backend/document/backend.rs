use std::sync::Arc;

use chrono::NaiveDateTime;
use serde_json::{Map, Value as Json, json};

use crate::backend::document::store::{DocumentSession, Lookup, by_id};
use crate::config;
use crate::engine::{
    DictBackend, DictDataBackend, DictSchemeBackend, Engine, ItemMutation, TransactionBackend, VersionSchemeBackend,
};
use crate::error::{DictError, Result};
use crate::model::{self, DataMap, Dict, DictField, DictFieldType, DictItem, VersionScheme};
use crate::query::constant;
use crate::query::mongo::{self, MongoTranslator};
use crate::query::{Expression, TranslationContext, Translator};

const DICT_COLLECTION: &str = "dict";
const VERSION_COLLECTION: &str = "version_scheme";

/// The `mongo` engine over any [`DocumentSession`]: one collection per
/// dict, values in extended JSON.
pub struct DocumentBackend<S: DocumentSession> {
    session: Arc<S>,
}

impl<S: DocumentSession> DocumentBackend<S> {
    pub fn new(session: Arc<S>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    /// Rejects `item` when another live item holds the same values for
    /// one of the dict's unique constraints.
    fn check_unique(&self, dict: &Dict, item: &DictItem) -> Result<()> {
        if item.is_deleted() {
            return Ok(());
        }
        for constraint in &dict.constraints {
            let mut conditions = vec![
                json!({ "_id": { "$ne": item.id } }),
                json!({ "deleted": null }),
            ];
            for field_id in &constraint.fields {
                let Some((field, value)) = dict.field(field_id).zip(item.data.get(field_id)) else {
                    conditions.clear();
                    break;
                };
                let mut condition = Map::new();
                condition.insert(field.id.clone(), encode_field(field, value)?);
                conditions.push(Json::Object(condition));
            }
            if conditions.is_empty() {
                continue;
            }
            if !self.session.find(&dict.id, &json!({ "$and": conditions }), &[])?.is_empty() {
                return Err(DictError::Validation(format!(
                    "Unique constraint '{}' of dict '{}' is violated",
                    constraint.id, dict.id
                )));
            }
        }
        Ok(())
    }
}

fn date_json(timestamp: &NaiveDateTime) -> Json {
    json!({ "$date": timestamp.format(mongo::TIMESTAMP_FORMAT).to_string() })
}

fn parse_date_json(value: &Json) -> Option<NaiveDateTime> {
    let text = value.get("$date")?.as_str()?;
    NaiveDateTime::parse_from_str(text, mongo::TIMESTAMP_FORMAT).ok()
}

fn encode_scalar(field: &DictField, value: &Json) -> Result<Json> {
    let invalid = || DictError::Validation(format!("Value {} does not fit field '{}'", value, field.id));
    Ok(match (field.field_type, value) {
        (DictFieldType::Decimal, Json::String(d)) => json!({ "$numberDecimal": d }),
        (DictFieldType::Date, Json::String(d)) => {
            let date = constant::parse_date(d).map_err(|_| invalid())?;
            date_json(&date.and_time(chrono::NaiveTime::MIN))
        }
        (DictFieldType::Timestamp, Json::String(ts)) => date_json(&model::parse_timestamp(ts).ok_or_else(invalid)?),
        (_, other) => other.clone(),
    })
}

fn encode_field(field: &DictField, value: &Json) -> Result<Json> {
    match value {
        Json::Array(values) if field.multivalued => {
            Ok(Json::Array(values.iter().map(|v| encode_scalar(field, v)).collect::<Result<_>>()?))
        }
        other => encode_scalar(field, other),
    }
}

fn decode_scalar(field: &DictField, value: Json) -> Result<Json> {
    Ok(match field.field_type {
        DictFieldType::Decimal => match value.get("$numberDecimal").and_then(|d| d.as_str()) {
            Some(d) => Json::String(constant::canonical_decimal(d)?),
            None => value,
        },
        DictFieldType::Date => match parse_date_json(&value) {
            Some(ts) => Json::String(ts.date().format(model::DATE_FORMAT).to_string()),
            None => value,
        },
        DictFieldType::Timestamp => match parse_date_json(&value) {
            Some(ts) => Json::String(model::format_timestamp(&ts)),
            None => value,
        },
        _ => value,
    })
}

fn decode_field(field: &DictField, value: Json) -> Result<Json> {
    match value {
        Json::Array(values) if field.multivalued => {
            Ok(Json::Array(values.into_iter().map(|v| decode_scalar(field, v)).collect::<Result<_>>()?))
        }
        other => decode_scalar(field, other),
    }
}

fn to_document(dict: &Dict, item: &DictItem) -> Result<Json> {
    let mut document = Map::new();
    document.insert(model::MONGO_ID.to_string(), Json::String(item.id.clone()));
    for field in &dict.fields {
        if let Some(value) = item.data.get(&field.id) {
            document.insert(field.id.clone(), encode_field(field, value)?);
        }
    }
    document.insert(model::HISTORY.to_string(), serde_json::to_value(&item.history)?);
    document.insert(model::VERSION.to_string(), Json::from(item.version));
    document.insert(model::CREATED.to_string(), date_json(&item.created));
    document.insert(model::UPDATED.to_string(), date_json(&item.updated));
    document.insert(model::DELETED.to_string(), item.deleted.as_ref().map_or(Json::Null, date_json));
    document.insert(
        model::DELETION_REASON.to_string(),
        item.deletion_reason.clone().map_or(Json::Null, Json::String),
    );
    Ok(Json::Object(document))
}

fn from_document(dict: &Dict, document: Json) -> Result<DictItem> {
    let Json::Object(mut document) = document else {
        return Err(DictError::Persistence(format!("stored item of '{}' is not a document", dict.id)));
    };
    let missing = |key: &str| DictError::Persistence(format!("document of '{}' has no {}", dict.id, key));
    let mut data = DataMap::new();
    for field in &dict.fields {
        if let Some(value) = document.remove(&field.id).filter(|v| !v.is_null()) {
            data.insert(field.id.clone(), decode_field(field, value)?);
        }
    }
    let timestamp = |key: &str| document.get(key).and_then(parse_date_json);
    Ok(DictItem {
        id: document
            .get(model::MONGO_ID)
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .ok_or_else(|| missing(model::MONGO_ID))?,
        data,
        history: match document.get(model::HISTORY) {
            Some(history) => serde_json::from_value(history.clone())?,
            None => Vec::new(),
        },
        version: document
            .get(model::VERSION)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| missing(model::VERSION))?,
        created: timestamp(model::CREATED).ok_or_else(|| missing(model::CREATED))?,
        updated: timestamp(model::UPDATED).ok_or_else(|| missing(model::UPDATED))?,
        deleted: timestamp(model::DELETED),
        deletion_reason: document
            .get(model::DELETION_REASON)
            .and_then(|r| r.as_str())
            .map(str::to_string),
    })
}

fn with_id<T: serde::Serialize>(id: &str, value: &T) -> Result<Json> {
    let mut document = serde_json::to_value(value)?;
    if let Json::Object(map) = &mut document {
        map.insert(model::MONGO_ID.to_string(), Json::String(id.to_string()));
    }
    Ok(document)
}

fn without_id<T: serde::de::DeserializeOwned>(mut document: Json) -> Result<T> {
    if let Json::Object(map) = &mut document {
        map.remove(model::MONGO_ID);
    }
    Ok(serde_json::from_value(document)?)
}

impl<S: DocumentSession> Engine for DocumentBackend<S> {
    fn engine_name(&self) -> &str {
        config::MONGO
    }

    fn dict_exists(&self) -> Result<bool> {
        self.session.collection_exists(DICT_COLLECTION)
    }

    fn version_scheme_exists(&self) -> Result<bool> {
        self.session.collection_exists(VERSION_COLLECTION)
    }
}

impl<S: DocumentSession> DictBackend for DocumentBackend<S> {
    fn create_dict_store(&self) -> Result<()> {
        self.session.create_collection(DICT_COLLECTION)
    }

    fn get_dict(&self, dict_id: &str) -> Result<Option<Dict>> {
        self.session.find_by_id(DICT_COLLECTION, dict_id)?.map(without_id::<Dict>).transpose()
    }

    fn all_dicts(&self) -> Result<Vec<Dict>> {
        self.session
            .find(DICT_COLLECTION, &json!({}), &[])?
            .into_iter()
            .map(without_id)
            .collect()
    }

    fn save_dict(&self, dict: &Dict) -> Result<()> {
        let document = with_id(&dict.id, dict)?;
        if self.session.replace_one(DICT_COLLECTION, &by_id(&dict.id), document.clone())? == 0 {
            self.session.insert_one(DICT_COLLECTION, document)?;
        }
        Ok(())
    }

    fn remove_dict(&self, dict_id: &str) -> Result<()> {
        self.session.delete_one(DICT_COLLECTION, &by_id(dict_id))?;
        Ok(())
    }
}

impl<S: DocumentSession> DictSchemeBackend for DocumentBackend<S> {
    fn scheme_exists(&self, dict_id: &str) -> Result<bool> {
        self.session.collection_exists(dict_id)
    }

    fn create_scheme(&self, dict: &Dict) -> Result<()> {
        if self.session.collection_exists(&dict.id)? {
            return Err(DictError::AlreadyExists { dict_id: dict.id.clone() });
        }
        self.session.create_collection(&dict.id)
    }

    fn update_scheme(&self, previous: &Dict, current: &Dict) -> Result<()> {
        for field in &previous.fields {
            match current.field(&field.id) {
                None => self.session.unset_key(&current.id, &field.id)?,
                Some(kept) if kept.field_type != field.field_type || kept.multivalued != field.multivalued => {
                    return Err(DictError::Validation(format!(
                        "Field '{}' of dict '{}' cannot change its type from {} to {}",
                        field.id, current.id, field.field_type, kept.field_type
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn rename_field(&self, dict: &Dict, from: &str, to: &str) -> Result<()> {
        self.session.rename_key(&dict.id, from, to)
    }

    fn drop_scheme(&self, dict: &Dict) -> Result<()> {
        self.session.drop_collection(&dict.id)
    }
}

impl<S: DocumentSession> DictDataBackend for DocumentBackend<S> {
    fn insert(&self, dict: &Dict, item: &DictItem) -> Result<()> {
        self.session.atomically(|| {
            self.check_unique(dict, item)?;
            self.session.insert_one(&dict.id, to_document(dict, item)?)
        })
    }

    fn get_by_id(&self, dict: &Dict, item_id: &str) -> Result<Option<DictItem>> {
        self.session
            .find_by_id(&dict.id, item_id)?
            .map(|document| from_document(dict, document))
            .transpose()
    }

    fn find(&self, dict: &Dict, catalog: &[Dict], filter: &Expression, include_deleted: bool) -> Result<Vec<DictItem>> {
        let translated = MongoTranslator.translate(filter, &TranslationContext::new(&dict.id, &catalog))?;
        let mut lookups = Vec::new();
        for joined in translated.participant_dict_ids.iter().filter(|id| **id != dict.id) {
            let reference = dict.reference_to(joined).ok_or_else(|| {
                DictError::Validation(format!("Dict '{}' has no reference to '{}'", dict.id, joined))
            })?;
            lookups.push(Lookup { from: joined.clone(), local_field: reference.id.clone(), as_field: joined.clone() });
        }
        let document = if include_deleted {
            translated.document
        } else {
            json!({ "$and": [translated.document, { "deleted": null }] })
        };
        self.session
            .find(&dict.id, &document, &lookups)?
            .into_iter()
            .map(|document| from_document(dict, document))
            .collect()
    }

    fn modify(&self, dict: &Dict, item_id: &str, expected_version: Option<i64>, mutation: ItemMutation) -> Result<DictItem> {
        self.session.atomically(|| {
            let stored = self.get_by_id(dict, item_id)?.ok_or_else(|| DictError::ItemNotFound {
                dict_id: dict.id.clone(),
                item_id: item_id.to_string(),
            })?;
            if let Some(expected) = expected_version.filter(|expected| *expected != stored.version) {
                return Err(DictError::DictConcurrentUpdate {
                    dict_id: dict.id.clone(),
                    item_id: item_id.to_string(),
                    expected,
                    actual: stored.version,
                });
            }
            let read_version = stored.version;
            let modified = mutation(stored)?;
            self.check_unique(dict, &modified)?;
            let filter = json!({ "_id": item_id, "version": read_version });
            if self.session.replace_one(&dict.id, &filter, to_document(dict, &modified)?)? == 0 {
                return Err(DictError::DictConcurrentUpdate {
                    dict_id: dict.id.clone(),
                    item_id: item_id.to_string(),
                    expected: read_version,
                    actual: self.get_by_id(dict, item_id)?.map_or(read_version, |item| item.version),
                });
            }
            Ok(modified)
        })
    }

    fn all_items(&self, dict: &Dict) -> Result<Vec<DictItem>> {
        self.session
            .find(&dict.id, &json!({}), &[])?
            .into_iter()
            .map(|document| from_document(dict, document))
            .collect()
    }
}

impl<S: DocumentSession> VersionSchemeBackend for DocumentBackend<S> {
    fn create_version_store(&self) -> Result<()> {
        self.session.create_collection(VERSION_COLLECTION)
    }

    fn versions(&self, target: &str) -> Result<Vec<VersionScheme>> {
        self.session
            .find(VERSION_COLLECTION, &json!({ "target": target }), &[])?
            .into_iter()
            .map(without_id)
            .collect()
    }

    fn record_version(&self, row: &VersionScheme) -> Result<()> {
        self.session.insert_one(VERSION_COLLECTION, with_id(&row.id, row)?)
    }
}

impl<S: DocumentSession> TransactionBackend for DocumentBackend<S> {
    fn begin(&self) -> Result<()> {
        self.session.begin()
    }

    fn commit(&self) -> Result<()> {
        self.session.commit()
    }

    fn rollback(&self) -> Result<()> {
        self.session.rollback()
    }
}
