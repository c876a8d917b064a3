//! Dumps the live records of a dict as CSV, SQL inserts or JSON.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::info;

use crate::error::{DictError, Result};
use crate::model::{self, Dict, DictField, DictFieldType, DictItem};
use crate::query::keyword::quote_identifier;
use crate::service::data::DictDataService;
use crate::service::dict::DictService;

/// Version of the JSON export document.
pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// Service columns leading every CSV row.
const CSV_SERVICE_COLUMNS: [&str; 5] = [model::ID, model::CREATED, model::UPDATED, model::DELETED, model::VERSION];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Sql,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Sql => "sql",
            ExportFormat::Json => "json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = DictError;
    fn from_str(format: &str) -> Result<Self> {
        match format.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "sql" => Ok(ExportFormat::Sql),
            "json" => Ok(ExportFormat::Json),
            _ => Err(DictError::Validation(format!("Unsupported export format '{}'", format))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

pub struct DictExportService {
    dicts: Arc<DictService>,
    data: Arc<DictDataService>,
}

impl DictExportService {
    pub fn new(dicts: Arc<DictService>, data: Arc<DictDataService>) -> Self {
        Self { dicts, data }
    }

    /// Exports the listed records, or every live record when `item_ids`
    /// is empty.
    pub fn export(&self, dict_id: &str, format: ExportFormat, item_ids: &[String]) -> Result<Vec<u8>> {
        let dict = self.dicts.get_by_id(dict_id)?;
        let items = if item_ids.is_empty() {
            self.data.get_by_filter(dict_id, "", false)?
        } else {
            item_ids
                .iter()
                .map(|id| self.data.get_by_id(dict_id, id, false))
                .collect::<Result<Vec<_>>>()?
        };
        let exported = match format {
            ExportFormat::Csv => csv_export(&dict, &items)?,
            ExportFormat::Sql => sql_export(&dict, &items).into_bytes(),
            ExportFormat::Json => serde_json::to_vec_pretty(&json_export(&dict, &items)?)?,
        };
        info!(dict = %dict.id, %format, items = items.len(), bytes = exported.len(), "dict exported");
        Ok(exported)
    }
}

/// `<dict>.<ext>`, or `<dict>_<n>_items.<ext>` for a selection.
pub fn file_name(dict_id: &str, format: ExportFormat, item_ids: &[String]) -> String {
    match item_ids.len() {
        0 => format!("{}.{}", dict_id, format.extension()),
        n => format!("{}_{}_items.{}", dict_id, n, format.extension()),
    }
}

/// Text of a value in a CSV cell: strings as they are, missing values
/// empty, everything else as JSON.
fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn csv_export(dict: &Dict, items: &[DictItem]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let header = CSV_SERVICE_COLUMNS.iter().copied().chain(dict.fields.iter().map(|f| f.id.as_str()));
    writer.write_record(header)?;
    for item in items {
        let mut row = vec![
            item.id.clone(),
            model::format_timestamp(&item.created),
            model::format_timestamp(&item.updated),
            item.is_deleted().to_string(),
            item.version.to_string(),
        ];
        row.extend(dict.fields.iter().map(|f| cell(item.data.get(&f.id))));
        writer.write_record(&row)?;
    }
    writer.into_inner().map_err(|e| DictError::Serialization(e.to_string()))
}

fn sql_string(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn sql_scalar(field: &DictField, value: &Value) -> String {
    match (field.field_type, value) {
        (_, Value::Null) => "null".to_string(),
        (DictFieldType::Json | DictFieldType::GeoJson, other) => format!("{}::json", sql_string(&other.to_string())),
        // canonical decimals are valid number literals
        (DictFieldType::Decimal, Value::String(d)) if d.parse::<f64>().is_ok() => d.clone(),
        (_, Value::String(s)) => sql_string(s),
        (_, Value::Number(n)) => n.to_string(),
        (_, Value::Bool(b)) => b.to_string(),
        (_, other) => sql_string(&other.to_string()),
    }
}

fn sql_value(field: &DictField, value: &Value) -> String {
    match value {
        Value::Array(values) if field.multivalued => {
            let elements: Vec<String> = values.iter().map(|v| sql_scalar(field, v)).collect();
            format!("array[{}]", elements.join(", "))
        }
        other => sql_scalar(field, other),
    }
}

/// One `insert` per record, readable by the DDL interpreter.
fn sql_export(dict: &Dict, items: &[DictItem]) -> String {
    let table = quote_identifier(&dict.id);
    let mut statements = Vec::with_capacity(items.len());
    for item in items {
        let mut columns = vec![model::ID.to_string()];
        let mut values = vec![sql_string(&item.id)];
        for field in &dict.fields {
            if let Some(value) = item.data.get(&field.id) {
                columns.push(quote_identifier(&field.id));
                values.push(sql_value(field, value));
            }
        }
        statements.push(format!("insert into {} ({}) values ({});", table, columns.join(", "), values.join(", ")));
    }
    statements.join("\n")
}

/// A record as one flat document: id, field values, then service fields.
pub fn item_document(item: &DictItem) -> Value {
    let mut document = Map::new();
    document.insert(model::ID.to_string(), Value::String(item.id.clone()));
    document.extend(item.data.clone());
    document.insert(model::VERSION.to_string(), Value::from(item.version));
    document.insert(model::CREATED.to_string(), Value::String(model::format_timestamp(&item.created)));
    document.insert(model::UPDATED.to_string(), Value::String(model::format_timestamp(&item.updated)));
    document.insert(
        model::DELETED.to_string(),
        item.deleted.as_ref().map_or(Value::Null, |d| Value::String(model::format_timestamp(d))),
    );
    document.insert(model::HISTORY.to_string(), Value::Array(item.history.iter().cloned().map(Value::Object).collect()));
    Value::Object(document)
}

fn json_export(dict: &Dict, items: &[DictItem]) -> Result<Value> {
    Ok(json!({
        "version": EXPORT_FORMAT_VERSION,
        "dict": serde_json::to_value(dict)?,
        "items": items.iter().map(item_document).collect::<Vec<_>>(),
    }))
}
