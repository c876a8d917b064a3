//! Schema and record types shared by every component.
//!
//! A [`Dict`] is a user-defined record schema; a [`DictItem`] is one
//! versioned record of a dict. Field-to-type tables are plain data built
//! when the schema is defined, so nothing here inspects types at runtime.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Field values of one record, in declaration order.
pub type DataMap = serde_json::Map<String, serde_json::Value>;

/// Text forms of temporal values in records and relational columns.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

pub fn format_timestamp(timestamp: &NaiveDateTime) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT).ok()
}

/// Current local wall-clock time, truncated to milliseconds so that it
/// survives a round trip through storage unchanged.
pub fn now() -> NaiveDateTime {
    let now = chrono::Local::now().naive_local();
    parse_timestamp(&format_timestamp(&now)).unwrap_or(now)
}

// ------------- Service fields -------------
pub const ID: &str = "id";
pub const MONGO_ID: &str = "_id";
pub const HISTORY: &str = "history";
pub const CREATED: &str = "created";
pub const UPDATED: &str = "updated";
pub const DELETED: &str = "deleted";
pub const VERSION: &str = "version";
pub const DELETION_REASON: &str = "deletionReason";

pub const SERVICE_FIELDS: [&str; 8] = [ID, MONGO_ID, HISTORY, CREATED, UPDATED, DELETED, VERSION, DELETION_REASON];

/// Type of a service field when it is used in a query.
pub fn service_field_type(field_id: &str) -> Option<DictFieldType> {
    match field_id {
        ID | MONGO_ID => Some(DictFieldType::String),
        VERSION => Some(DictFieldType::Integer),
        CREATED | UPDATED | DELETED => Some(DictFieldType::Timestamp),
        _ => None,
    }
}

pub fn is_service_field(field_id: &str) -> bool {
    SERVICE_FIELDS.iter().any(|s| s.eq_ignore_ascii_case(field_id))
}

// ------------- Field types -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DictFieldType {
    Integer,
    Decimal,
    String,
    Boolean,
    Date,
    Timestamp,
    Json,
    Enum,
    Attachment,
    GeoJson,
    /// Reference to a record of another (or the same) dict.
    Dict,
}

impl DictFieldType {
    pub fn is_temporal(&self) -> bool {
        matches!(self, Self::Date | Self::Timestamp)
    }
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Decimal)
    }
}

impl fmt::Display for DictFieldType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Integer => "INTEGER",
            Self::Decimal => "DECIMAL",
            Self::String => "STRING",
            Self::Boolean => "BOOLEAN",
            Self::Date => "DATE",
            Self::Timestamp => "TIMESTAMP",
            Self::Json => "JSON",
            Self::Enum => "ENUM",
            Self::Attachment => "ATTACHMENT",
            Self::GeoJson => "GEO_JSON",
            Self::Dict => "DICT",
        };
        write!(f, "{}", name)
    }
}

// ------------- Schema -------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DictFieldRef {
    pub dict_id: String,
    pub field_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DictField {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub field_type: DictFieldType,
    #[serde(default)]
    pub multivalued: bool,
    #[serde(default)]
    pub required: bool,
    /// Numeric lower bound for numbers, length lower bound for strings.
    #[serde(default)]
    pub min_size: Option<f64>,
    #[serde(default)]
    pub max_size: Option<f64>,
    #[serde(default)]
    pub enum_id: Option<String>,
    #[serde(default)]
    pub dict_ref: Option<DictFieldRef>,
}

impl DictField {
    pub fn new(id: &str, field_type: DictFieldType) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            field_type,
            multivalued: false,
            required: false,
            min_size: None,
            max_size: None,
            enum_id: None,
            dict_ref: None,
        }
    }
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
    pub fn multivalued(mut self) -> Self {
        self.multivalued = true;
        self
    }
    pub fn with_enum(mut self, enum_id: &str) -> Self {
        self.enum_id = Some(enum_id.to_string());
        self
    }
    pub fn with_reference(mut self, dict_id: &str) -> Self {
        self.dict_ref = Some(DictFieldRef { dict_id: dict_id.to_string(), field_id: ID.to_string() });
        self
    }
    pub fn with_bounds(mut self, min_size: Option<f64>, max_size: Option<f64>) -> Self {
        self.min_size = min_size;
        self.max_size = max_size;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Asc,
    Desc,
}

/// An index; `fields` keeps the declared order since leftmost-prefix
/// matching depends on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictIndex {
    pub id: String,
    pub direction: Direction,
    pub fields: Vec<String>,
}

/// A unique constraint over one or more fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictConstraint {
    pub id: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictEnum {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dict {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub fields: Vec<DictField>,
    #[serde(default)]
    pub indexes: Vec<DictIndex>,
    #[serde(default)]
    pub constraints: Vec<DictConstraint>,
    #[serde(default)]
    pub enums: Vec<DictEnum>,
    #[serde(default)]
    pub view_permission: Option<String>,
    #[serde(default)]
    pub edit_permission: Option<String>,
    #[serde(default)]
    pub deleted: Option<NaiveDateTime>,
    /// Engine that owns the data, `None` until resolved.
    #[serde(default)]
    pub engine: Option<String>,
}

impl Dict {
    pub fn new(id: &str, fields: Vec<DictField>) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            fields,
            indexes: Vec::new(),
            constraints: Vec::new(),
            enums: Vec::new(),
            view_permission: None,
            edit_permission: None,
            deleted: None,
            engine: None,
        }
    }
    pub fn with_engine(mut self, engine: &str) -> Self {
        self.engine = Some(engine.to_string());
        self
    }
    pub fn with_enum(mut self, dict_enum: DictEnum) -> Self {
        self.enums.push(dict_enum);
        self
    }
    /// Field ids are matched case-insensitively.
    pub fn field(&self, field_id: &str) -> Option<&DictField> {
        self.fields.iter().find(|f| f.id.eq_ignore_ascii_case(field_id))
    }
    pub fn dict_enum(&self, enum_id: &str) -> Option<&DictEnum> {
        self.enums.iter().find(|e| e.id == enum_id)
    }
    /// Field of this dict referencing `dict_id`, used to join one hop.
    pub fn reference_to(&self, dict_id: &str) -> Option<&DictField> {
        self.fields
            .iter()
            .find(|f| f.dict_ref.as_ref().is_some_and(|r| r.dict_id == dict_id))
    }
    pub fn referenced_dict_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for reference in self.fields.iter().filter_map(|f| f.dict_ref.as_ref()) {
            if !ids.contains(&reference.dict_id) {
                ids.push(reference.dict_id.clone());
            }
        }
        ids
    }
    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }
}

// ------------- Records -------------
#[derive(Debug, Clone, PartialEq)]
pub struct DictItem {
    pub id: String,
    pub data: DataMap,
    /// Prior states, oldest first; only ever appended to.
    pub history: Vec<DataMap>,
    pub version: i64,
    pub created: NaiveDateTime,
    pub updated: NaiveDateTime,
    pub deleted: Option<NaiveDateTime>,
    pub deletion_reason: Option<String>,
}

impl DictItem {
    pub fn new(id: String, data: DataMap, now: NaiveDateTime) -> Self {
        Self {
            id,
            data,
            history: Vec::new(),
            version: 1,
            created: now,
            updated: now,
            deleted: None,
            deletion_reason: None,
        }
    }
    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }
}

// ------------- Migration history -------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionScheme {
    pub id: String,
    /// Dict (or group of dicts) the script belongs to.
    pub target: String,
    pub version: String,
    pub script: String,
    pub checksum: String,
    pub installed: NaiveDateTime,
}
