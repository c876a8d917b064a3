use std::str::FromStr;

use crate::error::DictError;
use crate::model::DictFieldType;

/// Column types of the schema language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Int,
    Decimal,
    Text,
    Bool,
    Date,
    Timestamp,
    Enum,
    Json,
    Attachment,
    GeoJson,
}

impl ColumnType {
    pub const ALL: [ColumnType; 10] = [
        ColumnType::Int,
        ColumnType::Decimal,
        ColumnType::Text,
        ColumnType::Bool,
        ColumnType::Date,
        ColumnType::Timestamp,
        ColumnType::Enum,
        ColumnType::Json,
        ColumnType::Attachment,
        ColumnType::GeoJson,
    ];

    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            ColumnType::Int => &["int"],
            ColumnType::Decimal => &["decimal"],
            ColumnType::Text => &["text"],
            ColumnType::Bool => &["bool", "boolean"],
            ColumnType::Date => &["date"],
            ColumnType::Timestamp => &["timestamp"],
            ColumnType::Enum => &["anything"],
            ColumnType::Json => &["json"],
            ColumnType::Attachment => &["attachment"],
            ColumnType::GeoJson => &["geo_json"],
        }
    }

    /// Case-insensitive alias lookup. Any other token is taken to be the
    /// id of an enum, so the result is `Enum` rather than an error.
    pub fn from_token(token: &str) -> ColumnType {
        let token = token.to_ascii_lowercase();
        ColumnType::ALL
            .into_iter()
            .find(|t| t.aliases().contains(&token.as_str()))
            .unwrap_or(ColumnType::Enum)
    }

    pub fn to_dict_field_type(self) -> DictFieldType {
        match self {
            ColumnType::Int => DictFieldType::Integer,
            ColumnType::Decimal => DictFieldType::Decimal,
            ColumnType::Text => DictFieldType::String,
            ColumnType::Bool => DictFieldType::Boolean,
            ColumnType::Date => DictFieldType::Date,
            ColumnType::Timestamp => DictFieldType::Timestamp,
            ColumnType::Enum => DictFieldType::Enum,
            ColumnType::Json => DictFieldType::Json,
            ColumnType::Attachment => DictFieldType::Attachment,
            ColumnType::GeoJson => DictFieldType::GeoJson,
        }
    }

    /// Inverse mapping; a dict reference has no column type of its own.
    pub fn from_dict_field_type(field_type: DictFieldType) -> Option<ColumnType> {
        match field_type {
            DictFieldType::Integer => Some(ColumnType::Int),
            DictFieldType::Decimal => Some(ColumnType::Decimal),
            DictFieldType::String => Some(ColumnType::Text),
            DictFieldType::Boolean => Some(ColumnType::Bool),
            DictFieldType::Date => Some(ColumnType::Date),
            DictFieldType::Timestamp => Some(ColumnType::Timestamp),
            DictFieldType::Enum => Some(ColumnType::Enum),
            DictFieldType::Json => Some(ColumnType::Json),
            DictFieldType::Attachment => Some(ColumnType::Attachment),
            DictFieldType::GeoJson => Some(ColumnType::GeoJson),
            DictFieldType::Dict => None,
        }
    }
}

impl FromStr for ColumnType {
    type Err = DictError;
    fn from_str(token: &str) -> Result<Self, Self::Err> {
        Ok(ColumnType::from_token(token))
    }
}
