use thiserror::Error;

#[derive(Error, Debug)]
pub enum DictError {
    #[error("Query syntax error at position {position} near '{fragment}': {message}")]
    QuerySyntax { message: String, position: usize, fragment: String },
    #[error("Cannot cast '{literal}' to {target}, supported date patterns: {patterns}")]
    Cast { literal: String, target: String, patterns: String },
    #[error("Unsupported cast target '{target}', supported types for cast: date, timestamp")]
    UnsupportedCast { target: String },
    #[error("Invalid {kind} constant '{value}'")]
    InvalidConstant { kind: String, value: String },
    #[error("Cast to {target} is not applicable to field '{field}' of type {field_type}")]
    IncompatibleCast { field: String, field_type: String, target: String },
    #[error("Field '{field_id}' not found in dict '{dict_id}'")]
    UnknownField { dict_id: String, field_id: String },
    #[error("DDL syntax error at position {position} near '{fragment}': {message}")]
    DdlSyntax { message: String, position: usize, fragment: String },
    #[error("Cannot read migration '{file}': {reason}")]
    MigrationFileRead { file: String, reason: String },
    #[error("Migrations of '{target}' share version {version}: {}", .scripts.join(", "))]
    MigrationsHasSameVersion { target: String, version: String, scripts: Vec<String> },
    #[error("Migration '{script}' failed: {source}")]
    MigrationApplied {
        script: String,
        #[source]
        source: Box<DictError>,
    },
    #[error("Checksum of applied migration '{script}' changed (recorded {recorded}, found {actual})")]
    MigrationChecksumMismatch { script: String, recorded: String, actual: String },
    #[error("Migration '{script}' has version {version} but '{target}' is already at {installed}")]
    MigrationOutOfOrder { target: String, script: String, version: String, installed: String },
    #[error("Engine error: {0}")]
    Engine(String),
    #[error("Dict '{dict_id}' not found")]
    DictNotFound { dict_id: String },
    #[error("Dict '{dict_id}' already exists")]
    AlreadyExists { dict_id: String },
    #[error("Item '{item_id}' not found in dict '{dict_id}'")]
    ItemNotFound { dict_id: String, item_id: String },
    #[error("Enum '{enum_id}' not found in dict '{dict_id}'")]
    EnumNotFound { dict_id: String, enum_id: String },
    #[error("Item '{item_id}' of dict '{dict_id}' was concurrently updated (expected version {expected}, stored version {actual})")]
    DictConcurrentUpdate { dict_id: String, item_id: String, expected: i64, actual: i64 },
    #[error("Storage migration of dict '{dict_id}' failed: {message}")]
    DictStorageMigration { dict_id: String, message: String },
    #[error("Rollback of dict '{dict_id}' failed: {message}")]
    DictRollback { dict_id: String, message: String },
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, DictError>;

// Helper conversions
impl From<rusqlite::Error> for DictError {
    fn from(e: rusqlite::Error) -> Self { Self::Persistence(e.to_string()) }
}
impl From<serde_json::Error> for DictError {
    fn from(e: serde_json::Error) -> Self { Self::Serialization(e.to_string()) }
}
impl From<csv::Error> for DictError {
    fn from(e: csv::Error) -> Self { Self::Serialization(e.to_string()) }
}
impl From<config::ConfigError> for DictError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
impl<T> From<std::sync::PoisonError<T>> for DictError {
    fn from(e: std::sync::PoisonError<T>) -> Self { Self::Lock(e.to_string()) }
}
