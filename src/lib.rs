//! Dictengine – a query compiler, schema migration engine and versioned
//! record store for user-defined dictionaries ("dicts").
//!
//! A dict is a named record schema:
//! * A [`model::Dict`] declares typed fields, enums, indexes and unique constraints.
//! * A [`model::DictItem`] is one record of a dict carrying service fields
//!   (`id`, `version`, `created`, `updated`, `deleted`, `history`).
//! * Every dict lives in exactly one storage engine (`postgres` or `mongo`).
//!
//! ## Modules
//! * [`query`] – The filter language: a pest grammar, an [`query::Expression`]
//!   tree and one translator per backend ([`query::PostgresTranslator`],
//!   [`query::MongoTranslator`]).
//! * [`ddl`] – SQL-like migration statements and the [`ddl::Interpreter`]
//!   applying them to schemas and data.
//! * [`migration`] – Versioned, checksummed migration scripts applied per
//!   target under a per-target lock.
//! * [`engine`] – Backend capability traits, the [`engine::EngineRegistry`]
//!   and engine maintenance (unset engines, moving a dict between engines).
//! * [`service`] – Dict schema operations, the optimistic record store, and
//!   record export and import.
//! * [`backend`] – Embedded implementations of both engines: SQLite for the
//!   relational engine and an in-memory document store for the document engine.
//!
//! ## Query language
//! Filters read like SQL predicates:
//! `age >= 18 and (status = 'ACTIVE' or status = 'PENDING')`. Fields of a
//! referenced dict are addressed as `dict.field`, dates can be written
//! `'2024-01-31'::date`, and multivalued fields take `tags all ['a', 'b']`
//! or `tags any ['a', 'b']`. A query is compiled against a field catalog:
//!
//! ```
//! use dictengine::model::{Dict, DictField, DictFieldType};
//! use dictengine::query::{compile, MongoTranslator};
//!
//! let catalog = vec![Dict::new("person", vec![DictField::new("age", DictFieldType::Integer)])];
//! let filter = compile(&MongoTranslator, "age >= 18", "person", &catalog).unwrap();
//! assert_eq!(filter.document, serde_json::json!({"age": {"$gte": 18}}));
//! ```
//!
//! ## Optimistic concurrency
//! Updates carry the version the caller read. The backend applies the edit
//! only when the stored version still matches, otherwise
//! [`error::DictError::DictConcurrentUpdate`] is returned and nothing changes.
pub mod backend;
pub mod config;
pub mod ddl;
pub mod engine;
pub mod error;
pub mod migration;
pub mod model;
pub mod query;
pub mod service;

pub use config::Settings;
pub use engine::EngineRegistry;
pub use error::{DictError, Result};
pub use migration::MigrationEngine;
pub use service::{DictDataService, DictService};
