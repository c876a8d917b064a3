//! Reference backends for the two engines.

pub mod document;
pub mod relational;

use std::sync::Arc;

use crate::config::Settings;
use crate::engine::EngineRegistry;
use crate::error::Result;

use document::{DocumentBackend, MemoryDocumentStore};
use relational::{RelationalBackend, SqliteSession};

/// Registry with the embedded SQLite session as `postgres` and the
/// in-memory document store as `mongo`.
pub fn embedded_registry(settings: &Settings) -> Result<EngineRegistry> {
    let session = Arc::new(SqliteSession::open(&settings.storage.database)?);
    EngineRegistry::from_settings(settings)
        .register(Arc::new(RelationalBackend::new(session)))
        .register(Arc::new(DocumentBackend::new(Arc::new(MemoryDocumentStore::new()))))
        .build()
}
