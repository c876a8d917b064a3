use std::sync::Arc;

use serde_json::json;

use dictengine::backend::document::{DocumentBackend, MemoryDocumentStore};
use dictengine::backend::embedded_registry;
use dictengine::backend::relational::{RelationalBackend, SqliteSession};
use dictengine::engine::{
    DictBackend, DictEngineUpdater, DictSchemeBackend, DictStorageMigrationService, Engine, TransactionBackend,
    in_transaction,
};
use dictengine::error::DictError;
use dictengine::model::{DataMap, Dict, DictField, DictFieldType};
use dictengine::{DictDataService, DictService, EngineRegistry, Settings};

fn setup() -> (Arc<EngineRegistry>, Arc<DictService>, Arc<DictDataService>) {
    let registry = Arc::new(embedded_registry(&Settings::default()).expect("registry"));
    registry.initialize().expect("initialize");
    let dicts = Arc::new(DictService::new(registry.clone()));
    let data = Arc::new(DictDataService::new(dicts.clone()));
    (registry, dicts, data)
}

fn data(value: serde_json::Value) -> DataMap {
    value.as_object().cloned().expect("object")
}

fn relational() -> Arc<RelationalBackend<SqliteSession>> {
    Arc::new(RelationalBackend::new(Arc::new(SqliteSession::open(":memory:").expect("sqlite"))))
}

#[test]
fn every_available_engine_needs_a_backend() {
    let result = EngineRegistry::builder(&["postgres", "mongo"], "postgres")
        .register(relational())
        .build();
    let Err(DictError::Engine(message)) = result else {
        panic!("registry without a mongo backend was built");
    };
    assert!(message.contains("mongo"), "{}", message);
}

#[test]
fn default_engine_must_be_available() {
    let result = EngineRegistry::builder(&["postgres"], "mongo").register(relational()).build();
    assert!(matches!(result, Err(DictError::Engine(_))));
}

#[test]
fn two_backends_for_one_engine_are_rejected() {
    let result = EngineRegistry::builder(&["postgres"], "postgres")
        .register(relational())
        .register(relational())
        .build();
    assert!(matches!(result, Err(DictError::Engine(_))));
}

#[test]
fn backends_are_found_by_engine_name() {
    let registry = EngineRegistry::builder(&["postgres", "mongo"], "mongo")
        .register(relational())
        .register(Arc::new(DocumentBackend::new(Arc::new(MemoryDocumentStore::new()))))
        .build()
        .expect("registry");
    assert_eq!(registry.engine_names(), vec!["mongo", "postgres"]);
    assert_eq!(registry.default_engine(), "mongo");
    assert_eq!(registry.dict_backend().expect("dict backend").engine_name(), "mongo");
    assert_eq!(registry.data_backend("postgres").expect("postgres").engine_name(), "postgres");
    let Err(DictError::Engine(message)) = registry.data_backend("cassandra") else {
        panic!("unknown engine resolved");
    };
    assert!(message.contains("cassandra"));
}

#[test]
fn dicts_get_the_default_engine() {
    let (_, dicts, _) = setup();
    let created = dicts
        .create(Dict::new("city", vec![DictField::new("name", DictFieldType::String)]))
        .expect("create");
    assert_eq!(created.engine.as_deref(), Some("postgres"));
    let stored = dicts
        .create(Dict::new("log", vec![DictField::new("line", DictFieldType::String)]).with_engine("mongo"))
        .expect("create");
    assert_eq!(stored.engine.as_deref(), Some("mongo"));
}

#[test]
fn updater_assigns_the_engine_holding_the_scheme() {
    let (registry, dicts, _) = setup();
    let legacy = Dict::new("legacy", vec![DictField::new("code", DictFieldType::String)]).with_engine("mongo");
    registry.scheme_backend("mongo").expect("mongo").create_scheme(&legacy).expect("scheme");
    let unresolved = Dict { engine: None, ..legacy };
    registry.dict_backend().expect("dict backend").save_dict(&unresolved).expect("save");
    dicts
        .create(Dict::new("city", vec![DictField::new("name", DictFieldType::String)]))
        .expect("create");

    let updater = DictEngineUpdater::new(registry.clone());
    let updated = updater.setup_dict_engines_if_null().expect("update");
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].id, "legacy");
    assert_eq!(dicts.get_by_id("legacy").expect("legacy").engine.as_deref(), Some("mongo"));
    assert!(updater.setup_dict_engines_if_null().expect("second run").is_empty());
}

#[test]
fn updater_fails_for_a_dict_without_scheme() {
    let (registry, _, _) = setup();
    let orphan = Dict::new("orphan", vec![DictField::new("code", DictFieldType::String)]);
    registry.dict_backend().expect("dict backend").save_dict(&orphan).expect("save");
    let error = DictEngineUpdater::new(registry).setup_dict_engines_if_null().expect_err("orphan");
    assert!(matches!(error, DictError::Engine(ref message) if message.contains("orphan")));
}

#[test]
fn updater_waits_for_initialized_stores() {
    let registry = Arc::new(embedded_registry(&Settings::default()).expect("registry"));
    assert!(DictEngineUpdater::new(registry).setup_dict_engines_if_null().expect("update").is_empty());
}

#[test]
fn storage_migration_moves_items_with_their_history() {
    let (registry, dicts, data_service) = setup();
    dicts
        .create(Dict::new(
            "city",
            vec![
                DictField::new("name", DictFieldType::String).required(),
                DictField::new("population", DictFieldType::Integer),
            ],
        ))
        .expect("create");
    data_service.create("city", data(json!({"id": "osl", "name": "Oslo", "population": 700000}))).expect("oslo");
    data_service.create("city", data(json!({"id": "sto", "name": "Stockholm"}))).expect("stockholm");
    data_service
        .update("city", "osl", 1, data(json!({"name": "Oslo", "population": 710000})))
        .expect("update");
    data_service.delete("city", "sto", Some("merged".to_string())).expect("delete");

    let migrated = DictStorageMigrationService::new(registry.clone(), dicts.clone())
        .migrate("city", "mongo")
        .expect("migrate");
    assert_eq!(migrated.engine.as_deref(), Some("mongo"));
    assert_eq!(dicts.get_by_id("city").expect("city").engine.as_deref(), Some("mongo"));
    assert!(!registry.scheme_backend("postgres").expect("postgres").scheme_exists("city").expect("exists"));
    assert!(registry.scheme_backend("mongo").expect("mongo").scheme_exists("city").expect("exists"));

    let oslo = data_service.get_by_id("city", "osl", false).expect("oslo");
    assert_eq!(oslo.version, 2);
    assert_eq!(oslo.history.len(), 1);
    assert_eq!(oslo.data.get("population"), Some(&json!(710000)));
    let stockholm = data_service.get_by_id("city", "sto", true).expect("stockholm");
    assert!(stockholm.is_deleted());
    assert_eq!(stockholm.deletion_reason.as_deref(), Some("merged"));

    let found = data_service.get_by_filter("city", "population > 500000", false).expect("filter");
    assert_eq!(found.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["osl"]);
}

#[test]
fn storage_migration_needs_another_engine() {
    let (registry, dicts, _) = setup();
    dicts
        .create(Dict::new("city", vec![DictField::new("name", DictFieldType::String)]))
        .expect("create");
    let service = DictStorageMigrationService::new(registry.clone(), dicts.clone());
    assert!(matches!(
        service.migrate("city", "postgres"),
        Err(DictError::DictStorageMigration { ref dict_id, .. }) if dict_id == "city"
    ));
    assert!(matches!(service.migrate("city", "cassandra"), Err(DictError::DictStorageMigration { .. })));
    assert!(matches!(service.migrate("nowhere", "mongo"), Err(DictError::DictNotFound { .. })));
    assert_eq!(dicts.get_by_id("city").expect("city").engine.as_deref(), Some("postgres"));
    assert!(registry.scheme_backend("postgres").expect("postgres").scheme_exists("city").expect("exists"));
}

/// Begins and rolls back, but never commits.
struct UncommittableBackend;

impl Engine for UncommittableBackend {
    fn engine_name(&self) -> &str {
        "uncommittable"
    }
    fn dict_exists(&self) -> dictengine::Result<bool> {
        Ok(true)
    }
    fn version_scheme_exists(&self) -> dictengine::Result<bool> {
        Ok(true)
    }
}

impl TransactionBackend for UncommittableBackend {
    fn begin(&self) -> dictengine::Result<()> {
        Ok(())
    }
    fn commit(&self) -> dictengine::Result<()> {
        Err(DictError::Persistence("commit refused".to_string()))
    }
    fn rollback(&self) -> dictengine::Result<()> {
        Ok(())
    }
}

#[test]
fn failed_commit_releases_every_backend() {
    let backend = relational();
    backend.create_dict_store().expect("dict store");
    let backends: [Arc<dyn TransactionBackend>; 2] = [backend.clone(), Arc::new(UncommittableBackend)];
    let result = in_transaction(&backends, || {
        backend.save_dict(&Dict::new("kept", vec![DictField::new("a", DictFieldType::String)]))
    });
    assert!(matches!(result, Err(DictError::Persistence(_))), "{:?}", result);
    assert!(backend.get_dict("kept").expect("lookup").is_none());

    // another thread can start a transaction right away
    let (sender, receiver) = std::sync::mpsc::channel();
    let other = backend.clone();
    let worker = std::thread::spawn(move || {
        let outcome = other.begin().and_then(|_| other.commit());
        sender.send(outcome.is_ok()).expect("send");
    });
    let finished = receiver.recv_timeout(std::time::Duration::from_secs(5)).expect("transaction still held");
    assert!(finished);
    worker.join().expect("worker");
}
