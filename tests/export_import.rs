use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Value, json};

use dictengine::backend::embedded_registry;
use dictengine::ddl::{Interpreter, parse_ddl};
use dictengine::error::DictError;
use dictengine::model::{DataMap, Dict, DictField, DictFieldType};
use dictengine::service::export::file_name;
use dictengine::service::{DictExportService, ExportFormat, ImportJsonService};
use dictengine::{DictDataService, DictService, Settings};

fn setup() -> (Arc<DictService>, Arc<DictDataService>) {
    let registry = Arc::new(embedded_registry(&Settings::default()).expect("registry"));
    registry.initialize().expect("initialize");
    let dicts = Arc::new(DictService::new(registry));
    let data = Arc::new(DictDataService::new(dicts.clone()));
    (dicts, data)
}

fn task() -> Dict {
    Dict::new(
        "task",
        vec![
            DictField::new("title", DictFieldType::String),
            DictField::new("points", DictFieldType::Decimal),
            DictField::new("labels", DictFieldType::String).multivalued(),
            DictField::new("done", DictFieldType::Boolean),
            DictField::new("extra", DictFieldType::Json),
        ],
    )
}

fn map(value: Value) -> DataMap {
    value.as_object().cloned().expect("object")
}

/// `task` with two records.
fn tasks() -> (Arc<DictService>, Arc<DictDataService>, DictExportService) {
    let (dicts, data) = setup();
    dicts.create(task()).expect("task");
    data.create(
        "task",
        map(json!({"id": "t1", "title": "first, with comma", "points": 1.50, "labels": ["a", "b"], "extra": {"k": 1}})),
    )
    .expect("t1");
    data.create("task", map(json!({"id": "t2", "title": "it's done", "done": true}))).expect("t2");
    let export = DictExportService::new(dicts.clone(), data.clone());
    (dicts, data, export)
}

#[test]
fn csv_has_service_columns_then_fields() {
    let (_, _, export) = tasks();
    let bytes = export.export("task", ExportFormat::Csv, &[]).expect("csv");
    let mut reader = csv::Reader::from_reader(bytes.as_slice());
    let header: Vec<String> = reader.headers().expect("header").iter().map(str::to_string).collect();
    assert_eq!(header, ["id", "created", "updated", "deleted", "version", "title", "points", "labels", "done", "extra"]);

    let rows: BTreeMap<String, csv::StringRecord> = reader
        .records()
        .map(|record| record.expect("record"))
        .map(|record| (record[0].to_string(), record))
        .collect();
    assert_eq!(rows.len(), 2);
    let first = &rows["t1"];
    assert_eq!(&first[3], "false");
    assert_eq!(&first[4], "1");
    assert_eq!(&first[5], "first, with comma");
    assert_eq!(&first[6], "1.5");
    assert_eq!(&first[7], r#"["a","b"]"#);
    assert_eq!(&first[8], "");
    assert_eq!(&rows["t2"][8], "true");
}

#[test]
fn sql_export_replays_through_the_interpreter() {
    let (_, data, export) = tasks();
    let script = String::from_utf8(export.export("task", ExportFormat::Sql, &[]).expect("sql")).expect("utf-8");
    assert_eq!(script.lines().count(), 2);
    assert!(script.contains("'it''s done'"), "{}", script);

    let (dicts, copy) = setup();
    dicts.create(task()).expect("task");
    let interpreter = Interpreter::new(dicts.clone(), copy.clone());
    interpreter.execute(&parse_ddl(&script).expect("parse")).expect("replay");
    for id in ["t1", "t2"] {
        let original = data.get_by_id("task", id, false).expect("original");
        let replayed = copy.get_by_id("task", id, false).expect("replayed");
        assert_eq!(replayed.data, original.data, "{}", id);
    }
}

#[test]
fn json_export_carries_the_dict_and_records() {
    let (_, _, export) = tasks();
    let selected = vec!["t2".to_string()];
    let bytes = export.export("task", ExportFormat::Json, &selected).expect("json");
    let document: Value = serde_json::from_slice(&bytes).expect("document");
    assert_eq!(document["version"], json!(1));
    assert_eq!(document["dict"]["id"], json!("task"));
    let items = document["items"].as_array().expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], json!("t2"));
    assert_eq!(items[0]["title"], json!("it's done"));
    assert_eq!(items[0]["version"], json!(1));
    assert_eq!(items[0]["deleted"], Value::Null);

    let missing = export.export("task", ExportFormat::Json, &["nope".to_string()]);
    assert!(matches!(missing, Err(DictError::ItemNotFound { .. })), "{:?}", missing);
}

#[test]
fn export_formats_and_file_names() {
    assert_eq!("CSV".parse::<ExportFormat>().expect("csv"), ExportFormat::Csv);
    assert_eq!("sql".parse::<ExportFormat>().expect("sql"), ExportFormat::Sql);
    assert!(matches!("xml".parse::<ExportFormat>(), Err(DictError::Validation(_))));
    assert_eq!(file_name("task", ExportFormat::Json, &[]), "task.json");
    let ids = vec!["a".to_string(), "b".to_string()];
    assert_eq!(file_name("task", ExportFormat::Csv, &ids), "task_2_items.csv");
}

/// `country` and `person` referencing it, for imports.
fn people() -> (Arc<DictDataService>, ImportJsonService) {
    let (dicts, data) = setup();
    dicts
        .create(Dict::new("country", vec![DictField::new("code", DictFieldType::String)]))
        .expect("country");
    dicts
        .create(Dict::new(
            "person",
            vec![
                DictField::new("name", DictFieldType::String).required(),
                DictField::new("country", DictFieldType::Dict).with_reference("country"),
            ],
        ))
        .expect("person");
    let import = ImportJsonService::new(dicts, data.clone());
    (data, import)
}

#[test]
fn import_creates_embedded_references_once() {
    let (data, import) = people();
    let document = json!({
        "person": [
            {"_id": "p1", "name": "Ann", "version": 7, "country": {"id": "se", "code": "SE"}},
            {"name": "Bob", "country": {"_id": "se", "code": "SE"}},
            {"name": "Cy", "country": "se"}
        ],
        "ignored": [{"name": "nobody"}]
    });
    let created = import.import("person", document.to_string().as_bytes()).expect("import");
    assert_eq!(created.len(), 3);
    assert_eq!(created[0].id, "p1");
    assert_eq!(created[0].version, 1);
    assert!(created.iter().all(|item| item.data.get("country") == Some(&json!("se"))));

    let countries = data.get_by_filter("country", "", false).expect("countries");
    assert_eq!(countries.len(), 1);
    assert_eq!(countries[0].data.get("code"), Some(&json!("SE")));
    assert_eq!(data.get_by_filter("person", "country.code = 'SE'", false).expect("people").len(), 3);

    let nothing = import.import("person", br#"{"other": []}"#).expect("no records");
    assert!(nothing.is_empty());
}

#[test]
fn failed_import_creates_nothing() {
    let (data, import) = people();
    let document = json!({
        "person": [
            {"id": "p1", "name": "Ann", "country": {"id": "se"}},
            {"id": "p2", "name": "Bob", "country": {"id": 5}}
        ]
    });
    let error = import.import("person", document.to_string().as_bytes()).expect_err("numeric id");
    assert!(matches!(error, DictError::Validation(_)), "{:?}", error);
    assert!(matches!(data.get_by_id("person", "p1", true), Err(DictError::ItemNotFound { .. })));
    assert!(data.get_by_filter("country", "", true).expect("countries").is_empty());

    let error = import.import("person", br#"{"person": {"name": "x"}}"#).expect_err("not an array");
    assert!(matches!(error, DictError::Validation(_)), "{:?}", error);
}
