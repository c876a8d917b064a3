use std::sync::Arc;

use serde_json::{Value, json};

use dictengine::backend::embedded_registry;
use dictengine::error::DictError;
use dictengine::model::{DataMap, Dict, DictConstraint, DictEnum, DictField, DictFieldType};
use dictengine::service::{HistoryArchive, HistoryRetention, MemoryHistoryArchive};
use dictengine::{DictDataService, DictService, Settings};

const ENGINES: [&str; 2] = ["postgres", "mongo"];

/// `country` and `person` (referencing `country`) stored in `engine`.
fn setup(engine: &str, retention: HistoryRetention) -> (Arc<DictService>, DictDataService) {
    let registry = Arc::new(embedded_registry(&Settings::default()).expect("registry"));
    registry.initialize().expect("initialize");
    let dicts = Arc::new(DictService::new(registry));
    let mut country = Dict::new(
        "country",
        vec![
            DictField::new("code", DictFieldType::String).required(),
            DictField::new("name", DictFieldType::String),
        ],
    )
    .with_engine(engine);
    country.constraints.push(DictConstraint { id: "country_code".to_string(), fields: vec!["code".to_string()] });
    dicts.create(country).expect("country");
    let person = Dict::new(
        "person",
        vec![
            DictField::new("name", DictFieldType::String).required().with_bounds(Some(1.0), Some(20.0)),
            DictField::new("age", DictFieldType::Integer).with_bounds(Some(0.0), None),
            DictField::new("status", DictFieldType::Enum).with_enum("person_status"),
            DictField::new("salary", DictFieldType::Decimal),
            DictField::new("born", DictFieldType::Date),
            DictField::new("tags", DictFieldType::String).multivalued(),
            DictField::new("country", DictFieldType::Dict).with_reference("country"),
        ],
    )
    .with_engine(engine)
    .with_enum(DictEnum {
        id: "person_status".to_string(),
        name: None,
        values: vec!["OPEN".to_string(), "CLOSED".to_string()],
    });
    dicts.create(person).expect("person");
    let data = DictDataService::new(dicts.clone()).with_retention(retention);
    for (id, code) in [("se", "SE"), ("no", "NO")] {
        data.create("country", map(json!({"id": id, "code": code}))).expect("country item");
    }
    (dicts, data)
}

fn map(value: Value) -> DataMap {
    value.as_object().cloned().expect("object")
}

fn ids(items: &[dictengine::model::DictItem]) -> Vec<&str> {
    let mut ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
    ids.sort();
    ids
}

#[test]
fn created_items_start_at_version_one() {
    for engine in ENGINES {
        let (_, data) = setup(engine, HistoryRetention::KeepAll);
        let generated = data.create("person", map(json!({"name": "Ann", "age": 30}))).expect("create");
        assert_eq!(generated.version, 1, "{}", engine);
        assert!(uuid::Uuid::parse_str(&generated.id).is_ok(), "{}", engine);
        assert!(generated.history.is_empty());

        let chosen = data.create("person", map(json!({"id": "bob", "name": "Bob"}))).expect("create");
        assert_eq!(chosen.id, "bob");
        let stored = data.get_by_id("person", "bob", false).expect("bob");
        assert_eq!(stored.data.get("name"), Some(&json!("Bob")), "{}", engine);
        assert_eq!(stored.version, 1);

        let duplicate = data.create("person", map(json!({"id": "bob", "name": "Bobby"})));
        assert!(matches!(duplicate, Err(DictError::Validation(_))), "{}", engine);
    }
}

#[test]
fn values_are_stored_in_canonical_form() {
    for engine in ENGINES {
        let (_, data) = setup(engine, HistoryRetention::KeepAll);
        data.create(
            "person",
            map(json!({
                "id": "ann",
                "name": "Ann",
                "salary": "1500.50",
                "born": "1990-05-01",
                "tags": ["a", "b"],
                "status": "OPEN",
                "country": "se",
                "age": null
            })),
        )
        .expect("create");
        let ann = data.get_by_id("person", "ann", false).expect("ann");
        assert_eq!(ann.data.get("salary"), Some(&json!("1500.5")), "{}", engine);
        assert_eq!(ann.data.get("born"), Some(&json!("1990-05-01")), "{}", engine);
        assert_eq!(ann.data.get("tags"), Some(&json!(["a", "b"])), "{}", engine);
        assert_eq!(ann.data.get("country"), Some(&json!("se")), "{}", engine);
        assert!(ann.data.get("age").is_none(), "{}", engine);
    }
}

#[test]
fn invalid_values_are_rejected() {
    let (_, data) = setup("postgres", HistoryRetention::KeepAll);
    let rejected = [
        json!({"age": 3}),
        json!({"name": ""}),
        json!({"name": "Ann", "age": -1}),
        json!({"name": "Ann", "age": "old"}),
        json!({"name": "Ann", "status": "UNKNOWN"}),
        json!({"name": "Ann", "salary": "lots"}),
        json!({"name": "Ann", "born": "yesterday"}),
        json!({"name": "Ann", "tags": "single"}),
        json!({"name": "An extremely long name for a person"}),
    ];
    for value in rejected {
        let result = data.create("person", map(value.clone()));
        assert!(result.is_err(), "{} was accepted", value);
    }
    assert!(matches!(
        data.create("person", map(json!({"name": "Ann", "height": 170}))),
        Err(DictError::UnknownField { ref field_id, .. }) if field_id == "height"
    ));
    assert!(data.get_by_filter("person", "", true).expect("all").is_empty());
}

#[test]
fn references_must_point_at_live_items() {
    for engine in ENGINES {
        let (_, data) = setup(engine, HistoryRetention::KeepAll);
        let missing = data.create("person", map(json!({"name": "Ann", "country": "xx"})));
        assert!(
            matches!(missing, Err(DictError::ItemNotFound { ref dict_id, ref item_id }) if dict_id == "country" && item_id == "xx"),
            "{}",
            engine
        );
        data.delete("country", "no", None).expect("delete");
        let deleted = data.create("person", map(json!({"name": "Ole", "country": "no"})));
        assert!(matches!(deleted, Err(DictError::ItemNotFound { .. })), "{}", engine);
    }
}

#[test]
fn unique_constraints_hold_across_items() {
    for engine in ENGINES {
        let (_, data) = setup(engine, HistoryRetention::KeepAll);
        let clash = data.create("country", map(json!({"id": "sweden", "code": "SE"})));
        assert!(matches!(clash, Err(DictError::Validation(ref m)) if m.contains("country_code")), "{}", engine);
        // an item may keep its own value
        data.update("country", "se", 1, map(json!({"code": "SE", "name": "Sweden"}))).expect("update");
        let taken = data.update("country", "se", 2, map(json!({"code": "NO"})));
        assert!(matches!(taken, Err(DictError::Validation(_))), "{}", engine);
    }
}

#[test]
fn stale_update_changes_nothing() {
    for engine in ENGINES {
        let (_, data) = setup(engine, HistoryRetention::KeepAll);
        data.create("person", map(json!({"id": "ann", "name": "Ann", "age": 30}))).expect("create");
        let updated = data.update("person", "ann", 1, map(json!({"name": "Ann", "age": 31}))).expect("update");
        assert_eq!(updated.version, 2);
        assert_eq!(updated.history.len(), 1);
        assert_eq!(updated.history[0].get("age"), Some(&json!(30)), "{}", engine);
        assert_eq!(updated.history[0].get("version"), Some(&json!(1)), "{}", engine);

        let stale = data.update("person", "ann", 1, map(json!({"name": "Ann", "age": 99})));
        let Err(DictError::DictConcurrentUpdate { expected, actual, .. }) = stale else {
            panic!("{}: stale update was accepted", engine);
        };
        assert_eq!((expected, actual), (1, 2));

        let stored = data.get_by_id("person", "ann", false).expect("ann");
        assert_eq!(stored.version, 2, "{}", engine);
        assert_eq!(stored.data.get("age"), Some(&json!(31)), "{}", engine);
        assert_eq!(stored.history.len(), 1, "{}", engine);
    }
}

#[test]
fn update_of_missing_item_fails() {
    for engine in ENGINES {
        let (_, data) = setup(engine, HistoryRetention::KeepAll);
        let result = data.update("person", "ghost", 1, map(json!({"name": "Ghost"})));
        assert!(matches!(result, Err(DictError::ItemNotFound { .. })), "{}", engine);
    }
}

#[test]
fn delete_keeps_the_item() {
    for engine in ENGINES {
        let (_, data) = setup(engine, HistoryRetention::KeepAll);
        data.create("person", map(json!({"id": "ann", "name": "Ann", "age": 30}))).expect("create");
        let deleted = data.delete("person", "ann", Some("moved".to_string())).expect("delete");
        assert_eq!(deleted.version, 2);
        assert!(deleted.is_deleted());

        assert!(matches!(data.get_by_id("person", "ann", false), Err(DictError::ItemNotFound { .. })));
        let kept = data.get_by_id("person", "ann", true).expect("deleted item");
        assert_eq!(kept.deletion_reason.as_deref(), Some("moved"), "{}", engine);
        assert_eq!(kept.data.get("age"), Some(&json!(30)), "{}", engine);
        assert_eq!(kept.history.len(), 1);

        assert!(data.get_by_filter("person", "age = 30", false).expect("live").is_empty(), "{}", engine);
        assert_eq!(data.get_by_filter("person", "age = 30", true).expect("all").len(), 1, "{}", engine);

        let again = data.delete("person", "ann", None).expect("delete twice");
        assert_eq!(again.version, 2, "{}", engine);
        let edit = data.update("person", "ann", 2, map(json!({"name": "Ann"})));
        assert!(matches!(edit, Err(DictError::Validation(_))), "{}", engine);
    }
}

#[test]
fn history_keeps_only_the_newest_snapshots() {
    for engine in ENGINES {
        let (_, data) = setup(engine, HistoryRetention::KeepLast(2));
        data.create("person", map(json!({"id": "ann", "name": "Ann", "age": 1}))).expect("create");
        for version in 1..=4 {
            data.update("person", "ann", version, map(json!({"name": "Ann", "age": version + 1})))
                .expect("update");
        }
        let ann = data.get_by_id("person", "ann", false).expect("ann");
        assert_eq!(ann.version, 5);
        let versions: Vec<&Value> = ann.history.iter().filter_map(|h| h.get("version")).collect();
        assert_eq!(versions, vec![&json!(3), &json!(4)], "{}", engine);
    }
}

#[test]
fn concurrent_updates_of_one_version_admit_a_single_writer() {
    for engine in ENGINES {
        let (_, data) = setup(engine, HistoryRetention::KeepAll);
        data.create("person", map(json!({"id": "ann", "name": "Ann", "age": 30}))).expect("create");
        let results: Vec<_> = std::thread::scope(|scope| {
            let writers: Vec<_> = (0..8)
                .map(|age| {
                    let data = &data;
                    scope.spawn(move || data.update("person", "ann", 1, map(json!({"name": "Ann", "age": age}))))
                })
                .collect();
            writers.into_iter().map(|writer| writer.join().expect("writer")).collect()
        });
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1, "{}", engine);
        for result in results.iter().filter(|r| r.is_err()) {
            assert!(
                matches!(result, Err(DictError::DictConcurrentUpdate { expected: 1, actual: 2, .. })),
                "{}: {:?}",
                engine,
                result
            );
        }
        let ann = data.get_by_id("person", "ann", false).expect("ann");
        assert_eq!(ann.version, 2, "{}", engine);
        assert_eq!(ann.history.len(), 1, "{}", engine);
    }
}

#[test]
fn trimmed_history_goes_to_the_archive() {
    for engine in ENGINES {
        let (_, data) = setup(engine, HistoryRetention::KeepLast(1));
        let archive = Arc::new(MemoryHistoryArchive::new());
        let data = data.with_archive(archive.clone());
        data.create("person", map(json!({"id": "ann", "name": "Ann", "age": 1}))).expect("create");
        data.update("person", "ann", 1, map(json!({"name": "Ann", "age": 2}))).expect("update");
        assert!(archive.snapshots("person", "ann").expect("archived").is_empty(), "{}", engine);
        data.update("person", "ann", 2, map(json!({"name": "Ann", "age": 3}))).expect("update");
        let deleted = data.delete("person", "ann", None).expect("delete");

        let archived = archive.snapshots("person", "ann").expect("archived");
        let versions: Vec<&Value> = archived.iter().filter_map(|s| s.get("version")).collect();
        assert_eq!(versions, vec![&json!(1), &json!(2)], "{}", engine);
        assert_eq!(archived[0].get("age"), Some(&json!(1)), "{}", engine);
        let kept: Vec<&Value> = deleted.history.iter().filter_map(|h| h.get("version")).collect();
        assert_eq!(kept, vec![&json!(3)], "{}", engine);
    }
}

struct UnavailableArchive;

impl HistoryArchive for UnavailableArchive {
    fn archive(&self, _dict_id: &str, _item_id: &str, _snapshots: Vec<DataMap>) -> dictengine::Result<()> {
        Err(DictError::Persistence("archive unavailable".to_string()))
    }
}

#[test]
fn failed_archiving_undoes_the_update() {
    for engine in ENGINES {
        let (_, data) = setup(engine, HistoryRetention::KeepLast(1));
        let data = data.with_archive(Arc::new(UnavailableArchive));
        data.create("person", map(json!({"id": "ann", "name": "Ann", "age": 1}))).expect("create");
        data.update("person", "ann", 1, map(json!({"name": "Ann", "age": 2}))).expect("nothing to archive");

        let result = data.update("person", "ann", 2, map(json!({"name": "Ann", "age": 3})));
        assert!(matches!(result, Err(DictError::Persistence(_))), "{}: {:?}", engine, result);
        let ann = data.get_by_id("person", "ann", false).expect("ann");
        assert_eq!(ann.version, 2, "{}", engine);
        assert_eq!(ann.data.get("age"), Some(&json!(2)), "{}", engine);
        assert_eq!(ann.history.len(), 1, "{}", engine);
    }
}

#[test]
fn filters_follow_references() {
    for engine in ENGINES {
        let (_, data) = setup(engine, HistoryRetention::KeepAll);
        data.create_many(
            "person",
            vec![
                map(json!({"id": "ann", "name": "Ann", "age": 30, "country": "se", "status": "OPEN"})),
                map(json!({"id": "ole", "name": "Ole", "age": 17, "country": "no", "status": "CLOSED"})),
                map(json!({"id": "eva", "name": "Eva", "age": 45, "country": "se", "salary": "2500.5"})),
                map(json!({"id": "kim", "name": "Kim", "age": 52})),
            ],
        )
        .expect("people");

        let swedes = data.get_by_filter("person", "country.code = 'SE'", false).expect("join");
        assert_eq!(ids(&swedes), vec!["ann", "eva"], "{}", engine);
        assert!(swedes.iter().all(|p| p.data.get("country") == Some(&json!("se"))), "{}", engine);

        let adults = data
            .get_by_filter("person", "age >= 18 and (status = 'OPEN' or status = null)", false)
            .expect("filter");
        assert_eq!(ids(&adults), vec!["ann", "eva", "kim"], "{}", engine);

        let named = data.get_by_filter("person", "name ilike 'e%' or name in ('Kim')", false).expect("names");
        assert_eq!(ids(&named), vec!["eva", "kim"], "{}", engine);

        let paid = data.get_by_filter("person", "salary > 1000.25", false).expect("decimal");
        assert_eq!(ids(&paid), vec!["eva"], "{}", engine);

        let middle = data.get_by_filter("person", "age between 18 and 50 and not country.code = 'NO'", false);
        assert_eq!(ids(&middle.expect("range")), vec!["ann", "eva"], "{}", engine);
    }
}

#[test]
fn create_many_is_all_or_nothing() {
    for engine in ENGINES {
        let (_, data) = setup(engine, HistoryRetention::KeepAll);
        let result = data.create_many(
            "person",
            vec![map(json!({"id": "ann", "name": "Ann"})), map(json!({"id": "bad", "age": 3}))],
        );
        assert!(result.is_err(), "{}", engine);
        assert!(matches!(data.get_by_id("person", "ann", true), Err(DictError::ItemNotFound { .. })), "{}", engine);
    }
}

#[test]
fn filter_on_unknown_dict_field_fails() {
    let (_, data) = setup("postgres", HistoryRetention::KeepAll);
    assert!(matches!(
        data.get_by_filter("person", "height > 170", false),
        Err(DictError::UnknownField { .. })
    ));
    assert!(matches!(data.get_by_filter("person", "age >", false), Err(DictError::QuerySyntax { .. })));
}
