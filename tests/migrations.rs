use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use dictengine::backend::embedded_registry;
use dictengine::engine::VersionSchemeBackend;
use dictengine::error::DictError;
use dictengine::migration::{
    MigrationEngine, MigrationScript, MigrationState, MigrationVersion, compute_version, load_scripts,
    order_migrations,
};
use dictengine::{DictDataService, DictService, EngineRegistry, Settings};

struct Fixture {
    registry: Arc<EngineRegistry>,
    dicts: Arc<DictService>,
    data: Arc<DictDataService>,
    engine: MigrationEngine,
}

fn setup() -> Fixture {
    let registry = Arc::new(embedded_registry(&Settings::default()).expect("registry"));
    registry.initialize().expect("initialize");
    let dicts = Arc::new(DictService::new(registry.clone()));
    let data = Arc::new(DictDataService::new(dicts.clone()));
    let engine = MigrationEngine::new(registry.clone(), dicts.clone(), data.clone());
    Fixture { registry, dicts, data, engine }
}

fn script(target: &str, file_name: &str, text: &str) -> MigrationScript {
    MigrationScript::new(target, file_name, text.to_string()).expect("script")
}

fn version(file_name: &str) -> MigrationVersion {
    MigrationVersion::from_file_name(file_name).expect("version")
}

#[test]
fn versions_compare_numerically() {
    assert!(version("V1_9__a.sql") < version("V1_10__b.sql"));
    assert!(version("V2__a.sql") > version("V1_99_99__b.sql"));
    assert_eq!(version("V1_0__a.sql"), version("V1__b.sql"));
    assert_eq!(compute_version("V1_10__add_index.sql").expect("compute"), "1.10");
    assert_eq!(version("V3_0_1__x.sql").segments(), &[3, 0, 1]);
    assert_eq!(MigrationVersion::parse("1.10").expect("parse"), version("V1_10__x.sql"));
    for bad in ["1_0__x.sql", "V__x.sql", "Vx_1__y.sql", "create.sql"] {
        assert!(
            matches!(MigrationVersion::from_file_name(bad), Err(DictError::MigrationFileRead { .. })),
            "{} should be rejected",
            bad
        );
    }
}

#[test]
fn ordering_is_stable_and_numeric() {
    let mut names = vec!["V1_10__c.sql", "V1_9__b.sql", "V1_2__a.sql", "V1_9_0__d.sql"];
    let versions: Vec<(MigrationVersion, &str)> = names.drain(..).map(|n| (version(n), n)).collect();
    let mut ordered = versions;
    order_migrations(&mut ordered, |(v, _)| v);
    let names: Vec<&str> = ordered.iter().map(|(_, n)| *n).collect();
    assert_eq!(names, vec!["V1_2__a.sql", "V1_9__b.sql", "V1_9_0__d.sql", "V1_10__c.sql"]);
}

#[test]
fn pending_scripts_apply_in_version_order() {
    let fixture = setup();
    let scripts = vec![
        script("dicts", "V1_10__add_column.sql", "alter table city add column population int;"),
        script("dicts", "V1_9__create.sql", "create table city (name text not null);"),
    ];
    let applied = fixture.engine.apply_pending("dicts", scripts).expect("migrate");
    let versions: Vec<&str> = applied.iter().map(|row| row.version.as_str()).collect();
    assert_eq!(versions, vec!["1.9", "1.10"]);
    assert!(fixture.dicts.get_by_id("city").expect("city").field("population").is_some());
    assert_eq!(fixture.engine.state("dicts").expect("state"), MigrationState::UpToDate(version("V1_10__x.sql")));
    assert_eq!(fixture.engine.installed_version("dicts").expect("installed"), Some(version("V1_10__x.sql")));
}

#[test]
fn reapplying_is_a_no_op() {
    let fixture = setup();
    let scripts = vec![script("dicts", "V1__create.sql", "create table city (name text);")];
    assert_eq!(fixture.engine.migrate(scripts.clone()).expect("first").len(), 1);
    assert!(fixture.engine.migrate(scripts).expect("second").is_empty());
    let history = fixture.registry.version_backend().expect("versions").versions("dicts").expect("rows");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].script, "V1__create.sql");
}

#[test]
fn duplicate_versions_are_rejected_before_anything_runs() {
    let fixture = setup();
    let scripts = vec![
        script("dicts", "V1_0__create_a.sql", "create table a (x int);"),
        script("dicts", "V1__create_b.sql", "create table b (x int);"),
    ];
    let error = fixture.engine.migrate(scripts).expect_err("same version");
    let DictError::MigrationsHasSameVersion { scripts, .. } = error else {
        panic!("expected a version clash, got {:?}", error);
    };
    assert_eq!(scripts.len(), 2);
    assert!(fixture.dicts.find("a").expect("a").is_none());
    assert!(fixture.dicts.find("b").expect("b").is_none());
}

#[test]
fn changed_applied_script_is_detected() {
    let fixture = setup();
    fixture
        .engine
        .migrate(vec![script("dicts", "V1__create.sql", "create table city (name text);")])
        .expect("first");
    let error = fixture
        .engine
        .migrate(vec![script("dicts", "V1__create.sql", "create table city (name text, code text);")])
        .expect_err("drift");
    assert!(matches!(error, DictError::MigrationChecksumMismatch { ref script, .. } if script == "V1__create.sql"));
}

#[test]
fn script_older_than_installed_version_is_out_of_order() {
    let fixture = setup();
    fixture
        .engine
        .migrate(vec![script("dicts", "V2__create.sql", "create table city (name text);")])
        .expect("first");
    let error = fixture
        .engine
        .migrate(vec![
            script("dicts", "V1_5__late.sql", "create table late (x int);"),
            script("dicts", "V2__create.sql", "create table city (name text);"),
        ])
        .expect_err("late script");
    assert!(matches!(error, DictError::MigrationOutOfOrder { ref script, .. } if script == "V1_5__late.sql"));
    assert!(fixture.dicts.find("late").expect("late").is_none());
}

#[test]
fn failing_script_rolls_back_and_stops_the_batch() {
    let fixture = setup();
    let scripts = vec![
        script("dicts", "V1__create.sql", "create table city (name text not null);"),
        script(
            "dicts",
            "V2__broken.sql",
            "create table street (name text);
            insert into city (name) values (null);",
        ),
        script("dicts", "V3__after.sql", "create table plaza (x int);"),
    ];
    let error = fixture.engine.migrate(scripts).expect_err("broken script");
    let DictError::MigrationApplied { script, source } = error else {
        panic!("expected a failed migration, got {:?}", error);
    };
    assert_eq!(script, "V2__broken.sql");
    assert!(matches!(*source, DictError::Validation(_)), "{:?}", source);

    assert!(fixture.dicts.find("city").expect("city").is_some());
    assert!(fixture.dicts.find("street").expect("street").is_none(), "partial script is rolled back");
    assert!(fixture.dicts.find("plaza").expect("plaza").is_none());
    assert_eq!(fixture.engine.installed_version("dicts").expect("installed"), Some(version("V1__x.sql")));
    assert_eq!(fixture.engine.state("dicts").expect("state"), MigrationState::UpToDate(version("V1__x.sql")));
}

#[test]
fn targets_keep_separate_histories() {
    let fixture = setup();
    let applied = fixture
        .engine
        .migrate(vec![
            script("dicts", "V1__city.sql", "create table city (name text);"),
            script("audit", "V1__log.sql", "create table log (line text) engine = 'mongo';"),
        ])
        .expect("migrate");
    assert_eq!(applied.len(), 2);
    let versions = fixture.registry.version_backend().expect("versions");
    assert_eq!(versions.versions("audit").expect("audit").len(), 1);
    assert_eq!(versions.versions("dicts").expect("dicts").len(), 1);
    assert_eq!(fixture.dicts.get_by_id("log").expect("log").engine.as_deref(), Some("mongo"));
    assert_eq!(fixture.engine.state("other").expect("state"), MigrationState::NoSchema);
}

fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("dictengine-migrations-{}", uuid::Uuid::new_v4()));
    fs::create_dir_all(dir.join("audit")).expect("scratch dir");
    dir
}

#[test]
fn scripts_are_loaded_per_directory() {
    let dir = scratch_dir();
    fs::write(dir.join("V1__city.sql"), "create table city (name text);").expect("write");
    fs::write(dir.join("V2__street.sql"), "create table street (name text);").expect("write");
    fs::write(dir.join("README.md"), "not a script").expect("write");
    fs::write(dir.join("audit").join("V1__log.sql"), "create table log (line text);").expect("write");

    let scripts = load_scripts(&dir, "dicts").expect("load");
    let mut found: Vec<(String, String)> = scripts.iter().map(|s| (s.target.clone(), s.file_name.clone())).collect();
    found.sort();
    assert_eq!(
        found,
        vec![
            ("audit".to_string(), "V1__log.sql".to_string()),
            ("dicts".to_string(), "V1__city.sql".to_string()),
            ("dicts".to_string(), "V2__street.sql".to_string()),
        ]
    );
    assert!(scripts.iter().all(|s| s.checksum.len() == 64));

    let fixture = setup();
    assert_eq!(fixture.engine.migrate(scripts).expect("migrate").len(), 3);
    assert!(fixture.data.get_by_filter("city", "", false).expect("city").is_empty());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn missing_directory_has_no_scripts() {
    let dir = std::env::temp_dir().join(format!("dictengine-absent-{}", uuid::Uuid::new_v4()));
    assert!(load_scripts(&dir, "dicts").expect("load").is_empty());
}
