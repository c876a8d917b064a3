use std::sync::Arc;

use serde_json::json;

use dictengine::backend::embedded_registry;
use dictengine::ddl::ast::{AlterOperation, AssignedValue, DdlValue, TableParameter};
use dictengine::ddl::{ColumnType, DdlExpression, Interpreter, parse_ddl};
use dictengine::error::DictError;
use dictengine::model::{DictFieldType, Direction};
use dictengine::query::CompareOp;
use dictengine::{DictDataService, DictService, Settings};

fn setup() -> (Arc<DictService>, Arc<DictDataService>, Interpreter) {
    let registry = Arc::new(embedded_registry(&Settings::default()).expect("registry"));
    registry.initialize().expect("initialize");
    let dicts = Arc::new(DictService::new(registry));
    let data = Arc::new(DictDataService::new(dicts.clone()));
    let interpreter = Interpreter::new(dicts.clone(), data.clone());
    (dicts, data, interpreter)
}

fn run(interpreter: &Interpreter, script: &str) -> dictengine::Result<()> {
    interpreter.execute(&parse_ddl(script)?)
}

#[test]
fn unknown_column_types_name_an_enum() {
    assert_eq!(ColumnType::from_token("anything-unexpected"), ColumnType::Enum);
    assert_eq!(ColumnType::from_token("person_status"), ColumnType::Enum);
    assert_eq!(ColumnType::from_token("BOOLEAN"), ColumnType::Bool);
    assert_eq!(ColumnType::from_token("bool"), ColumnType::Bool);
    assert_eq!(ColumnType::from_token("Geo_Json"), ColumnType::GeoJson);
    assert_eq!("int".parse::<ColumnType>().expect("int"), ColumnType::Int);
    assert_eq!(ColumnType::Text.to_dict_field_type(), DictFieldType::String);
    assert_eq!(ColumnType::from_dict_field_type(DictFieldType::Dict), None);
}

#[test]
fn create_table_with_every_column_option() {
    let statements = parse_ddl(
        "create table person ['Person'] (
            name ['Full name'] text not null,
            tags text[],
            country text references country
        ) engine = 'mongo';",
    )
    .expect("parse");
    let [DdlExpression::CreateTable { id, name, columns, engine }] = statements.as_slice() else {
        panic!("expected one create table, got {:?}", statements);
    };
    assert_eq!(id, "person");
    assert_eq!(name.as_deref(), Some("Person"));
    assert_eq!(engine.as_deref(), Some("mongo"));
    assert_eq!(columns.len(), 3);
    assert_eq!(columns[0].name.as_deref(), Some("Full name"));
    assert!(columns[0].required);
    assert!(columns[1].multivalued);
    assert_eq!(columns[2].reference.as_deref(), Some("country"));
}

#[test]
fn statements_keep_their_order_and_comments_are_skipped() {
    let statements = parse_ddl(
        "-- schema
        create enum state for task as ('OPEN', 'DONE');
        /* index */ create index task_due on task (due, state) desc;
        drop index task_due on task;
        alter table task add column note text;
        alter table task rename column note to remark ['Remark'];
        alter table task set readPermission = 'admin';
        alter table task add constraint task_title unique (title);
        alter table task alter enum state add value 'BLOCKED';
        drop table task;",
    )
    .expect("parse");
    assert_eq!(statements.len(), 9);
    assert!(matches!(&statements[0], DdlExpression::CreateEnum { values, .. } if values.len() == 2));
    let DdlExpression::CreateIndex(index) = &statements[1] else {
        panic!("expected create index");
    };
    assert!(index.descending);
    assert_eq!(index.fields, vec!["due".to_string(), "state".to_string()]);
    assert!(matches!(
        &statements[4],
        DdlExpression::AlterTable { operation: AlterOperation::RenameColumn { from, to, name }, .. }
            if from == "note" && to == "remark" && name.as_deref() == Some("Remark")
    ));
    assert!(matches!(
        &statements[5],
        DdlExpression::AlterTable {
            operation: AlterOperation::SetParameter { parameter: TableParameter::ReadPermission, value },
            ..
        } if value.as_deref() == Some("admin")
    ));
    assert!(matches!(&statements[8], DdlExpression::DropTable { table } if table == "task"));
}

#[test]
fn data_statements() {
    let statements = parse_ddl(
        "insert into task (title, points, meta, labels) values ('a', 1.5, '{\"k\": 1}'::json, array['x', 'y']), ('b', null, null, array);
        update task set points = 2, title = remark where title = 'a';
        delete from task where points >= 2;",
    )
    .expect("parse");
    let DdlExpression::Insert { columns, rows, .. } = &statements[0] else {
        panic!("expected insert");
    };
    assert_eq!(columns.len(), 4);
    assert_eq!(rows[0][1], DdlValue::Number("1.5".to_string()));
    assert_eq!(rows[0][2], DdlValue::Json("{\"k\": 1}".to_string()));
    assert_eq!(
        rows[0][3],
        DdlValue::Array(vec![DdlValue::String("x".to_string()), DdlValue::String("y".to_string())])
    );
    assert_eq!(rows[1][3], DdlValue::Array(Vec::new()));

    let DdlExpression::Update { assignments, filter, .. } = &statements[1] else {
        panic!("expected update");
    };
    assert_eq!(assignments[1].value, AssignedValue::Column("remark".to_string()));
    assert_eq!(filter.as_ref().map(|f| f.op), Some(CompareOp::Eq));

    assert!(matches!(&statements[2], DdlExpression::Delete { filter: Some(f), .. } if f.op == CompareOp::Ge));
}

#[test]
fn syntax_errors_carry_a_position() {
    let error = parse_ddl("create table (a int);").expect_err("no table id");
    assert!(matches!(error, DictError::DdlSyntax { position, .. } if position > 0), "{:?}", error);
    assert!(matches!(parse_ddl("create table t (a int)"), Err(DictError::DdlSyntax { .. })));
    assert!(parse_ddl("  -- nothing\n").expect("blank").is_empty());
}

#[test]
fn interpreter_builds_schema_and_data() {
    let (dicts, data, interpreter) = setup();
    run(
        &interpreter,
        "create enum task_state for task as ('OPEN', 'DONE');
        create table task ['Task'] (
            title text not null,
            state task_state,
            points decimal,
            labels text[]
        );
        create index task_title on task (title) desc;
        alter table task add constraint task_title_unique unique (title);
        insert into task (id, title, state, points, labels) values
            ('t1', 'first', 'OPEN', 1.50, array['a']),
            ('t2', 'second', 'OPEN', 3, array);
        update task set state = 'DONE' where points > 2;",
    )
    .expect("script");

    let task = dicts.get_by_id("task").expect("task");
    assert_eq!(task.name.as_deref(), Some("Task"));
    assert_eq!(task.field("state").map(|f| f.field_type), Some(DictFieldType::Enum));
    assert_eq!(task.field("state").and_then(|f| f.enum_id.as_deref()), Some("task_state"));
    assert_eq!(task.indexes[0].direction, Direction::Desc);
    assert_eq!(task.constraints.len(), 1);

    let first = data.get_by_id("task", "t1", false).expect("t1");
    assert_eq!(first.data.get("points"), Some(&json!("1.5")));
    assert_eq!(first.version, 1);
    let second = data.get_by_id("task", "t2", false).expect("t2");
    assert_eq!(second.data.get("state"), Some(&json!("DONE")));
    assert_eq!(second.version, 2);
}

#[test]
fn enum_values_are_checked() {
    let (_, _, interpreter) = setup();
    run(
        &interpreter,
        "create table task (state task_state);
        create enum task_state for task as ('OPEN');",
    )
    .expect("enum declared after the table");
    let error = run(&interpreter, "insert into task (state) values ('LOST');").expect_err("not an enum value");
    assert!(matches!(error, DictError::Validation(_)), "{:?}", error);
    run(&interpreter, "alter table task alter enum state_missing add value 'X';").expect_err("unknown enum");
    run(
        &interpreter,
        "alter table task alter enum task_state add value 'LOST';
        insert into task (state) values ('LOST');",
    )
    .expect("value added");
}

#[test]
fn a_script_uses_one_engine() {
    let (dicts, _, interpreter) = setup();
    let error = run(
        &interpreter,
        "create table a (x int) engine = 'postgres';
        create table b (x int) engine = 'mongo';",
    )
    .expect_err("two engines");
    assert!(matches!(error, DictError::Validation(_)));
    assert!(dicts.find("a").expect("lookup").is_none(), "nothing runs before the check");
}

#[test]
fn rename_and_drop_columns_keep_data() {
    let (dicts, data, interpreter) = setup();
    run(
        &interpreter,
        "create table note (body text, draft bool);
        insert into note (id, body, draft) values ('n1', 'hello', true);
        alter table note rename column body to text_body;
        alter table note drop column draft;",
    )
    .expect("script");
    let note = dicts.get_by_id("note").expect("note");
    assert!(note.field("body").is_none());
    assert!(note.field("draft").is_none());
    let item = data.get_by_id("note", "n1", false).expect("n1");
    assert_eq!(item.data.get("text_body"), Some(&json!("hello")));
    assert!(item.data.get("draft").is_none());
}

#[test]
fn delete_statement_is_a_soft_delete() {
    let (_, data, interpreter) = setup();
    run(
        &interpreter,
        "create table tag (label text) engine = 'mongo';
        insert into tag (id, label) values ('a', 'keep'), ('b', 'drop');
        delete from tag where label = 'drop';",
    )
    .expect("script");
    assert_eq!(data.get_by_filter("tag", "", false).expect("live").len(), 1);
    let deleted = data.get_by_id("tag", "b", true).expect("deleted item is kept");
    assert!(deleted.deleted.is_some());
}

#[test]
fn insert_row_must_match_columns() {
    let (_, _, interpreter) = setup();
    run(&interpreter, "create table pair (a int, b int);").expect("create");
    let error = run(&interpreter, "insert into pair (a, b) values (1);").expect_err("short row");
    assert!(matches!(error, DictError::Validation(_)));
}

#[test]
fn dropped_table_id_cannot_be_reused() {
    let (dicts, data, interpreter) = setup();
    run(
        &interpreter,
        "create table t (a text);
        insert into t (id, a) values ('r1', 'kept');
        drop table t;",
    )
    .expect("script");
    let error = run(&interpreter, "create table t (a int);").expect_err("id in use");
    assert!(matches!(error, DictError::AlreadyExists { ref dict_id } if dict_id == "t"), "{:?}", error);
    assert!(dicts.find("t").expect("lookup").is_none());

    let error = run(&interpreter, "create table u (a text); create table u (b text);").expect_err("twice");
    assert!(matches!(error, DictError::AlreadyExists { ref dict_id } if dict_id == "u"), "{:?}", error);
    assert!(data.get_by_filter("u", "", false).expect("u").is_empty());
}
