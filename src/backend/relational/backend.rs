use std::sync::Arc;

use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::backend::relational::session::{SqlRow, SqlSession};
use crate::config;
use crate::engine::{
    DictBackend, DictDataBackend, DictSchemeBackend, Engine, ItemMutation, TransactionBackend, VersionSchemeBackend,
};
use crate::error::{DictError, Result};
use crate::model::{self, DataMap, Dict, DictField, DictFieldType, DictItem, Direction, VersionScheme};
use crate::query::constant::{self, Value as Constant};
use crate::query::keyword::quote_identifier;
use crate::query::{Expression, PostgresTranslator, TranslationContext, Translator};

const DICT_TABLE: &str = "dict";
const VERSION_TABLE: &str = "version_scheme";

/// The `postgres` engine over any [`SqlSession`]: one table per dict, a
/// column per field plus the service columns.
pub struct RelationalBackend<S: SqlSession> {
    session: Arc<S>,
}

impl<S: SqlSession> RelationalBackend<S> {
    pub fn new(session: Arc<S>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }
}

fn param(name: &str, value: SqlValue) -> (String, SqlValue) {
    (name.to_string(), value)
}

fn text(value: &str) -> SqlValue {
    SqlValue::Text(value.to_string())
}

fn optional_text(value: Option<String>) -> SqlValue {
    value.map_or(SqlValue::Null, SqlValue::Text)
}

fn column_type(field: &DictField) -> &'static str {
    if field.multivalued {
        return "text";
    }
    match field.field_type {
        DictFieldType::Integer => "bigint",
        DictFieldType::Decimal => "numeric",
        DictFieldType::Boolean => "boolean",
        DictFieldType::Date => "date",
        DictFieldType::Timestamp => "timestamp",
        _ => "text",
    }
}

fn column_definition(field: &DictField) -> String {
    format!("{} {}", quote_identifier(&field.id), column_type(field))
}

/// Storage form of a validated field value.
fn encode(field: &DictField, value: &Value) -> Result<SqlValue> {
    if field.multivalued {
        return Ok(SqlValue::Text(serde_json::to_string(value)?));
    }
    Ok(match (field.field_type, value) {
        (_, Value::Null) => SqlValue::Null,
        (DictFieldType::Integer, Value::Number(n)) => SqlValue::Integer(n.as_i64().unwrap_or_default()),
        (DictFieldType::Boolean, Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        (DictFieldType::Json | DictFieldType::GeoJson, value) => SqlValue::Text(serde_json::to_string(value)?),
        (_, Value::String(s)) => SqlValue::Text(s.clone()),
        (_, other) => SqlValue::Text(other.to_string()),
    })
}

fn decode(field: &DictField, value: SqlValue) -> Result<Value> {
    if field.multivalued {
        return match value {
            SqlValue::Text(s) => Ok(serde_json::from_str(&s)?),
            _ => Ok(Value::Null),
        };
    }
    Ok(match (field.field_type, value) {
        (_, SqlValue::Null) => Value::Null,
        (DictFieldType::Integer, SqlValue::Integer(i)) => Value::from(i),
        (DictFieldType::Integer, SqlValue::Real(f)) => Value::from(f as i64),
        (DictFieldType::Decimal, SqlValue::Integer(i)) => Value::String(i.to_string()),
        (DictFieldType::Decimal, SqlValue::Real(f)) => Value::String(constant::canonical_decimal(&f.to_string())?),
        (DictFieldType::Decimal, SqlValue::Text(s)) => Value::String(constant::canonical_decimal(&s)?),
        (DictFieldType::Boolean, SqlValue::Integer(i)) => Value::Bool(i != 0),
        (DictFieldType::Json | DictFieldType::GeoJson, SqlValue::Text(s)) => serde_json::from_str(&s)?,
        (_, SqlValue::Text(s)) => Value::String(s),
        (_, SqlValue::Integer(i)) => Value::String(i.to_string()),
        (_, SqlValue::Real(f)) => Value::String(f.to_string()),
        (_, SqlValue::Blob(_)) => Value::Null,
    })
}

/// Query parameter form of a constant.
fn bind(value: &Constant) -> SqlValue {
    match value {
        Constant::Null => SqlValue::Null,
        Constant::Integer(i) => SqlValue::Integer(*i),
        Constant::Decimal(d) => d.parse::<f64>().map_or_else(|_| text(d), SqlValue::Real),
        Constant::String(s) => text(s),
        Constant::Boolean(b) => SqlValue::Integer(i64::from(*b)),
        Constant::Date(d) => SqlValue::Text(d.format(model::DATE_FORMAT).to_string()),
        Constant::Timestamp(ts) => SqlValue::Text(model::format_timestamp(ts)),
    }
}

fn row_text(row: &SqlRow, column: &str) -> Option<String> {
    match row.get(column) {
        Some(SqlValue::Text(s)) => Some(s.clone()),
        Some(SqlValue::Integer(i)) => Some(i.to_string()),
        _ => None,
    }
}

fn row_timestamp(row: &SqlRow, column: &str) -> Result<Option<chrono::NaiveDateTime>> {
    match row_text(row, column) {
        Some(text) => model::parse_timestamp(&text)
            .map(Some)
            .ok_or_else(|| DictError::Persistence(format!("column {} holds '{}', not a timestamp", column, text))),
        None => Ok(None),
    }
}

fn item_from_row(dict: &Dict, mut row: SqlRow) -> Result<DictItem> {
    let missing = |column: &str| DictError::Persistence(format!("row of '{}' has no {}", dict.id, column));
    let mut data = DataMap::new();
    for field in &dict.fields {
        if let Some(value) = row.remove(&field.id) {
            let value = decode(field, value)?;
            if !value.is_null() {
                data.insert(field.id.clone(), value);
            }
        }
    }
    let history = match row_text(&row, model::HISTORY) {
        Some(text) => serde_json::from_str(&text)?,
        None => Vec::new(),
    };
    let version = match row.get(model::VERSION) {
        Some(SqlValue::Integer(v)) => *v,
        _ => return Err(missing(model::VERSION)),
    };
    Ok(DictItem {
        id: row_text(&row, model::ID).ok_or_else(|| missing(model::ID))?,
        data,
        history,
        version,
        created: row_timestamp(&row, model::CREATED)?.ok_or_else(|| missing(model::CREATED))?,
        updated: row_timestamp(&row, model::UPDATED)?.ok_or_else(|| missing(model::UPDATED))?,
        deleted: row_timestamp(&row, model::DELETED)?,
        deletion_reason: row_text(&row, model::DELETION_REASON),
    })
}

/// Columns and values of an item, fields first, in table order.
fn item_columns(dict: &Dict, item: &DictItem) -> Result<Vec<(String, SqlValue)>> {
    let mut columns = Vec::with_capacity(dict.fields.len() + 7);
    columns.push((model::ID.to_string(), text(&item.id)));
    for field in &dict.fields {
        let value = item.data.get(&field.id).map_or(Ok(SqlValue::Null), |v| encode(field, v))?;
        columns.push((field.id.clone(), value));
    }
    columns.push((model::HISTORY.to_string(), SqlValue::Text(serde_json::to_string(&item.history)?)));
    columns.push((model::VERSION.to_string(), SqlValue::Integer(item.version)));
    columns.push((model::CREATED.to_string(), SqlValue::Text(model::format_timestamp(&item.created))));
    columns.push((model::UPDATED.to_string(), SqlValue::Text(model::format_timestamp(&item.updated))));
    columns.push((model::DELETED.to_string(), optional_text(item.deleted.as_ref().map(model::format_timestamp))));
    columns.push((model::DELETION_REASON.to_string(), optional_text(item.deletion_reason.clone())));
    Ok(columns)
}

fn index_name(dict: &Dict, id: &str) -> String {
    quote_identifier(&format!("{}_{}", dict.id, id).to_ascii_lowercase())
}

fn index_statements(dict: &Dict) -> Vec<String> {
    let table = quote_identifier(&dict.id);
    let mut statements = Vec::new();
    for index in &dict.indexes {
        let order = if index.direction == Direction::Desc { " desc" } else { "" };
        let columns: Vec<String> = index.fields.iter().map(|f| format!("{}{}", quote_identifier(f), order)).collect();
        statements.push(format!(
            "create index {} on {} ({});",
            index_name(dict, &index.id),
            table,
            columns.join(", ")
        ));
    }
    for constraint in &dict.constraints {
        let columns: Vec<String> = constraint.fields.iter().map(|f| quote_identifier(f)).collect();
        statements.push(format!(
            "create unique index {} on {} ({}) where deleted is null;",
            index_name(dict, &constraint.id),
            table,
            columns.join(", ")
        ));
    }
    statements
}

impl<S: SqlSession> Engine for RelationalBackend<S> {
    fn engine_name(&self) -> &str {
        config::POSTGRES
    }

    fn dict_exists(&self) -> Result<bool> {
        self.session.table_exists(DICT_TABLE)
    }

    fn version_scheme_exists(&self) -> Result<bool> {
        self.session.table_exists(VERSION_TABLE)
    }
}

impl<S: SqlSession> DictBackend for RelationalBackend<S> {
    fn create_dict_store(&self) -> Result<()> {
        self.session.execute_batch(
            "
            create table if not exists dict (
                id text not null primary key,
                body text not null
            );
            ",
        )
    }

    fn get_dict(&self, dict_id: &str) -> Result<Option<Dict>> {
        let rows = self.session.query("select body from dict where id = :id", &[param("id", text(dict_id))])?;
        match rows.into_iter().next().and_then(|row| row_text(&row, "body")) {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    fn all_dicts(&self) -> Result<Vec<Dict>> {
        self.session
            .query("select body from dict order by id", &[])?
            .iter()
            .filter_map(|row| row_text(row, "body"))
            .map(|body| Ok(serde_json::from_str(&body)?))
            .collect()
    }

    fn save_dict(&self, dict: &Dict) -> Result<()> {
        self.session.execute(
            "
            insert into dict (id, body) values (:id, :body)
            on conflict (id) do update set body = excluded.body
            ",
            &[param("id", text(&dict.id)), param("body", SqlValue::Text(serde_json::to_string(dict)?))],
        )?;
        Ok(())
    }

    fn remove_dict(&self, dict_id: &str) -> Result<()> {
        self.session.execute("delete from dict where id = :id", &[param("id", text(dict_id))])?;
        Ok(())
    }
}

impl<S: SqlSession> DictSchemeBackend for RelationalBackend<S> {
    fn scheme_exists(&self, dict_id: &str) -> Result<bool> {
        self.session.table_exists(dict_id)
    }

    fn create_scheme(&self, dict: &Dict) -> Result<()> {
        if self.session.table_exists(&dict.id)? {
            return Err(DictError::AlreadyExists { dict_id: dict.id.clone() });
        }
        let mut columns = vec![format!("{} text not null primary key", model::ID)];
        columns.extend(dict.fields.iter().map(column_definition));
        columns.push(format!("{} text not null", model::HISTORY));
        columns.push(format!("{} bigint not null", model::VERSION));
        columns.push(format!("{} timestamp not null", model::CREATED));
        columns.push(format!("{} timestamp not null", model::UPDATED));
        columns.push(format!("{} timestamp", model::DELETED));
        columns.push(format!("{} text", quote_identifier(model::DELETION_REASON)));
        let mut sql = format!("create table {} (\n    {}\n);\n", quote_identifier(&dict.id), columns.join(",\n    "));
        for statement in index_statements(dict) {
            sql.push_str(&statement);
            sql.push('\n');
        }
        self.session.execute_batch(&sql)
    }

    fn update_scheme(&self, previous: &Dict, current: &Dict) -> Result<()> {
        let table = quote_identifier(&current.id);
        let mut sql = String::new();
        // indexes go first, they may cover dropped columns
        for index in &previous.indexes {
            if !current.indexes.contains(index) {
                sql.push_str(&format!("drop index if exists {};\n", index_name(previous, &index.id)));
            }
        }
        for constraint in &previous.constraints {
            if !current.constraints.contains(constraint) {
                sql.push_str(&format!("drop index if exists {};\n", index_name(previous, &constraint.id)));
            }
        }
        for field in &previous.fields {
            match current.field(&field.id) {
                None => sql.push_str(&format!("alter table {} drop column {};\n", table, quote_identifier(&field.id))),
                Some(kept) if column_type(kept) != column_type(field) => {
                    return Err(DictError::Validation(format!(
                        "Field '{}' of dict '{}' cannot change its type from {} to {}",
                        field.id, current.id, field.field_type, kept.field_type
                    )));
                }
                Some(_) => {}
            }
        }
        for field in current.fields.iter().filter(|f| previous.field(&f.id).is_none()) {
            sql.push_str(&format!("alter table {} add column {};\n", table, column_definition(field)));
        }
        let created = Dict {
            indexes: current.indexes.iter().filter(|i| !previous.indexes.contains(i)).cloned().collect(),
            constraints: current.constraints.iter().filter(|c| !previous.constraints.contains(c)).cloned().collect(),
            ..current.clone()
        };
        for statement in index_statements(&created) {
            sql.push_str(&statement);
            sql.push('\n');
        }
        if sql.is_empty() {
            return Ok(());
        }
        self.session.execute_batch(&sql)
    }

    fn rename_field(&self, dict: &Dict, from: &str, to: &str) -> Result<()> {
        self.session.execute_batch(&format!(
            "alter table {} rename column {} to {};",
            quote_identifier(&dict.id),
            quote_identifier(from),
            quote_identifier(to)
        ))
    }

    fn drop_scheme(&self, dict: &Dict) -> Result<()> {
        self.session.execute_batch(&format!("drop table if exists {};", quote_identifier(&dict.id)))
    }
}

impl<S: SqlSession> DictDataBackend for RelationalBackend<S> {
    fn insert(&self, dict: &Dict, item: &DictItem) -> Result<()> {
        let columns = item_columns(dict, item)?;
        let names: Vec<String> = columns.iter().map(|(c, _)| quote_identifier(c)).collect();
        let placeholders: Vec<String> = (0..columns.len()).map(|i| format!(":v{}", i)).collect();
        let params: Vec<(String, SqlValue)> =
            columns.into_iter().enumerate().map(|(i, (_, value))| (format!("v{}", i), value)).collect();
        self.session.execute(
            &format!(
                "insert into {} ({}) values ({})",
                quote_identifier(&dict.id),
                names.join(", "),
                placeholders.join(", ")
            ),
            &params,
        )?;
        Ok(())
    }

    fn get_by_id(&self, dict: &Dict, item_id: &str) -> Result<Option<DictItem>> {
        let rows = self.session.query(
            &format!("select * from {} where id = :id", quote_identifier(&dict.id)),
            &[param("id", text(item_id))],
        )?;
        rows.into_iter().next().map(|row| item_from_row(dict, row)).transpose()
    }

    fn find(&self, dict: &Dict, catalog: &[Dict], filter: &Expression, include_deleted: bool) -> Result<Vec<DictItem>> {
        let predicate = PostgresTranslator.translate(filter, &TranslationContext::new(&dict.id, &catalog))?;
        let table = quote_identifier(&dict.id);
        let mut sql = format!("select {}.* from {}", table, table);
        for joined in predicate.participant_dict_ids.iter().filter(|id| **id != dict.id) {
            let reference = dict.reference_to(joined).ok_or_else(|| {
                DictError::Validation(format!("Dict '{}' has no reference to '{}'", dict.id, joined))
            })?;
            if reference.multivalued {
                return Err(DictError::Validation(format!(
                    "Dict '{}' cannot be joined through the multivalued field '{}'",
                    joined, reference.id
                )));
            }
            let other = quote_identifier(joined);
            sql.push_str(&format!(
                " left join {} on {}.id = {}.{}",
                other,
                other,
                table,
                quote_identifier(&reference.id)
            ));
        }
        sql.push_str(&format!(" where ({})", predicate.sql));
        if !include_deleted {
            sql.push_str(&format!(" and {}.deleted is null", table));
        }
        sql.push_str(&format!(" order by {}.created, {}.id", table, table));
        let params: Vec<(String, SqlValue)> =
            predicate.params.iter().map(|(name, value)| (name.clone(), bind(value))).collect();
        self.session
            .query(&sql, &params)?
            .into_iter()
            .map(|row| item_from_row(dict, row))
            .collect()
    }

    fn modify(&self, dict: &Dict, item_id: &str, expected_version: Option<i64>, mutation: ItemMutation) -> Result<DictItem> {
        self.session.atomically(|| {
            let stored = self.get_by_id(dict, item_id)?.ok_or_else(|| DictError::ItemNotFound {
                dict_id: dict.id.clone(),
                item_id: item_id.to_string(),
            })?;
            let stale = |actual: i64| DictError::DictConcurrentUpdate {
                dict_id: dict.id.clone(),
                item_id: item_id.to_string(),
                expected: expected_version.unwrap_or(actual),
                actual,
            };
            if expected_version.is_some_and(|expected| expected != stored.version) {
                return Err(stale(stored.version));
            }
            let read_version = stored.version;
            let modified = mutation(stored)?;
            let columns = item_columns(dict, &modified)?;
            let assignments: Vec<String> = columns
                .iter()
                .enumerate()
                .skip(1)
                .map(|(i, (column, _))| format!("{} = :v{}", quote_identifier(column), i))
                .collect();
            let mut params: Vec<(String, SqlValue)> =
                columns.into_iter().enumerate().skip(1).map(|(i, (_, value))| (format!("v{}", i), value)).collect();
            params.push(param("id", text(item_id)));
            params.push(param("read_version", SqlValue::Integer(read_version)));
            let changed = self.session.execute(
                &format!(
                    "update {} set {} where id = :id and version = :read_version",
                    quote_identifier(&dict.id),
                    assignments.join(", ")
                ),
                &params,
            )?;
            if changed == 0 {
                let actual = self.get_by_id(dict, item_id)?.map_or(read_version, |item| item.version);
                return Err(stale(actual));
            }
            Ok(modified)
        })
    }

    fn all_items(&self, dict: &Dict) -> Result<Vec<DictItem>> {
        self.session
            .query(&format!("select * from {} order by created, id", quote_identifier(&dict.id)), &[])?
            .into_iter()
            .map(|row| item_from_row(dict, row))
            .collect()
    }
}

impl<S: SqlSession> VersionSchemeBackend for RelationalBackend<S> {
    fn create_version_store(&self) -> Result<()> {
        self.session.execute_batch(
            "
            create table if not exists version_scheme (
                id text not null primary key,
                target text not null,
                version text not null,
                script text not null,
                checksum text not null,
                installed timestamp not null
            );
            ",
        )
    }

    fn versions(&self, target: &str) -> Result<Vec<VersionScheme>> {
        let rows = self.session.query(
            "
            select id, target, version, script, checksum, installed
                from version_scheme
                where target = :target
                order by installed
            ",
            &[param("target", text(target))],
        )?;
        rows.iter()
            .map(|row| {
                let column = |name: &str| {
                    row_text(row, name)
                        .ok_or_else(|| DictError::Persistence(format!("version_scheme row has no {}", name)))
                };
                Ok(VersionScheme {
                    id: column("id")?,
                    target: column("target")?,
                    version: column("version")?,
                    script: column("script")?,
                    checksum: column("checksum")?,
                    installed: row_timestamp(row, "installed")?
                        .ok_or_else(|| DictError::Persistence("version_scheme row has no installed".to_string()))?,
                })
            })
            .collect()
    }

    fn record_version(&self, row: &VersionScheme) -> Result<()> {
        self.session.execute(
            "
            insert into version_scheme (id, target, version, script, checksum, installed)
                values (:id, :target, :version, :script, :checksum, :installed)
            ",
            &[
                param("id", text(&row.id)),
                param("target", text(&row.target)),
                param("version", text(&row.version)),
                param("script", text(&row.script)),
                param("checksum", text(&row.checksum)),
                param("installed", SqlValue::Text(model::format_timestamp(&row.installed))),
            ],
        )?;
        Ok(())
    }
}

impl<S: SqlSession> TransactionBackend for RelationalBackend<S> {
    fn begin(&self) -> Result<()> {
        self.session.begin()
    }

    fn commit(&self) -> Result<()> {
        self.session.commit()
    }

    fn rollback(&self) -> Result<()> {
        self.session.rollback()
    }
}
