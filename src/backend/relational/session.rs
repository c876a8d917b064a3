use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ToSql};
use tracing::{debug, error};

use crate::error::{DictError, Result};

/// Named parameters, names given without the `:` prefix.
pub type SqlParams = [(String, SqlValue)];

/// One result row keyed by column name.
pub type SqlRow = HashMap<String, SqlValue>;

/// A connection able to run the SQL the relational backend generates.
/// Transactions nest; while one is open every other thread waits.
pub trait SqlSession: Send + Sync {
    fn execute(&self, sql: &str, params: &SqlParams) -> Result<usize>;
    fn execute_batch(&self, sql: &str) -> Result<()>;
    fn query(&self, sql: &str, params: &SqlParams) -> Result<Vec<SqlRow>>;
    fn table_exists(&self, table: &str) -> Result<bool>;
    fn begin(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;

    /// Runs `action` in a (nested) transaction.
    fn atomically<T>(&self, action: impl FnOnce() -> Result<T>) -> Result<T>
    where
        Self: Sized,
    {
        self.begin()?;
        match action() {
            Ok(result) => {
                self.commit()?;
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback_error) = self.rollback() {
                    error!(error = %rollback_error, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

struct Inner {
    connection: Connection,
    owner: Option<ThreadId>,
    depth: usize,
}

/// Embedded SQLite connection. Nested transactions are savepoints.
pub struct SqliteSession {
    inner: Mutex<Inner>,
    released: Condvar,
}

impl SqliteSession {
    /// Opens `path`, or a private in-memory database for `:memory:`.
    pub fn open(path: &str) -> Result<Self> {
        let connection = if path == ":memory:" { Connection::open_in_memory()? } else { Connection::open(path)? };
        // like is case-sensitive in Postgres
        connection.execute_batch("pragma case_sensitive_like = on;")?;
        debug!(path, "sqlite session opened");
        Ok(Self {
            inner: Mutex::new(Inner { connection, owner: None, depth: 0 }),
            released: Condvar::new(),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    /// Waits until no other thread holds a transaction.
    fn turn(&self) -> Result<MutexGuard<'_, Inner>> {
        let me = thread::current().id();
        let mut inner = self.inner.lock()?;
        while inner.owner.is_some_and(|owner| owner != me) {
            inner = self.released.wait(inner)?;
        }
        Ok(inner)
    }

    fn end(&self, rollback: bool) -> Result<()> {
        let mut inner = self.turn()?;
        if inner.depth == 0 {
            return Err(DictError::Persistence("no transaction is open".to_string()));
        }
        inner.depth -= 1;
        let savepoint = format!("sp_{}", inner.depth);
        let sql = if rollback {
            format!("rollback to savepoint {0}; release savepoint {0};", savepoint)
        } else {
            format!("release savepoint {};", savepoint)
        };
        let result = inner.connection.execute_batch(&sql);
        if inner.depth == 0 {
            inner.owner = None;
            self.released.notify_all();
        }
        Ok(result?)
    }
}

fn named(params: &SqlParams) -> Vec<(String, &dyn ToSql)> {
    params.iter().map(|(name, value)| (format!(":{}", name), value as &dyn ToSql)).collect()
}

impl SqlSession for SqliteSession {
    fn execute(&self, sql: &str, params: &SqlParams) -> Result<usize> {
        let inner = self.turn()?;
        let named = named(params);
        let bound: Vec<(&str, &dyn ToSql)> = named.iter().map(|(n, v)| (n.as_str(), *v)).collect();
        Ok(inner.connection.execute(sql, bound.as_slice())?)
    }

    fn execute_batch(&self, sql: &str) -> Result<()> {
        let inner = self.turn()?;
        Ok(inner.connection.execute_batch(sql)?)
    }

    fn query(&self, sql: &str, params: &SqlParams) -> Result<Vec<SqlRow>> {
        let inner = self.turn()?;
        let mut statement = inner.connection.prepare(sql)?;
        let columns: Vec<String> = statement.column_names().iter().map(|c| c.to_string()).collect();
        let named = named(params);
        let bound: Vec<(&str, &dyn ToSql)> = named.iter().map(|(n, v)| (n.as_str(), *v)).collect();
        let mut rows = statement.query(bound.as_slice())?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = SqlRow::with_capacity(columns.len());
            for (i, column) in columns.iter().enumerate() {
                values.insert(column.clone(), row.get::<_, SqlValue>(i)?);
            }
            result.push(values);
        }
        Ok(result)
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        let rows = self.query(
            "select name from sqlite_master where type = 'table' and name = :name",
            &[("name".to_string(), SqlValue::Text(table.to_string()))],
        )?;
        Ok(!rows.is_empty())
    }

    fn begin(&self) -> Result<()> {
        let mut inner = self.turn()?;
        inner.connection.execute_batch(&format!("savepoint sp_{};", inner.depth))?;
        inner.depth += 1;
        inner.owner = Some(thread::current().id());
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.end(false)
    }

    fn rollback(&self) -> Result<()> {
        self.end(true)
    }
}
