use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection};

use crate::config::ConnectionConfig;
use crate::error::{AnyDbError, Result};
use crate::traits::{DatabaseDriver, PreparedStatement, Session};
use crate::types::{epoch_millis_to_date, RawQueryResult, SqlValue};

use super::check_libpaths;

/// Embedded SQLite driver using rusqlite.
///
/// Accepts `sqlite::memory:`, `sqlite:<path>` and `jdbc:sqlite:<path>` urls.
/// Config properties are applied as `PRAGMA <key> = <value>`.
#[derive(Debug, Default)]
pub struct SqliteDriver;

impl SqliteDriver {
    pub fn new() -> Self {
        Self
    }
}

fn database_path(url: &str) -> Result<&str> {
    url.strip_prefix("jdbc:sqlite:")
        .or_else(|| url.strip_prefix("sqlite:"))
        .filter(|path| !path.is_empty())
        .ok_or_else(|| AnyDbError::Connection(format!("not a sqlite url: {url}")))
}

#[async_trait]
impl DatabaseDriver for SqliteDriver {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn initialize(&self, libpaths: &[PathBuf]) -> Result<()> {
        check_libpaths(libpaths)
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Session>> {
        let path = database_path(&config.url)?;
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(|e| AnyDbError::Connection(e.to_string()))?;

        for (key, value) in &config.properties {
            conn.pragma_update(None, key, value)
                .map_err(|e| AnyDbError::Connection(format!("PRAGMA {key}: {e}")))?;
        }

        Ok(Box::new(SqliteSession {
            conn: Some(Arc::new(Mutex::new(conn))),
        }))
    }
}

type SharedConnection = Arc<Mutex<Connection>>;

fn lock(conn: &SharedConnection) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| AnyDbError::Execution("sqlite connection lock poisoned".to_string()))
}

struct SqliteSession {
    conn: Option<SharedConnection>,
}

#[async_trait]
impl Session for SqliteSession {
    async fn prepare(&mut self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| AnyDbError::Prepare("session is closed".to_string()))?;

        let parameter_count = {
            let guard = lock(conn)?;
            let stmt = guard
                .prepare_cached(sql)
                .map_err(|e| AnyDbError::Prepare(e.to_string()))?;
            stmt.parameter_count()
        };

        Ok(Box::new(SqliteStatement {
            conn: Arc::clone(conn),
            sql: sql.to_string(),
            params: vec![Value::Null; parameter_count],
        }))
    }

    async fn close(&mut self) -> Result<()> {
        let conn = self
            .conn
            .take()
            .ok_or_else(|| AnyDbError::Close("session already closed".to_string()))?;

        match Arc::try_unwrap(conn) {
            Ok(mutex) => {
                let conn = mutex
                    .into_inner()
                    .map_err(|_| AnyDbError::Close("sqlite connection lock poisoned".to_string()))?;
                conn.close().map_err(|(_, e)| AnyDbError::Close(e.to_string()))
            }
            // A statement still holds the handle; it closes when that is dropped.
            Err(_) => Ok(()),
        }
    }
}

struct SqliteStatement {
    conn: SharedConnection,
    sql: String,
    params: Vec<Value>,
}

impl SqliteStatement {
    fn set(&mut self, index: usize, value: Value) -> Result<()> {
        let count = self.params.len();
        let slot = index
            .checked_sub(1)
            .and_then(|i| self.params.get_mut(i))
            .ok_or_else(|| AnyDbError::Bind {
                index,
                message: format!("statement has {count} parameter(s)"),
            })?;
        *slot = value;
        Ok(())
    }
}

/// Blobs and non UTF-8 text have no scalar mapping and are rejected.
fn decode(column: &str, value: ValueRef<'_>) -> Result<SqlValue> {
    match value {
        ValueRef::Null => Ok(SqlValue::Null),
        ValueRef::Integer(i) => Ok(SqlValue::Int64(i)),
        ValueRef::Real(f) => Ok(SqlValue::Float64(f)),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(|s| SqlValue::Text(s.to_string()))
            .map_err(|e| AnyDbError::Execution(format!("column {column}: {e}"))),
        ValueRef::Blob(_) => Err(AnyDbError::Execution(format!(
            "column {column}: blob values are not supported"
        ))),
    }
}

fn query_rows(conn: &Connection, sql: &str, params: &[Value]) -> Result<RawQueryResult> {
    let execution = |e: rusqlite::Error| AnyDbError::Execution(e.to_string());

    let mut stmt = conn.prepare_cached(sql).map_err(execution)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt.query(params_from_iter(params.iter())).map_err(execution)?;
    let mut values = Vec::new();
    while let Some(row) = rows.next().map_err(execution)? {
        let mut record = Vec::with_capacity(columns.len());
        for (index, column) in columns.iter().enumerate() {
            record.push(decode(column, row.get_ref(index).map_err(execution)?)?);
        }
        values.push(record);
    }

    Ok(RawQueryResult::new(columns, values))
}

#[async_trait]
impl PreparedStatement for SqliteStatement {
    async fn set_null(&mut self, index: usize) -> Result<()> {
        self.set(index, Value::Null)
    }

    async fn set_int(&mut self, index: usize, value: i64) -> Result<()> {
        self.set(index, Value::Integer(value))
    }

    async fn set_string(&mut self, index: usize, value: &str) -> Result<()> {
        self.set(index, Value::Text(value.to_string()))
    }

    async fn set_date(&mut self, index: usize, epoch_millis: i64) -> Result<()> {
        let date = epoch_millis_to_date(epoch_millis).ok_or_else(|| AnyDbError::Bind {
            index,
            message: format!("date out of range: {epoch_millis}ms"),
        })?;
        self.set(index, Value::Text(date.to_string()))
    }

    async fn set_double(&mut self, index: usize, value: f64) -> Result<()> {
        self.set(index, Value::Real(value))
    }

    async fn set_bool(&mut self, index: usize, value: bool) -> Result<()> {
        self.set(index, Value::Integer(i64::from(value)))
    }

    async fn execute_query(&mut self) -> Result<RawQueryResult> {
        let conn = lock(&self.conn)?;
        query_rows(&conn, &self.sql, &self.params)
    }

    async fn execute_update(&mut self) -> Result<u64> {
        let conn = lock(&self.conn)?;
        let changed = conn
            .prepare_cached(&self.sql)
            .and_then(|mut stmt| stmt.execute(params_from_iter(self.params.iter())))
            .map_err(|e| AnyDbError::Execution(e.to_string()))?;
        Ok(changed as u64)
    }
}
