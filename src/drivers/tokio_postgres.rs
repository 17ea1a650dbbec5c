use std::error::Error;
use std::fmt::Write;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tokio_postgres::types::private::BytesMut;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use tokio_postgres::{Client, NoTls, Statement};

use crate::config::ConnectionConfig;
use crate::error::{AnyDbError, Result};
use crate::traits::{DatabaseDriver, PreparedStatement, Session};
use crate::types::{epoch_millis_to_date, RawQueryResult, SqlValue};

use super::check_libpaths;

/// PostgreSQL driver implementation using tokio-postgres.
///
/// The url is a tokio-postgres connection string, optionally prefixed with
/// `jdbc:` (`jdbc:postgresql://host/db`).
#[derive(Debug, Default)]
pub struct TokioPostgresDriver;

impl TokioPostgresDriver {
    pub fn new() -> Self {
        Self
    }
}

fn pg_config(config: &ConnectionConfig) -> Result<tokio_postgres::Config> {
    let url = config.url.strip_prefix("jdbc:").unwrap_or(&config.url);
    let mut pg: tokio_postgres::Config = url
        .parse()
        .map_err(|e: tokio_postgres::Error| AnyDbError::Connection(e.to_string()))?;

    if let Some(user) = &config.user {
        pg.user(user);
    }
    if let Some(password) = &config.password {
        pg.password(password);
    }
    for (key, value) in &config.properties {
        match key.as_str() {
            "application_name" => {
                pg.application_name(value);
            }
            "options" => {
                pg.options(value);
            }
            "dbname" => {
                pg.dbname(value);
            }
            _ => tracing::debug!(property = %key, "ignoring unsupported postgres property"),
        }
    }
    Ok(pg)
}

#[async_trait]
impl DatabaseDriver for TokioPostgresDriver {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn initialize(&self, libpaths: &[PathBuf]) -> Result<()> {
        check_libpaths(libpaths)
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Session>> {
        let (client, connection) = pg_config(config)?
            .connect(NoTls)
            .await
            .map_err(|e| AnyDbError::Connection(e.to_string()))?;

        // Spawn the connection handler
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "PostgreSQL connection error");
            }
        });

        Ok(Box::new(PostgresSession {
            client: Some(Arc::new(client)),
        }))
    }
}

struct PostgresSession {
    client: Option<Arc<Client>>,
}

#[async_trait]
impl Session for PostgresSession {
    async fn prepare(&mut self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| AnyDbError::Prepare("session is closed".to_string()))?;
        let statement = client
            .prepare(sql)
            .await
            .map_err(|e| AnyDbError::Prepare(e.to_string()))?;

        let params = statement.params().iter().map(|_| None).collect();
        Ok(Box::new(PostgresStatement {
            client: Arc::clone(client),
            statement,
            params,
        }))
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the last client handle terminates the connection task.
        self.client
            .take()
            .map(drop)
            .ok_or_else(|| AnyDbError::Close("session already closed".to_string()))
    }
}

type BoxedParam = Box<dyn ToSql + Sync + Send>;
type ConvertResult<T> = std::result::Result<T, Box<dyn Error + Sync + Send>>;

/// NULL for a parameter of any type.
#[derive(Debug)]
struct UntypedNull;

impl ToSql for UntypedNull {
    fn to_sql(&self, _ty: &Type, _out: &mut BytesMut) -> ConvertResult<IsNull> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// NUMERIC decoded to its exact decimal text.
#[derive(Debug, PartialEq)]
struct NumericText(String);

impl<'a> FromSql<'a> for NumericText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> ConvertResult<Self> {
        numeric_to_string(raw).map(NumericText)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Renders the binary NUMERIC format: ndigits, weight, sign and dscale
/// headers followed by base-10000 digit groups.
fn numeric_to_string(raw: &[u8]) -> ConvertResult<String> {
    let word = |at: usize| -> ConvertResult<u16> {
        raw.get(at..at + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated numeric value".into())
    };

    let ndigits = usize::from(word(0)?);
    let weight = i32::from(word(2)? as i16);
    let sign = word(4)?;
    let dscale = usize::from(word(6)?);

    match sign {
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        0x0000 | 0x4000 => {}
        other => return Err(format!("invalid numeric sign {other:#x}").into()),
    }

    let digits = (0..ndigits)
        .map(|i| word(8 + 2 * i))
        .collect::<ConvertResult<Vec<u16>>>()?;
    // Group i is worth 10000^(weight - i).
    let group = |i: i32| {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        let _ = write!(out, "{}", group(0));
        for i in 1..=weight {
            let _ = write!(out, "{:04}", group(i));
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while fraction.len() < dscale {
            let _ = write!(fraction, "{:04}", group(i));
            i += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }
    Ok(out)
}

struct PostgresStatement {
    client: Arc<Client>,
    statement: Statement,
    params: Vec<Option<BoxedParam>>,
}

impl PostgresStatement {
    fn param_type(&self, index: usize) -> Result<Type> {
        index
            .checked_sub(1)
            .and_then(|i| self.statement.params().get(i))
            .cloned()
            .ok_or_else(|| AnyDbError::Bind {
                index,
                message: format!(
                    "statement has {} parameter(s)",
                    self.statement.params().len()
                ),
            })
    }

    /// Declared type of parameter `index`, if a `T` can be sent for it.
    fn accepting<T: ToSql>(&self, index: usize, kind: &str) -> Result<Type> {
        let ty = self.param_type(index)?;
        if T::accepts(&ty) {
            Ok(ty)
        } else {
            Err(AnyDbError::Bind {
                index,
                message: format!("cannot bind {kind} to a parameter of type {ty}"),
            })
        }
    }

    fn set(&mut self, index: usize, value: BoxedParam) -> Result<()> {
        self.param_type(index)?;
        self.params[index - 1] = Some(value);
        Ok(())
    }

    fn bound(&self) -> Result<Vec<&(dyn ToSql + Sync)>> {
        self.params
            .iter()
            .enumerate()
            .map(|(i, param)| {
                param
                    .as_ref()
                    .map(|b| b.as_ref() as &(dyn ToSql + Sync))
                    .ok_or_else(|| AnyDbError::Bind {
                        index: i + 1,
                        message: "parameter not bound".to_string(),
                    })
            })
            .collect()
    }
}

fn out_of_range(index: usize, value: impl std::fmt::Display, ty: &Type) -> AnyDbError {
    AnyDbError::Bind {
        index,
        message: format!("{value} does not fit in {ty}"),
    }
}

#[async_trait]
impl PreparedStatement for PostgresStatement {
    async fn set_null(&mut self, index: usize) -> Result<()> {
        self.set(index, Box::new(UntypedNull))
    }

    async fn set_int(&mut self, index: usize, value: i64) -> Result<()> {
        let ty = self.param_type(index)?;
        let param: BoxedParam = if ty == Type::INT2 {
            Box::new(i16::try_from(value).map_err(|_| out_of_range(index, value, &ty))?)
        } else if ty == Type::INT4 {
            Box::new(i32::try_from(value).map_err(|_| out_of_range(index, value, &ty))?)
        } else {
            self.accepting::<i64>(index, "an integer")?;
            Box::new(value)
        };
        self.set(index, param)
    }

    async fn set_string(&mut self, index: usize, value: &str) -> Result<()> {
        self.accepting::<String>(index, "a string")?;
        self.set(index, Box::new(value.to_string()))
    }

    async fn set_date(&mut self, index: usize, epoch_millis: i64) -> Result<()> {
        self.accepting::<NaiveDate>(index, "a date")?;
        let date = epoch_millis_to_date(epoch_millis).ok_or_else(|| AnyDbError::Bind {
            index,
            message: format!("date out of range: {epoch_millis}ms"),
        })?;
        self.set(index, Box::new(date))
    }

    async fn set_double(&mut self, index: usize, value: f64) -> Result<()> {
        let ty = self.param_type(index)?;
        let param: BoxedParam = if ty == Type::FLOAT4 {
            Box::new(value as f32)
        } else {
            self.accepting::<f64>(index, "a double")?;
            Box::new(value)
        };
        self.set(index, param)
    }

    async fn set_bool(&mut self, index: usize, value: bool) -> Result<()> {
        self.accepting::<bool>(index, "a bool")?;
        self.set(index, Box::new(value))
    }

    async fn execute_query(&mut self) -> Result<RawQueryResult> {
        let params = self.bound()?;
        let rows = self
            .client
            .query(&self.statement, &params)
            .await
            .map_err(|e| AnyDbError::Execution(e.to_string()))?;

        let columns: Vec<String> = self
            .statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let values = rows
            .iter()
            .map(|row| {
                row.columns()
                    .iter()
                    .enumerate()
                    .map(|(i, col)| row_value(row, i, col.type_()))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RawQueryResult::new(columns, values))
    }

    async fn execute_update(&mut self) -> Result<u64> {
        let params = self.bound()?;
        self.client
            .execute(&self.statement, &params)
            .await
            .map_err(|e| AnyDbError::Execution(e.to_string()))
    }
}

fn get<'a, T: FromSql<'a>>(row: &'a tokio_postgres::Row, index: usize) -> Result<Option<T>> {
    row.try_get::<_, Option<T>>(index)
        .map_err(|e| AnyDbError::Execution(format!("column {index}: {e}")))
}

/// Decodes a column by its declared type. Types without a scalar mapping
/// are an error rather than a silent NULL.
fn row_value(row: &tokio_postgres::Row, index: usize, ty: &Type) -> Result<SqlValue> {
    let value = if *ty == Type::INT2 {
        get::<i16>(row, index)?.map(|v| SqlValue::Int32(i32::from(v)))
    } else if *ty == Type::INT4 {
        get::<i32>(row, index)?.map(SqlValue::Int32)
    } else if *ty == Type::INT8 {
        get::<i64>(row, index)?.map(SqlValue::Int64)
    } else if *ty == Type::FLOAT4 {
        get::<f32>(row, index)?.map(|v| SqlValue::Float64(f64::from(v)))
    } else if *ty == Type::FLOAT8 {
        get::<f64>(row, index)?.map(SqlValue::Float64)
    } else if *ty == Type::NUMERIC {
        get::<NumericText>(row, index)?.map(|n| SqlValue::Text(n.0))
    } else if *ty == Type::BOOL {
        get::<bool>(row, index)?.map(SqlValue::Bool)
    } else if *ty == Type::DATE {
        get::<NaiveDate>(row, index)?.map(SqlValue::Date)
    } else if *ty == Type::TIMESTAMP {
        get::<NaiveDateTime>(row, index)?.map(|ts| SqlValue::Text(ts.to_string()))
    } else if *ty == Type::TIMESTAMPTZ {
        get::<DateTime<Utc>>(row, index)?.map(|ts| SqlValue::Text(ts.to_rfc3339()))
    } else if <String as FromSql>::accepts(ty) {
        get::<String>(row, index)?.map(SqlValue::Text)
    } else {
        let name = row.columns().get(index).map(|c| c.name()).unwrap_or("?");
        return Err(AnyDbError::Execution(format!(
            "column {name} has unsupported type {ty}"
        )));
    };
    Ok(value.unwrap_or(SqlValue::Null))
}
