//! Runs one statement against a session: prepare, bind, execute, then hand
//! the result to the query's event channel.

use crate::error::Result;
use crate::query::{QueryOutcome, QuerySink};
use crate::traits::{PreparedStatement, Session};
use crate::types::{date_to_epoch_millis, QueryResult, SqlValue};

/// How a statement is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Runs through `execute_query` and yields rows.
    Read,
    /// Runs through `execute_update` and yields an affected row count.
    Write,
}

impl StatementKind {
    /// A statement reads when its first six non-blank characters are `select`,
    /// ignoring case. Everything else is treated as a write.
    pub fn classify(sql: &str) -> Self {
        let head: String = sql.trim().chars().take(6).collect();
        if head.eq_ignore_ascii_case("select") {
            StatementKind::Read
        } else {
            StatementKind::Write
        }
    }
}

/// A statement waiting for its turn on a session.
#[derive(Debug, Clone)]
pub(crate) struct Statement {
    pub(crate) sql: String,
    pub(crate) params: Vec<SqlValue>,
    pub(crate) kind: StatementKind,
}

impl Statement {
    pub(crate) fn new(sql: &str, params: &[SqlValue]) -> Self {
        Self {
            sql: sql.to_string(),
            params: params.to_vec(),
            kind: StatementKind::classify(sql),
        }
    }
}

/// Executes `statement` and completes `sink` exactly once.
pub(crate) async fn execute(session: &mut dyn Session, statement: &Statement, sink: QuerySink) {
    let result = run(session, statement, &sink).await;
    if let Err(err) = &result {
        tracing::debug!(sql = %statement.sql, error = %err, "statement failed");
    }
    sink.complete(result);
}

async fn run(
    session: &mut dyn Session,
    statement: &Statement,
    sink: &QuerySink,
) -> Result<QueryOutcome> {
    tracing::debug!(
        sql = %statement.sql,
        params = statement.params.len(),
        kind = ?statement.kind,
        "executing statement"
    );

    let mut prepared = session.prepare(&statement.sql).await?;
    bind(prepared.as_mut(), &statement.params).await?;

    match statement.kind {
        StatementKind::Read => {
            let rows = prepared.execute_query().await?.into_rows();
            for row in &rows {
                sink.row(row.clone());
            }
            Ok(QueryOutcome::Rows(QueryResult::new(rows)))
        }
        StatementKind::Write => Ok(QueryOutcome::Updated(prepared.execute_update().await?)),
    }
}

/// Binds parameters in order, one at a time. Positions are 1-based.
async fn bind(statement: &mut dyn PreparedStatement, params: &[SqlValue]) -> Result<()> {
    for (offset, value) in params.iter().enumerate() {
        let index = offset + 1;
        match value {
            SqlValue::Null => statement.set_null(index).await?,
            SqlValue::Int32(v) => statement.set_int(index, i64::from(*v)).await?,
            SqlValue::Int64(v) => statement.set_int(index, *v).await?,
            SqlValue::Text(v) => statement.set_string(index, v).await?,
            SqlValue::Date(v) => statement.set_date(index, date_to_epoch_millis(*v)).await?,
            SqlValue::Float64(v) => statement.set_double(index, *v).await?,
            SqlValue::Bool(v) => statement.set_bool(index, *v).await?,
        }
    }
    Ok(())
}
