//! Per-query event channel.
//!
//! A [`Query`] is handed back as soon as a statement is submitted. The
//! connection's worker later pushes one [`QueryEvent::Row`] per result row and
//! then exactly one [`QueryEvent::Done`]. Events are buffered, so rows are not
//! lost when the caller starts listening after execution has begun.

use tokio::sync::mpsc;

use crate::error::{AnyDbError, Result};
use crate::types::{QueryResult, Row};

/// Terminal payload of a successful statement.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// SELECT: every row, in result order.
    Rows(QueryResult),
    /// Any other statement: the driver's affected row count.
    Updated(u64),
}

impl QueryOutcome {
    pub fn rows(&self) -> Option<&QueryResult> {
        match self {
            QueryOutcome::Rows(result) => Some(result),
            QueryOutcome::Updated(_) => None,
        }
    }

    pub fn into_rows(self) -> Option<QueryResult> {
        match self {
            QueryOutcome::Rows(result) => Some(result),
            QueryOutcome::Updated(_) => None,
        }
    }

    pub fn update_count(&self) -> Option<u64> {
        match self {
            QueryOutcome::Updated(count) => Some(*count),
            QueryOutcome::Rows(_) => None,
        }
    }
}

#[derive(Debug)]
pub enum QueryEvent {
    Row(Row),
    Done(Result<QueryOutcome>),
}

/// Producer half, owned by whoever runs the statement.
#[derive(Debug)]
pub(crate) struct QuerySink {
    tx: mpsc::UnboundedSender<QueryEvent>,
}

impl QuerySink {
    pub(crate) fn row(&self, row: Row) {
        // A dropped Query means nobody is listening; execution still runs to completion.
        let _ = self.tx.send(QueryEvent::Row(row));
    }

    /// Consumes the sink so a statement can only complete once.
    pub(crate) fn complete(self, result: Result<QueryOutcome>) {
        let _ = self.tx.send(QueryEvent::Done(result));
    }
}

/// Creates a connected sink/query pair.
pub(crate) fn channel() -> (QuerySink, Query) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        QuerySink { tx },
        Query {
            events: rx,
            outcome: None,
        },
    )
}

/// Handle for one submitted statement.
#[derive(Debug)]
pub struct Query {
    events: mpsc::UnboundedReceiver<QueryEvent>,
    outcome: Option<Result<QueryOutcome>>,
}

impl Query {
    /// A query that has already failed, without touching any session.
    pub(crate) fn failed(err: AnyDbError) -> Self {
        let (sink, query) = channel();
        sink.complete(Err(err));
        query
    }

    /// Next row event, or `None` once the statement has completed.
    pub async fn next_row(&mut self) -> Option<Row> {
        if self.outcome.is_some() {
            return None;
        }
        match self.events.recv().await {
            Some(QueryEvent::Row(row)) => Some(row),
            Some(QueryEvent::Done(result)) => {
                self.outcome = Some(result);
                None
            }
            None => {
                self.outcome = Some(Err(AnyDbError::Connection(
                    "connection dropped before the query completed".to_string(),
                )));
                None
            }
        }
    }

    /// Waits for completion. Rows not yet taken with [`Query::next_row`] are discarded;
    /// the outcome still carries all of them for SELECTs.
    pub async fn finish(mut self) -> Result<QueryOutcome> {
        while self.next_row().await.is_some() {}
        self.take_outcome()
    }

    /// Calls `on_row` for every row event in order, then returns the outcome.
    pub async fn for_each_row<F>(mut self, mut on_row: F) -> Result<QueryOutcome>
    where
        F: FnMut(Row),
    {
        while let Some(row) = self.next_row().await {
            on_row(row);
        }
        self.take_outcome()
    }

    fn take_outcome(&mut self) -> Result<QueryOutcome> {
        self.outcome.take().unwrap_or_else(|| {
            Err(AnyDbError::Connection(
                "query outcome already taken".to_string(),
            ))
        })
    }
}
