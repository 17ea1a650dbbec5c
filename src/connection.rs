use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::adapter::DriverRuntime;
use crate::config::{ConnectionConfig, Identifier};
use crate::error::{AnyDbError, Result};
use crate::executor::{self, Statement};
use crate::query::{self, Query, QuerySink};
use crate::traits::Session;
use crate::types::SqlValue;

/// Lifecycle of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unopened,
    Open,
    Closed,
}

enum Job {
    Query {
        statement: Statement,
        sink: QuerySink,
    },
    Close {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// A single driver session.
///
/// Statements submitted through one connection run strictly one after another,
/// in submission order, on a worker task that owns the session.
pub struct Connection {
    config: ConnectionConfig,
    runtime: Arc<DriverRuntime>,
    state: ConnectionState,
    jobs: Option<mpsc::UnboundedSender<Job>>,
}

impl Connection {
    pub(crate) fn new(config: ConnectionConfig, runtime: Arc<DriverRuntime>) -> Self {
        Self {
            config,
            runtime,
            state: ConnectionState::Unopened,
            jobs: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn identifier(&self) -> Identifier {
        self.config.identifier()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Initializes the driver runtime if needed and opens the session.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Unopened => {}
            ConnectionState::Open => {
                return Err(AnyDbError::Connection("connection already open".to_string()))
            }
            ConnectionState::Closed => {
                return Err(AnyDbError::Connection("connection is closed".to_string()))
            }
        }

        self.runtime.ensure_initialized(&self.config.libpath).await?;
        let session = self.runtime.driver().connect(&self.config).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(session, rx, self.identifier()));

        self.jobs = Some(tx);
        self.state = ConnectionState::Open;
        tracing::info!(identifier = %self.identifier(), driver = %self.config.driver, "connection opened");
        Ok(())
    }

    /// Submits a statement without parameters.
    pub fn query(&self, sql: &str) -> Query {
        self.query_with(sql, &[])
    }

    /// Submits a statement whose placeholders are bound, in order, to `params`.
    ///
    /// Placeholders use the driver's native syntax (`?` for SQLite, `$1` for
    /// PostgreSQL). The returned [`Query`] is live immediately; execution
    /// happens on the connection's worker.
    pub fn query_with(&self, sql: &str, params: &[SqlValue]) -> Query {
        let jobs = match (&self.state, &self.jobs) {
            (ConnectionState::Open, Some(jobs)) => jobs,
            (state, _) => {
                return Query::failed(AnyDbError::Connection(format!(
                    "cannot query a connection in state {state:?}"
                )))
            }
        };

        let (sink, query) = query::channel();
        let job = Job::Query {
            statement: Statement::new(sql, params),
            sink,
        };
        if let Err(mpsc::error::SendError(job)) = jobs.send(job) {
            if let Job::Query { sink, .. } = job {
                sink.complete(Err(AnyDbError::Connection(
                    "connection worker has stopped".to_string(),
                )));
            }
        }
        query
    }

    /// Closes the session once every previously submitted statement is done.
    ///
    /// A second call fails with [`AnyDbError::Close`].
    pub async fn end(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Open => {}
            ConnectionState::Closed => {
                return Err(AnyDbError::Close("connection already closed".to_string()))
            }
            ConnectionState::Unopened => {
                return Err(AnyDbError::Close("connection was never opened".to_string()))
            }
        }

        self.state = ConnectionState::Closed;
        let jobs = self
            .jobs
            .take()
            .ok_or_else(|| AnyDbError::Close("connection worker missing".to_string()))?;

        let (reply, done) = oneshot::channel();
        jobs.send(Job::Close { reply })
            .map_err(|_| AnyDbError::Close("connection worker has stopped".to_string()))?;
        let result = done
            .await
            .map_err(|_| AnyDbError::Close("connection worker has stopped".to_string()))?;

        tracing::info!(identifier = %self.identifier(), "connection closed");
        result
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("identifier", &self.identifier())
            .field("driver", &self.config.driver)
            .field("state", &self.state)
            .finish()
    }
}

async fn run_worker(
    mut session: Box<dyn Session>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    identifier: Identifier,
) {
    while let Some(job) = jobs.recv().await {
        match job {
            Job::Query { statement, sink } => {
                executor::execute(session.as_mut(), &statement, sink).await;
            }
            Job::Close { reply } => {
                let _ = reply.send(session.close().await);
                return;
            }
        }
    }

    // Connection dropped without `end`.
    if let Err(err) = session.close().await {
        tracing::warn!(%identifier, error = %err, "failed to close abandoned session");
    }
}
