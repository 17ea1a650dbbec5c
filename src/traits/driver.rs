use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::ConnectionConfig;
use crate::error::{AnyDbError, Result};
use crate::types::RawQueryResult;

/// Trait for database driver implementations.
/// Drivers are responsible for:
/// - One-time setup of whatever runtime they wrap
/// - Opening sessions from a [`ConnectionConfig`]
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Name used in [`ConnectionConfig::driver`] to select this driver.
    fn name(&self) -> &str;

    /// Prepares the driver runtime. Called at most once per adapter.
    async fn initialize(&self, libpaths: &[PathBuf]) -> Result<()>;

    /// Establishes a live session.
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Session>>;
}

/// One live database session.
#[async_trait]
pub trait Session: Send {
    /// Compiles `sql` into a statement handle.
    async fn prepare(&mut self, sql: &str) -> Result<Box<dyn PreparedStatement>>;

    /// Releases the session.
    async fn close(&mut self) -> Result<()>;
}

/// A compiled statement with 1-based positional parameters.
#[async_trait]
pub trait PreparedStatement: Send {
    async fn set_null(&mut self, index: usize) -> Result<()>;

    async fn set_int(&mut self, index: usize, value: i64) -> Result<()>;

    async fn set_string(&mut self, index: usize, value: &str) -> Result<()>;

    /// Binds a date given as milliseconds since the Unix epoch.
    async fn set_date(&mut self, index: usize, epoch_millis: i64) -> Result<()>;

    async fn set_double(&mut self, index: usize, _value: f64) -> Result<()> {
        Err(AnyDbError::UnsupportedParameter {
            index,
            kind: "float64",
        })
    }

    async fn set_bool(&mut self, index: usize, _value: bool) -> Result<()> {
        Err(AnyDbError::UnsupportedParameter { index, kind: "bool" })
    }

    /// Runs the statement as a query and decodes the whole result set.
    async fn execute_query(&mut self) -> Result<RawQueryResult>;

    /// Runs the statement as an update, returning the affected row count.
    async fn execute_update(&mut self) -> Result<u64>;
}
