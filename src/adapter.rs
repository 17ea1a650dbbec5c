use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::config::{ConfigRegistry, ConnectTarget, ConnectionConfig, Identifier};
use crate::connection::Connection;
use crate::drivers::{SqliteDriver, TokioPostgresDriver};
use crate::error::{AnyDbError, Result};
use crate::traits::DatabaseDriver;

/// A driver plus the record of its one-time initialization.
///
/// The runtime is initialized by the first connection that opens through it
/// and is never initialized again. It is torn down when the owning [`Adapter`]
/// and every [`Connection`] created from it have been dropped.
pub struct DriverRuntime {
    driver: Arc<dyn DatabaseDriver>,
    libpaths: OnceCell<Vec<PathBuf>>,
}

impl DriverRuntime {
    pub fn new(driver: Arc<dyn DatabaseDriver>) -> Self {
        Self {
            driver,
            libpaths: OnceCell::new(),
        }
    }

    pub fn driver(&self) -> &Arc<dyn DatabaseDriver> {
        &self.driver
    }

    pub fn is_initialized(&self) -> bool {
        self.libpaths.initialized()
    }

    /// Runs [`DatabaseDriver::initialize`] unless it already succeeded.
    /// A failed initialization is retried by the next caller.
    pub async fn ensure_initialized(&self, libpaths: &[PathBuf]) -> Result<()> {
        let active = self
            .libpaths
            .get_or_try_init(|| async {
                self.driver.initialize(libpaths).await?;
                tracing::info!(driver = self.driver.name(), ?libpaths, "driver runtime initialized");
                Ok::<_, AnyDbError>(libpaths.to_vec())
            })
            .await?;

        if active.as_slice() != libpaths {
            tracing::warn!(
                driver = self.driver.name(),
                ?libpaths,
                ?active,
                "driver runtime already initialized, ignoring library paths"
            );
        }
        Ok(())
    }
}

/// Main entry point for anydb.
/// Holds the registered configurations and the installed drivers.
///
/// # Example
/// ```ignore
/// let mut adapter = Adapter::with_default_drivers();
/// adapter.register_config(ConnectionConfig::new("sqlite::memory:", "sqlite"));
///
/// let mut conn = adapter.connect("sqlite::memory:").await?;
/// conn.query("CREATE TABLE t(ID INTEGER, TEXT VARCHAR(255))").finish().await?;
/// let rows = conn.query("SELECT * FROM t").finish().await?;
/// conn.end().await?;
/// ```
#[derive(Default)]
pub struct Adapter {
    registry: ConfigRegistry,
    runtimes: HashMap<String, Arc<DriverRuntime>>,
}

impl Adapter {
    /// An adapter with no drivers installed.
    pub fn new() -> Self {
        Self::default()
    }

    /// An adapter with the SQLite and PostgreSQL drivers installed.
    pub fn with_default_drivers() -> Self {
        Self::new()
            .with_driver(Arc::new(SqliteDriver::new()))
            .with_driver(Arc::new(TokioPostgresDriver::new()))
    }

    /// Installs a driver under its [`DatabaseDriver::name`], replacing any
    /// driver of the same name.
    pub fn with_driver(mut self, driver: Arc<dyn DatabaseDriver>) -> Self {
        self.install_driver(driver);
        self
    }

    pub fn install_driver(&mut self, driver: Arc<dyn DatabaseDriver>) {
        let name = driver.name().to_string();
        self.runtimes
            .insert(name, Arc::new(DriverRuntime::new(driver)));
    }

    pub fn with_registry(mut self, registry: ConfigRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &ConfigRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ConfigRegistry {
        &mut self.registry
    }

    pub fn register_config(&mut self, config: ConnectionConfig) -> Identifier {
        self.registry.register(config)
    }

    /// Runtime for an installed driver.
    pub fn runtime(&self, driver: &str) -> Option<&Arc<DriverRuntime>> {
        self.runtimes.get(driver)
    }

    /// Resolves `target` to an unopened connection. Performs no I/O.
    pub fn create_connection(&self, target: impl Into<ConnectTarget>) -> Result<Connection> {
        let config = self.registry.get(&target.into())?;
        let runtime = self
            .runtimes
            .get(&config.driver)
            .ok_or_else(|| AnyDbError::UnknownDriver(config.driver.clone()))?;
        Ok(Connection::new(config.clone(), Arc::clone(runtime)))
    }

    /// Resolves `target` and opens the connection.
    pub async fn connect(&self, target: impl Into<ConnectTarget>) -> Result<Connection> {
        let mut connection = self.create_connection(target)?;
        connection.open().await?;
        Ok(connection)
    }
}
