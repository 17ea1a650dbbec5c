mod sqlite;
mod tokio_postgres;

use std::path::PathBuf;

use crate::error::{AnyDbError, Result};

pub use self::in_memory_test::{
    DriverCall, FailStage, InMemoryTestDriver, InMemoryTestResponseBuilder, RecordedQuery,
};
pub use self::sqlite::SqliteDriver;
pub use self::tokio_postgres::TokioPostgresDriver;

/// Runtime setup shared by the built-in drivers: every library path must exist.
pub(crate) fn check_libpaths(libpaths: &[PathBuf]) -> Result<()> {
    match libpaths.iter().find(|path| !path.exists()) {
        Some(missing) => Err(AnyDbError::DriverInit(format!(
            "library path not found: {}",
            missing.display()
        ))),
        None => Ok(()),
    }
}
