//! anydb - a uniform async query interface over pluggable database drivers
//!
//! Configurations are registered under an identifier derived from their url.
//! Connections are resolved by url (or host/database endpoint), opened through
//! the configured driver, and run statements one at a time. Each submitted
//! statement returns a [`Query`] that yields its rows and then one outcome.
//!
//! # Example
//! ```ignore
//! use anydb::{Adapter, ConnectionConfig, SqlValue};
//!
//! let mut adapter = Adapter::with_default_drivers();
//! adapter.register_config(ConnectionConfig::new("sqlite::memory:", "sqlite"));
//!
//! let mut conn = adapter.connect("sqlite::memory:").await?;
//! conn.query("CREATE TABLE t(ID INTEGER, TEXT VARCHAR(255))").finish().await?;
//! conn.query_with("INSERT INTO t VALUES (?, ?)", &[1.into(), "a".into()])
//!     .finish()
//!     .await?;
//!
//! let outcome = conn
//!     .query("SELECT * FROM t")
//!     .for_each_row(|row| println!("{:?}", row.get("TEXT")))
//!     .await?;
//!
//! conn.end().await?;
//! ```

pub mod adapter;
pub mod config;
pub mod connection;
pub mod drivers;
pub mod error;
pub mod executor;
pub mod query;
pub mod traits;
pub mod types;

// Re-export main types for convenient access
pub use adapter::{Adapter, DriverRuntime};
pub use config::{ConfigRegistry, ConnectTarget, ConnectionConfig, Identifier};
pub use connection::{Connection, ConnectionState};
pub use error::{AnyDbError, Result};
pub use executor::StatementKind;
pub use query::{Query, QueryEvent, QueryOutcome};
pub use traits::{DatabaseDriver, PreparedStatement, Session};
pub use types::{QueryResult, RawQueryResult, Row, SqlValue};
