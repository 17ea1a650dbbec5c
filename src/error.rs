use thiserror::Error;

/// Error type for anydb operations.
///
/// Every failure is surfaced through the operation that caused it; nothing is
/// retried or swallowed.
#[derive(Debug, Error)]
pub enum AnyDbError {
    #[error("unknown config: {0}")]
    ConfigNotFound(String),

    #[error("no driver installed under the name {0:?}")]
    UnknownDriver(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Driver initialization failed: {0}")]
    DriverInit(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Prepare failed: {0}")]
    Prepare(String),

    #[error("Binding parameter {index} failed: {message}")]
    Bind { index: usize, message: String },

    #[error("Unsupported parameter type {kind} at position {index}")]
    UnsupportedParameter { index: usize, kind: &'static str },

    #[error("Query failed: {0}")]
    Execution(String),

    #[error("Close failed: {0}")]
    Close(String),

    #[error("Expected {expected} row(s), got {actual}")]
    UnexpectedRowCount { expected: usize, actual: usize },

    #[error("Column not found: {0}")]
    ColumnNotFound(String),
}

/// Result type alias for anydb operations
pub type Result<T> = std::result::Result<T, AnyDbError>;
