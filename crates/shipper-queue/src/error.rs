//! Storage error types.

use thiserror::Error;

/// Error raised when the persistent queue cannot read or write its store.
///
/// The shipping controller logs these and carries on; a failed append loses
/// one record rather than blocking ingestion.
#[derive(Error, Debug)]
pub enum QueueError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Executor thread or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// Stored record could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record model error
    #[error("Record error: {0}")]
    Record(#[from] shipper_core::CoreError),

    /// Invalid data error
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias using QueueError.
pub type QueueResult<T> = Result<T, QueueError>;
