//! Transport error types.

use thiserror::Error;

/// Why a transport could not deliver (all of) a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Could not reach the collector, or the connection broke mid-batch
    #[error("Connection error: {0}")]
    Connection(String),

    /// TLS setup or handshake failed
    #[error("TLS error: {0}")]
    Tls(String),

    /// An operation exceeded the configured timeout
    #[error("Timed out")]
    Timeout,

    /// The collector answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// A record could not be encoded for the wire
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The send was cancelled before it finished
    #[error("Cancelled")]
    Cancelled,

    /// The transport could not be built from configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<shipper_core::CoreError> for TransportError {
    fn from(e: shipper_core::CoreError) -> Self {
        match e {
            shipper_core::CoreError::Json(e) => TransportError::Serialization(e.to_string()),
            other => TransportError::Config(other.to_string()),
        }
    }
}

/// Result type alias using TransportError.
pub type TransportResult<T> = Result<T, TransportError>;
