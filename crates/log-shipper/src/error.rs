//! Shipping error types.

use shipper_core::CoreError;
use shipper_queue::QueueError;
use shipper_transport::TransportError;
use thiserror::Error;

/// Error delivered through a flush completion or a controller query.
#[derive(Error, Debug)]
pub enum ShipError {
    /// The transport reported a failure; unsent records were re-queued
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The persistent queue could not be read or written
    #[error("Storage error: {0}")]
    Storage(#[from] QueueError),

    /// Configuration or record error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// The operation was discarded by `cancel`
    #[error("Cancelled")]
    Cancelled,

    /// The dispatch worker is no longer running
    #[error("Dispatch worker stopped")]
    WorkerStopped,
}

/// Result type alias using ShipError.
pub type ShipResult<T> = Result<T, ShipError>;
