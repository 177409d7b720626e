//! Durable, batching log shipper.
//!
//! Records handed to a [`ShippingController`] are written to a SQLite-backed
//! queue before anything else happens. A flush drains the queue, hands the
//! batch to a [`Transport`](shipper_transport::Transport) and puts back
//! whatever the collector did not acknowledge. Every queue mutation runs on
//! one dispatch worker, so appends, drains and re-insertions never interleave.
//!
//! ```ignore
//! let controller = ShippingController::from_config(&config, &paths).await?;
//! controller.accept(LogRecord::from_json_str(r#"{"message":"hello"}"#)?);
//! let report = controller.flush().await?;
//! ```

mod batch_sender;
mod controller;
mod destination;
mod dispatch;
mod error;

pub use batch_sender::{BatchSender, WriteOutcome};
pub use controller::{ControllerOptions, FlushCompletion, FlushReport, ShippingController};
pub use destination::{
    ConsoleDestination, Destination, DestinationRouter, FileDestination, NetworkDestination,
};
pub use error::{ShipError, ShipResult};
