//! Transports that deliver batches of log records to a collector.
//!
//! - [`SocketTransport`]: TCP (optionally TLS), one JSON record per line
//! - [`HttpTransport`]: one `POST` per batch with a JSON array body
//!
//! A transport reports which tags it delivered. It never re-queues anything
//! itself; the caller decides what happens to the remainder.

mod error;
mod http;
mod socket;
mod tls;
mod transport;

pub use error::{TransportError, TransportResult};
pub use http::HttpTransport;
pub use socket::{SocketConfig, SocketTransport};
pub use transport::{transport_from_config, Transport, TransportReport};
