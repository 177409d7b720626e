//! Core types, configuration, and utilities for the log shipper.

mod batch;
mod config;
mod error;
mod logging;
mod paths;
mod record;

pub use batch::{Batch, QueuedRecord, Tag};
pub use config::{Config, DEFAULT_LOG_LEVEL, DEFAULT_PORT, TOKEN_KEY};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
pub use record::LogRecord;
