//! # Observability
//!
//! Tracing setup for the log shipper's own diagnostics.
//!
//! Components are **log producers** only. They call `observability::init()`
//! once at startup and use standard `tracing` macros everywhere else; where
//! the lines end up is decided here:
//!
//! - structured JSONL appended to `~/.log-shipper/logs/shipper.jsonl`
//!   (or `LogConfig::log_path`)
//! - optionally a compact human readable copy on stderr
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "log-shipper".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! ```

mod file_writer;
mod json_layer;

use std::path::PathBuf;

pub use file_writer::{CentralLogWriter, WriterFactory};
pub use json_layer::JsonLayer;

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, included in every log line for filtering.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional custom log file path.
    /// Defaults to `~/.log-shipper/logs/shipper.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also emit logs to stderr for immediate feedback.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize with default settings and the given service name.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize with custom configuration.
///
/// Installing twice is a no-op: the first subscriber wins. If the log file
/// cannot be opened the JSONL layer is skipped and stderr is used instead.
pub fn init_with_config(config: LogConfig) {
    file_writer::init_subscriber(&config);
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
