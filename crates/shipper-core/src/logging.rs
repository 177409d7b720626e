//! Logging initialization for the log shipper.
//!
//! Thin wrapper over the observability crate. The shipper's own diagnostics
//! (queue evictions, transport failures, activity lines) go through `tracing`
//! and end up as JSONL in `~/.log-shipper/logs/shipper.jsonl`.

use observability::LogConfig;
use std::path::PathBuf;

/// Service name stamped on every diagnostic line.
const SERVICE_NAME: &str = "log-shipper";

/// Initialize the logging system.
///
/// - Level comes from `RUST_LOG` or the provided default
/// - `SHIPPER_LOG_PATH` overrides the JSONL file location
/// - `SHIPPER_LOG_STDERR=1` mirrors output to stderr
///
/// ```ignore
/// init_logging("info");
/// tracing::info!("shipper started");
/// ```
pub fn init_logging(level: &str) {
    let log_path = std::env::var("SHIPPER_LOG_PATH")
        .ok()
        .and_then(non_empty_env)
        .map(PathBuf::from);

    let also_stderr = std::env::var("SHIPPER_LOG_STDERR")
        .ok()
        .and_then(non_empty_env)
        .map(|raw| matches!(raw.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);

    observability::init_with_config(LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: parse_level(level).to_string().to_lowercase(),
        log_path,
        also_stderr,
    });
}

fn non_empty_env(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
