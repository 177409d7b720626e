//! Configuration management for the log shipper.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default collector port.
pub const DEFAULT_PORT: u16 = 9300;

/// Record key the collector token is merged under.
pub const TOKEN_KEY: &str = "token";

const DEFAULT_SENDING_INTERVAL_SECS: u64 = 5;
const DEFAULT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_QUEUE_MAX_RECORDS: usize = 10_000;
const DEFAULT_QUEUE_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;

/// Main log shipper configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level for the shipper's own diagnostics (trace, debug, info, warn, error).
    pub log_level: String,
    /// Seconds between periodic flushes.
    pub sending_interval_secs: u64,

    /// Folder (under the base dir) used by the file destination.
    pub log_folder_name: String,
    /// File name used by the file destination. Always ends in `.log`.
    pub log_filename: String,

    /// Collector host.
    pub host: String,
    /// Collector port.
    pub port: u16,
    /// Per-operation network timeout in seconds.
    pub timeout_secs: u64,
    /// Wrap the socket transport in TLS.
    pub use_tls: bool,
    /// Accept collector certificates that fail verification.
    pub allow_untrusted_server: bool,
    /// Ship over HTTP instead of a persistent socket.
    pub over_http: bool,
    /// Explicit HTTP endpoint. Defaults to `https://host:port`.
    pub http_url: Option<String>,
    /// Token merged into every shipped record.
    pub token: Option<String>,
    /// Emit activity trace lines for append/drain/send events.
    pub log_activity: bool,

    /// Console destination switch.
    pub console_enabled: bool,
    /// File destination switch.
    pub file_enabled: bool,
    /// Network destination switch.
    pub network_enabled: bool,

    /// Maximum number of pending records kept on disk. Oldest are dropped first.
    pub queue_max_records: usize,
    /// Pending records older than this are evicted. `None` keeps them forever.
    pub queue_max_age_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            sending_interval_secs: DEFAULT_SENDING_INTERVAL_SECS,
            log_folder_name: "log-folder".to_string(),
            log_filename: "app.log".to_string(),
            host: String::new(),
            port: DEFAULT_PORT,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            use_tls: true,
            allow_untrusted_server: false,
            over_http: false,
            http_url: None,
            token: None,
            log_activity: true,
            console_enabled: false,
            file_enabled: true,
            network_enabled: true,
            queue_max_records: DEFAULT_QUEUE_MAX_RECORDS,
            queue_max_age_secs: Some(DEFAULT_QUEUE_MAX_AGE_SECS),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the base directory, falling back to defaults.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.normalize();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&content)?;
        config.normalize();
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("SHIPPER_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(host) = std::env::var("SHIPPER_HOST") {
            self.host = host;
        }
        if let Some(port) = std::env::var("SHIPPER_PORT")
            .ok()
            .and_then(|raw| raw.trim().parse::<u16>().ok())
        {
            self.port = port;
        }
        if let Ok(token) = std::env::var("SHIPPER_TOKEN") {
            let token = token.trim();
            self.token = (!token.is_empty()).then(|| token.to_string());
        }
    }

    fn normalize(&mut self) {
        if !self.log_filename.to_lowercase().ends_with(".log") {
            self.log_filename.push_str(".log");
        }
    }

    /// Check that the enabled destinations have what they need.
    pub fn validate(&self) -> CoreResult<()> {
        if self.queue_max_records == 0 {
            return Err(CoreError::Config(
                "queue_max_records must be greater than zero".to_string(),
            ));
        }
        if self.sending_interval_secs == 0 {
            return Err(CoreError::Config(
                "sending_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.network_enabled {
            if self.over_http {
                self.http_url()?;
            } else if self.host.trim().is_empty() {
                return Err(CoreError::Config(
                    "host is required when network shipping is enabled".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// The HTTP endpoint records are posted to.
    pub fn http_url(&self) -> CoreResult<Url> {
        match &self.http_url {
            Some(url) => Url::parse(url).map_err(CoreError::from),
            None if self.host.trim().is_empty() => Err(CoreError::Config(
                "host or http_url is required for HTTP shipping".to_string(),
            )),
            None => Url::parse(&format!("https://{}:{}", self.host, self.port))
                .map_err(CoreError::from),
        }
    }

    /// Full path of the file destination's log file.
    pub fn log_file_path(&self, paths: &Paths) -> PathBuf {
        paths
            .base_dir()
            .join(&self.log_folder_name)
            .join(&self.log_filename)
    }

    pub fn sending_interval(&self) -> Duration {
        Duration::from_secs(self.sending_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn queue_max_age(&self) -> Option<Duration> {
        self.queue_max_age_secs.map(Duration::from_secs)
    }
}
