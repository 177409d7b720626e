//! File system paths for the log shipper.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Directory under the home directory that holds all shipper state.
const BASE_DIR_NAME: &str = ".log-shipper";
/// Filename of the persistent queue database.
const QUEUE_DATABASE_NAME: &str = "queue.sqlite";

/// Manages file system paths for the log shipper.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for all shipper files (~/.log-shipper)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.log-shipper`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.log-shipper).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.log-shipper/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the persistent queue database path (~/.log-shipper/queue.sqlite).
    pub fn queue_database_file(&self) -> PathBuf {
        self.base_dir.join(QUEUE_DATABASE_NAME)
    }

    /// Get the internal logs directory (~/.log-shipper/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the shipper's own diagnostic log (~/.log-shipper/logs/shipper.jsonl).
    pub fn diagnostic_log_file(&self) -> PathBuf {
        self.logs_dir().join("shipper.jsonl")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
