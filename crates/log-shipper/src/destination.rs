//! Where accepted records go: console, local file, collector.

use crate::{ShipResult, ShippingController};
use parking_lot::Mutex;
use serde_json::Value;
use shipper_core::{Config, LogRecord, Paths};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A sink for log records.
pub trait Destination: Send + Sync {
    fn name(&self) -> &'static str;

    fn write(&self, record: &LogRecord) -> ShipResult<()>;
}

/// Prints the `message` field to stdout.
#[derive(Debug, Default)]
pub struct ConsoleDestination;

impl Destination for ConsoleDestination {
    fn name(&self) -> &'static str {
        "console"
    }

    fn write(&self, record: &LogRecord) -> ShipResult<()> {
        if let Some(message) = record.message() {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{message}").map_err(shipper_core::CoreError::from)?;
        }
        Ok(())
    }
}

/// Appends the `message` field to a plain-text file.
pub struct FileDestination {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileDestination {
    pub fn open(path: &Path) -> ShipResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(shipper_core::CoreError::from)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(shipper_core::CoreError::from)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Destination for FileDestination {
    fn name(&self) -> &'static str {
        "file"
    }

    fn write(&self, record: &LogRecord) -> ShipResult<()> {
        if let Some(message) = record.message() {
            let mut file = self.file.lock();
            writeln!(file, "{message}").map_err(shipper_core::CoreError::from)?;
        }
        Ok(())
    }
}

/// Forwards records to a [`ShippingController`].
#[derive(Clone)]
pub struct NetworkDestination {
    controller: ShippingController,
}

impl NetworkDestination {
    pub fn new(controller: ShippingController) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &ShippingController {
        &self.controller
    }
}

impl Destination for NetworkDestination {
    fn name(&self) -> &'static str {
        "network"
    }

    fn write(&self, record: &LogRecord) -> ShipResult<()> {
        self.controller.accept(record.clone());
        Ok(())
    }
}

/// Fans each record out to every enabled destination.
#[derive(Default)]
pub struct DestinationRouter {
    destinations: Vec<Box<dyn Destination>>,
    network: Option<ShippingController>,
}

impl DestinationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the destinations switched on in `config`.
    pub async fn from_config(config: &Config, paths: &Paths) -> ShipResult<Self> {
        let mut router = Self::new();

        if config.console_enabled {
            router.add(Box::new(ConsoleDestination));
        }
        if config.file_enabled {
            router.add(Box::new(FileDestination::open(&config.log_file_path(paths))?));
        }
        if config.network_enabled {
            let controller = ShippingController::from_config(config, paths).await?;
            router.add_network(controller);
        }

        debug!(destinations = ?router.names(), "Destinations configured");
        Ok(router)
    }

    pub fn add(&mut self, destination: Box<dyn Destination>) {
        self.destinations.push(destination);
    }

    /// Add a network destination; its controller stays reachable through
    /// [`DestinationRouter::network`].
    pub fn add_network(&mut self, controller: ShippingController) {
        self.network = Some(controller.clone());
        self.add(Box::new(NetworkDestination::new(controller)));
    }

    pub fn network(&self) -> Option<&ShippingController> {
        self.network.as_ref()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.destinations.iter().map(|d| d.name()).collect()
    }

    /// Write `record` everywhere. One failing destination does not stop
    /// the others.
    pub fn route(&self, record: &LogRecord) {
        for destination in &self.destinations {
            if let Err(e) = destination.write(record) {
                warn!(destination = destination.name(), error = %e, "Destination write failed");
            }
        }
    }

    /// Route a raw log line. JSON objects are flattened; anything else is
    /// shipped as `{"message": line}`.
    pub fn route_message(&self, line: &str) {
        let record = LogRecord::from_json_str(line).unwrap_or_else(|_| {
            LogRecord::from_pairs([("message", Value::String(line.to_string()))])
        });
        self.route(&record);
    }
}
