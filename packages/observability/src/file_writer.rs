//! JSONL file output.
//!
//! Appends one JSON object per line to a central file that can be tailed by
//! external tools (`tail -f ... | jq`).

use crate::json_layer::JsonLayer;
use crate::LogConfig;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Default diagnostic log location: `~/.log-shipper/logs/shipper.jsonl`.
/// Falls back to the working directory when there is no home directory.
fn default_log_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".log-shipper")
        .join("logs")
        .join("shipper.jsonl")
}

/// Line-flushed file writer shared by every event.
#[derive(Clone)]
pub struct CentralLogWriter {
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl CentralLogWriter {
    pub fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Append mode keeps concurrent writers from clobbering each other
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::with_capacity(8192, file))),
        })
    }
}

impl io::Write for CentralLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        let result = guard.write(buf);
        // Flush per line so tailing readers see complete records
        guard.flush()?;
        result
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

/// MakeWriter implementation for tracing-subscriber
#[derive(Clone)]
pub struct WriterFactory {
    writer: CentralLogWriter,
}

impl WriterFactory {
    pub fn new(writer: CentralLogWriter) -> Self {
        Self { writer }
    }
}

impl<'a> MakeWriter<'a> for WriterFactory {
    type Writer = CentralLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.writer.clone()
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the JSONL + optional stderr subscriber.
pub fn init_subscriber(config: &LogConfig) {
    let log_path = config.log_path.clone().unwrap_or_else(default_log_path);

    let (json_layer, open_error) = match CentralLogWriter::new(&log_path) {
        Ok(writer) => (
            Some(JsonLayer::new(
                config.service_name.clone(),
                WriterFactory::new(writer),
            )),
            None,
        ),
        Err(e) => (None, Some(e)),
    };

    // Without a file there is nowhere else to look, so force stderr on
    let stderr_layer = if config.also_stderr || json_layer.is_none() {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_writer(io::stderr)
                .with_ansi(true),
        )
    } else {
        None
    };

    let installed = tracing_subscriber::registry()
        .with(json_layer.map(|l| l.with_filter(env_filter(&config.default_level))))
        .with(stderr_layer.map(|l| l.with_filter(env_filter(&config.default_level))))
        .try_init()
        .is_ok();

    if !installed {
        return;
    }

    match open_error {
        None => tracing::info!(
            log_path = %log_path.display(),
            service = %config.service_name,
            "observability initialized"
        ),
        Some(e) => tracing::warn!(
            log_path = %log_path.display(),
            error = %e,
            "could not open log file, logging to stderr only"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use tempfile::tempdir;

    #[test]
    fn test_central_log_writer_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("test.jsonl");

        let mut writer = CentralLogWriter::new(&path).unwrap();
        writer.write_all(b"test line\n").unwrap();

        let mut content = String::new();
        File::open(&path)
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "test line\n");
    }

    #[test]
    fn test_writer_appends_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("append.jsonl");

        CentralLogWriter::new(&path)
            .unwrap()
            .write_all(b"first\n")
            .unwrap();
        CentralLogWriter::new(&path)
            .unwrap()
            .write_all(b"second\n")
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn test_writer_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deeply").join("nested").join("test.jsonl");

        let writer = CentralLogWriter::new(&path);
        assert!(writer.is_ok());
        assert!(path.parent().unwrap().exists());
    }
}
