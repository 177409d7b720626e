//! Line-delimited JSON over TCP, optionally wrapped in TLS.

use crate::{tls, Transport, TransportError, TransportReport, TransportResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use rustls::ClientConfig;
use shipper_core::{Batch, Config, Tag};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type Stream = Box<dyn AsyncWrite + Send + Unpin>;

/// Connection settings for [`SocketTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketConfig {
    pub host: String,
    pub port: u16,
    /// Applies to connect, handshake and every write.
    pub timeout: Duration,
    pub use_tls: bool,
    pub allow_untrusted_server: bool,
}

impl SocketConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            timeout: config.timeout(),
            use_tls: config.use_tls,
            allow_untrusted_server: config.allow_untrusted_server,
        }
    }
}

/// Opens one connection per batch and writes each record as a JSON line.
///
/// A record counts as delivered once its line has been written and
/// flushed. The first failure ends the batch; everything after it is
/// reported as unacknowledged.
pub struct SocketTransport {
    config: SocketConfig,
    tls: Option<Arc<ClientConfig>>,
    cancel: Mutex<CancellationToken>,
}

impl SocketTransport {
    pub fn new(config: SocketConfig) -> TransportResult<Self> {
        let tls = if config.use_tls {
            Some(tls::client_config(config.allow_untrusted_server)?)
        } else {
            None
        };

        Ok(Self {
            config,
            tls,
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    async fn connect(&self) -> TransportResult<Stream> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let tcp = self
            .with_timeout(TcpStream::connect(&addr))
            .await?
            .map_err(|e| TransportError::Connection(format!("{addr}: {e}")))?;
        if let Err(e) = tcp.set_nodelay(true) {
            debug!(error = %e, "Could not set TCP_NODELAY");
        }

        match &self.tls {
            None => Ok(Box::new(tcp)),
            Some(tls) => {
                let server_name = tls::server_name(&self.config.host)?;
                let stream = self
                    .with_timeout(TlsConnector::from(tls.clone()).connect(server_name, tcp))
                    .await?
                    .map_err(|e| TransportError::Tls(e.to_string()))?;
                Ok(Box::new(stream))
            }
        }
    }

    async fn write_batch(
        &self,
        batch: &Batch,
        acknowledged: &mut HashSet<Tag>,
    ) -> TransportResult<()> {
        let mut stream = self.connect().await?;

        for (tag, queued) in batch.iter() {
            let mut line = queued.record.to_json_line()?;
            line.push('\n');

            self.with_timeout(stream.write_all(line.as_bytes()))
                .await?
                .map_err(io_error)?;
            self.with_timeout(stream.flush()).await?.map_err(io_error)?;
            acknowledged.insert(tag);
        }

        if let Err(e) = self.with_timeout(stream.shutdown()).await {
            debug!(error = %e, "Socket shutdown did not complete");
        }
        Ok(())
    }

    async fn with_timeout<F: Future>(&self, fut: F) -> TransportResult<F::Output> {
        tokio::time::timeout(self.config.timeout, fut)
            .await
            .map_err(|_| TransportError::Timeout)
    }
}

fn io_error(e: std::io::Error) -> TransportError {
    TransportError::Connection(e.to_string())
}

#[async_trait]
impl Transport for SocketTransport {
    async fn send(&self, batch: &Batch) -> TransportReport {
        if batch.is_empty() {
            return TransportReport::default();
        }
        let token = self.cancel.lock().clone();
        let mut acknowledged = HashSet::new();

        let result = tokio::select! {
            _ = token.cancelled() => Err(TransportError::Cancelled),
            result = self.write_batch(batch, &mut acknowledged) => result,
        };

        match result {
            Ok(()) => TransportReport {
                acknowledged,
                error: None,
            },
            Err(error) => {
                warn!(
                    host = %self.config.host,
                    port = self.config.port,
                    delivered = acknowledged.len(),
                    total = batch.len(),
                    error = %error,
                    "Socket send failed"
                );
                TransportReport::partial(acknowledged, error)
            }
        }
    }

    fn cancel(&self) {
        let mut token = self.cancel.lock();
        token.cancel();
        *token = CancellationToken::new();
    }
}
