//! The transport contract.

use crate::{HttpTransport, SocketConfig, SocketTransport, TransportError, TransportResult};
use async_trait::async_trait;
use shipper_core::{Batch, Config, Tag};
use std::collections::HashSet;
use std::sync::Arc;

/// Outcome of one [`Transport::send`].
///
/// `acknowledged` may be any subset of the batch's tags. A set `error` does
/// not mean nothing was delivered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportReport {
    pub acknowledged: HashSet<Tag>,
    pub error: Option<TransportError>,
}

impl TransportReport {
    /// Every record in `batch` was delivered.
    pub fn all(batch: &Batch) -> Self {
        Self {
            acknowledged: batch.tags().into_iter().collect(),
            error: None,
        }
    }

    /// Nothing was delivered.
    pub fn failed(error: TransportError) -> Self {
        Self {
            acknowledged: HashSet::new(),
            error: Some(error),
        }
    }

    /// Some records were delivered before `error` stopped the batch.
    pub fn partial(acknowledged: HashSet<Tag>, error: TransportError) -> Self {
        Self {
            acknowledged,
            error: Some(error),
        }
    }
}

/// Sends a batch of records to a remote collector.
///
/// Implementations own their timeouts and must never panic on network
/// failure: every problem is reported through [`TransportReport::error`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `batch` and report which tags made it.
    async fn send(&self, batch: &Batch) -> TransportReport;

    /// Abort the send in progress, if any. Best effort: records already
    /// written stay acknowledged.
    fn cancel(&self);
}

/// Build the transport selected by `config`.
pub fn transport_from_config(config: &Config) -> TransportResult<Arc<dyn Transport>> {
    if config.over_http {
        Ok(Arc::new(HttpTransport::from_config(config)?))
    } else {
        Ok(Arc::new(SocketTransport::new(SocketConfig::from_config(
            config,
        ))?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shipper_core::{LogRecord, QueuedRecord};

    fn batch(tags: &[u64]) -> Batch {
        tags.iter()
            .map(|t| {
                (
                    Tag(*t),
                    QueuedRecord {
                        record: LogRecord::from_pairs([("message", json!("m"))]),
                        enqueued_at: 0,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_report_all_acknowledges_every_tag() {
        let report = TransportReport::all(&batch(&[1, 2, 3]));
        assert!(report.error.is_none());
        assert_eq!(report.acknowledged.len(), 3);
        assert!(report.acknowledged.contains(&Tag(2)));
    }

    #[test]
    fn test_report_failed() {
        let report = TransportReport::failed(TransportError::Timeout);
        assert_eq!(report.error, Some(TransportError::Timeout));
        assert!(report.acknowledged.is_empty());
    }

    #[test]
    fn test_transport_from_config_rejects_bad_http_url() {
        let config = Config {
            over_http: true,
            http_url: Some("::nope".to_string()),
            ..Config::default()
        };
        assert!(matches!(
            transport_from_config(&config),
            Err(TransportError::Config(_))
        ));
    }

    #[test]
    fn test_transport_from_config_builds_socket_transport() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            use_tls: false,
            ..Config::default()
        };
        assert!(transport_from_config(&config).is_ok());
    }
}
