//! One delivery attempt for one batch.

use shipper_core::{Batch, Tag};
use shipper_transport::{Transport, TransportError};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// What happened to a batch handed to [`BatchSender::write`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOutcome {
    /// Tags the transport acknowledged that belong to the batch.
    pub sent: HashSet<Tag>,
    /// Records still to be delivered. The caller re-queues them.
    pub unsent: Batch,
    pub error: Option<TransportError>,
}

/// Hands batches to a transport and works out the remainder.
#[derive(Clone)]
pub struct BatchSender {
    transport: Arc<dyn Transport>,
}

impl BatchSender {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Send `batch` once. Never re-inserts anything itself.
    pub async fn write(&self, batch: Batch) -> WriteOutcome {
        if batch.is_empty() {
            return WriteOutcome::default();
        }

        let report = self.transport.send(&batch).await;

        // acks for tags outside the batch are ignored
        let sent: HashSet<Tag> = report
            .acknowledged
            .into_iter()
            .filter(|tag| batch.contains(*tag))
            .collect();
        let unsent = batch.without(&sent);

        debug!(
            total = batch.len(),
            sent = sent.len(),
            unsent = unsent.len(),
            error = report.error.is_some(),
            "Batch write finished"
        );

        WriteOutcome {
            sent,
            unsent,
            error: report.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use shipper_core::{LogRecord, QueuedRecord};
    use shipper_transport::TransportReport;

    struct ScriptedTransport {
        report: TransportReport,
        calls: Mutex<usize>,
    }

    impl ScriptedTransport {
        fn new(acknowledged: &[u64], error: Option<TransportError>) -> Arc<Self> {
            Arc::new(Self {
                report: TransportReport {
                    acknowledged: acknowledged.iter().map(|t| Tag(*t)).collect(),
                    error,
                },
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, _batch: &Batch) -> TransportReport {
            *self.calls.lock() += 1;
            self.report.clone()
        }

        fn cancel(&self) {}
    }

    fn batch(tags: &[u64]) -> Batch {
        tags.iter()
            .map(|t| {
                (
                    Tag(*t),
                    QueuedRecord {
                        record: LogRecord::from_pairs([("message", json!(format!("r{t}")))]),
                        enqueued_at: 0,
                    },
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_empty_batch_skips_transport() {
        let transport = ScriptedTransport::new(&[], None);
        let sender = BatchSender::new(transport.clone());

        let outcome = sender.write(Batch::new()).await;
        assert_eq!(outcome, WriteOutcome::default());
        assert_eq!(*transport.calls.lock(), 0);
    }

    #[tokio::test]
    async fn test_partial_ack_leaves_remainder() {
        let transport = ScriptedTransport::new(&[1, 3], Some(TransportError::Timeout));
        let sender = BatchSender::new(transport);

        let outcome = sender.write(batch(&[1, 2, 3])).await;
        assert_eq!(outcome.sent, [Tag(1), Tag(3)].into_iter().collect());
        assert_eq!(outcome.unsent.tags(), vec![Tag(2)]);
        assert_eq!(outcome.error, Some(TransportError::Timeout));
    }

    #[tokio::test]
    async fn test_no_ack_and_no_error_means_nothing_sent() {
        let sender = BatchSender::new(ScriptedTransport::new(&[], None));

        let outcome = sender.write(batch(&[1, 2])).await;
        assert!(outcome.sent.is_empty());
        assert_eq!(outcome.unsent.len(), 2);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_foreign_acks_are_ignored() {
        let sender = BatchSender::new(ScriptedTransport::new(&[2, 42], None));

        let outcome = sender.write(batch(&[1, 2])).await;
        assert_eq!(outcome.sent, [Tag(2)].into_iter().collect());
        assert_eq!(outcome.unsent.tags(), vec![Tag(1)]);
    }
}
