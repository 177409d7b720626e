//! End-to-end shipping scenarios against scripted transports.

use async_trait::async_trait;
use log_shipper::{ControllerOptions, FlushReport, ShipError, ShippingController};
use parking_lot::Mutex;
use serde_json::json;
use shipper_core::{Batch, LogRecord, Tag};
use shipper_queue::{PersistentQueue, QueueLimits};
use shipper_transport::{Transport, TransportError, TransportReport};
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Plays back one scripted response per call, then acknowledges
/// everything.
#[derive(Default)]
struct ScriptedTransport {
    script: Mutex<VecDeque<(Vec<&'static str>, Option<TransportError>)>>,
    sent: Mutex<Vec<Batch>>,
}

impl ScriptedTransport {
    /// Next call acknowledges only records whose message is in `messages`.
    fn then(self: &Arc<Self>, messages: &[&'static str], error: Option<TransportError>) {
        self.script.lock().push_back((messages.to_vec(), error));
    }

    fn calls(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, batch: &Batch) -> TransportReport {
        self.sent.lock().push(batch.clone());
        match self.script.lock().pop_front() {
            None => TransportReport::all(batch),
            Some((messages, error)) => TransportReport {
                acknowledged: batch
                    .iter()
                    .filter(|(_, q)| {
                        q.record
                            .message()
                            .is_some_and(|m| messages.contains(&m))
                    })
                    .map(|(tag, _)| tag)
                    .collect::<HashSet<Tag>>(),
                error,
            },
        }
    }

    fn cancel(&self) {}
}

/// Blocks every send until cancelled or released.
#[derive(Default)]
struct BlockingTransport {
    token: Mutex<CancellationToken>,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl Transport for BlockingTransport {
    async fn send(&self, batch: &Batch) -> TransportReport {
        let token = self.token.lock().clone();
        self.entered.notify_one();
        tokio::select! {
            _ = token.cancelled() => TransportReport::failed(TransportError::Cancelled),
            _ = self.release.notified() => TransportReport::all(batch),
        }
    }

    fn cancel(&self) {
        let mut token = self.token.lock();
        token.cancel();
        *token = CancellationToken::new();
    }
}

fn record(message: &str) -> LogRecord {
    LogRecord::from_pairs([("message", json!(message))])
}

fn messages(batch: &Batch) -> Vec<String> {
    batch
        .iter()
        .filter_map(|(_, q)| q.record.message().map(str::to_string))
        .collect()
}

async fn open(path: &Path, transport: Arc<dyn Transport>) -> ShippingController {
    let queue = PersistentQueue::open(path, QueueLimits::default())
        .await
        .unwrap();
    ShippingController::start(queue, transport, ControllerOptions::default())
        .await
        .unwrap()
}

async fn in_memory(transport: Arc<dyn Transport>) -> ShippingController {
    let queue = PersistentQueue::in_memory(QueueLimits::default())
        .await
        .unwrap();
    ShippingController::start(queue, transport, ControllerOptions::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_accepted_records_survive_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("queue.sqlite");
    let transport = Arc::new(ScriptedTransport::default());

    {
        let controller = open(&path, transport.clone()).await;
        for m in ["a", "b", "c"] {
            controller.accept(record(m));
        }
        // runs after the appends, so they are on disk
        assert_eq!(controller.pending_count().await.unwrap(), 3);
        controller.shutdown().await;
    }

    let controller = open(&path, transport.clone()).await;
    assert_eq!(
        messages(&controller.pending_records().await.unwrap()),
        vec!["a", "b", "c"]
    );

    controller.accept(record("d"));
    let report = controller.flush().await.unwrap();
    assert_eq!(report, FlushReport { sent: 4, requeued: 0 });

    // tags keep increasing across the restart
    let sent = transport.sent.lock()[0].clone();
    assert_eq!(sent.tags(), vec![Tag(1), Tag(2), Tag(3), Tag(4)]);
}

#[tokio::test]
async fn test_records_in_flight_at_crash_are_sent_again() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("queue.sqlite");

    {
        // drained for a send whose result never came back
        let queue = PersistentQueue::open(&path, QueueLimits::default())
            .await
            .unwrap();
        queue.append(Tag(1), record("lost-ack")).await.unwrap();
        queue.append(Tag(2), record("also-lost")).await.unwrap();
        assert_eq!(queue.drain_all().await.unwrap().len(), 2);
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    let transport = Arc::new(ScriptedTransport::default());
    let controller = open(&path, transport.clone()).await;
    assert_eq!(controller.pending_count().await.unwrap(), 2);

    controller.accept(record("after-restart"));
    assert_eq!(controller.flush().await.unwrap().sent, 3);
    let sent = transport.sent.lock()[0].clone();
    assert_eq!(messages(&sent), vec!["lost-ack", "also-lost", "after-restart"]);
    assert_eq!(sent.tags(), vec![Tag(1), Tag(2), Tag(3)]);
}

#[tokio::test]
async fn test_partial_failure_requeues_the_rest() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.then(&["R1", "R3"], Some(TransportError::Timeout));
    let controller = in_memory(transport.clone()).await;

    for m in ["R1", "R2", "R3"] {
        controller.accept(record(m));
    }

    let err = controller.flush().await.unwrap_err();
    assert!(matches!(err, ShipError::Transport(TransportError::Timeout)));
    assert_eq!(
        messages(&controller.pending_records().await.unwrap()),
        vec!["R2"]
    );

    let report = controller.flush().await.unwrap();
    assert_eq!(report, FlushReport { sent: 1, requeued: 0 });
    assert_eq!(controller.pending_count().await.unwrap(), 0);
    assert_eq!(messages(&transport.sent.lock()[1]), vec!["R2"]);
}

#[tokio::test]
async fn test_silent_partial_ack_is_reported_as_requeued() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.then(&["a"], None);
    let controller = in_memory(transport.clone()).await;

    controller.accept(record("a"));
    controller.accept(record("b"));

    let report = controller.flush().await.unwrap();
    assert_eq!(report, FlushReport { sent: 1, requeued: 1 });
    assert_eq!(
        messages(&controller.pending_records().await.unwrap()),
        vec!["b"]
    );
}

#[tokio::test]
async fn test_total_failure_keeps_every_record() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.then(
        &[],
        Some(TransportError::Connection("refused".to_string())),
    );
    let controller = in_memory(transport.clone()).await;

    for m in ["x", "y"] {
        controller.accept(record(m));
    }

    assert!(matches!(
        controller.flush().await,
        Err(ShipError::Transport(TransportError::Connection(_)))
    ));
    assert_eq!(
        messages(&controller.pending_records().await.unwrap()),
        vec!["x", "y"]
    );
}

#[tokio::test]
async fn test_empty_flush_does_not_touch_transport() {
    let transport = Arc::new(ScriptedTransport::default());
    let controller = in_memory(transport.clone()).await;

    assert_eq!(controller.flush().await.unwrap(), FlushReport::default());
    assert_eq!(controller.flush().await.unwrap(), FlushReport::default());
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_back_to_back_flushes_drain_each_record_once() {
    let blocking = Arc::new(BlockingTransport::default());
    let controller = in_memory(blocking.clone()).await;

    controller.accept(record("first"));
    let first = controller.flush();
    blocking.entered.notified().await;

    // the first batch is in flight; this flush only sees what came after
    controller.accept(record("second"));
    let second = controller.flush();
    blocking.entered.notified().await;

    assert_eq!(controller.pending_count().await.unwrap(), 0);

    blocking.release.notify_one();
    blocking.release.notify_one();
    let (first, second) = tokio::join!(first, second);
    assert_eq!(first.unwrap().sent, 1);
    assert_eq!(second.unwrap().sent, 1);
    assert_eq!(controller.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancel_discards_queue_and_in_flight_result() {
    let blocking = Arc::new(BlockingTransport::default());
    let controller = in_memory(blocking.clone()).await;

    controller.accept(record("in-flight"));
    let flush = controller.flush();
    blocking.entered.notified().await;
    controller.accept(record("pending"));

    controller.cancel();

    assert!(matches!(flush.await, Err(ShipError::Cancelled)));
    assert_eq!(controller.pending_count().await.unwrap(), 0);

    // the controller keeps working after a cancel
    controller.accept(record("fresh"));
    assert_eq!(
        messages(&controller.pending_records().await.unwrap()),
        vec!["fresh"]
    );
}

#[tokio::test]
async fn test_flush_queued_before_cancel_resolves_cancelled() {
    let blocking = Arc::new(BlockingTransport::default());
    let controller = in_memory(blocking.clone()).await;

    controller.accept(record("a"));
    let in_flight = controller.flush();
    blocking.entered.notified().await;

    // submitted before cancel, processed after it
    controller.accept(record("b"));
    let queued = controller.flush();
    controller.cancel();

    assert!(matches!(in_flight.await, Err(ShipError::Cancelled)));
    match queued.await {
        Err(ShipError::Cancelled) => {}
        other => panic!("expected Cancelled, got {other:?}"),
    }
}

#[tokio::test]
async fn test_flush_right_after_cancel_is_not_aborted() {
    let blocking = Arc::new(BlockingTransport::default());
    let controller = in_memory(blocking.clone()).await;

    controller.accept(record("old"));
    let old = controller.flush();
    blocking.entered.notified().await;

    controller.cancel();
    controller.accept(record("fresh"));
    let fresh = controller.flush();
    assert!(matches!(old.await, Err(ShipError::Cancelled)));

    blocking.entered.notified().await;
    blocking.release.notify_one();
    let report = fresh.await.unwrap();
    assert_eq!(report, FlushReport { sent: 1, requeued: 0 });
    assert_eq!(controller.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_max_records_drops_oldest_before_sending() {
    let transport = Arc::new(ScriptedTransport::default());
    let queue = PersistentQueue::in_memory(QueueLimits {
        max_records: 2,
        max_age: None,
    })
    .await
    .unwrap();
    let controller =
        ShippingController::start(queue, transport.clone(), ControllerOptions::default())
            .await
            .unwrap();

    for m in ["old", "mid", "new"] {
        controller.accept(record(m));
    }
    controller.flush().await.unwrap();

    assert_eq!(messages(&transport.sent.lock()[0]), vec!["mid", "new"]);
}

#[tokio::test]
async fn test_concurrent_accepts_are_all_shipped() {
    let transport = Arc::new(ScriptedTransport::default());
    let controller = in_memory(transport.clone()).await;

    let mut tasks = Vec::new();
    for worker in 0..4 {
        let controller = controller.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..25 {
                controller.accept(record(&format!("w{worker}-{i}")));
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let report = tokio::time::timeout(Duration::from_secs(5), controller.flush())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.sent, 100);
    let tags = transport.sent.lock()[0].tags();
    let unique: HashSet<_> = tags.iter().collect();
    assert_eq!(unique.len(), 100);
}
