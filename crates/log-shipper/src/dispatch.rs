//! Single-worker dispatch of every queue mutation.
//!
//! The worker task owns the [`PersistentQueue`] and the tag counter. Callers
//! submit [`Task`]s over an unbounded channel and never wait for them to
//! run; tasks execute one at a time in submission order.
//!
//! Cancellation bumps a shared epoch and submits `Clear` while holding the
//! epoch lock, so every task is stamped with the epoch that was current when
//! it entered the channel. The worker drops tasks from older epochs.

use crate::controller::FlushReport;
use crate::{BatchSender, ShipError, ShipResult, WriteOutcome};
use parking_lot::Mutex;
use shipper_core::{Batch, LogRecord, Tag};
use shipper_queue::PersistentQueue;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub(crate) type FlushDone = oneshot::Sender<ShipResult<FlushReport>>;

pub(crate) enum Task {
    Append {
        record: LogRecord,
    },
    Flush {
        done: FlushDone,
    },
    /// Result of a send, returned to the worker before it touches the queue.
    Reconcile {
        batch_id: Uuid,
        outcome: WriteOutcome,
        done: FlushDone,
    },
    Clear,
    PendingCount {
        reply: oneshot::Sender<ShipResult<usize>>,
    },
    Snapshot {
        reply: oneshot::Sender<ShipResult<Batch>>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

impl Task {
    fn kind(&self) -> &'static str {
        match self {
            Task::Append { .. } => "append",
            Task::Flush { .. } => "flush",
            Task::Reconcile { .. } => "reconcile",
            Task::Clear => "clear",
            Task::PendingCount { .. } => "pending_count",
            Task::Snapshot { .. } => "snapshot",
            Task::Shutdown { .. } => "shutdown",
        }
    }

    /// Resolve a dropped task's waiter, if it has one.
    fn discard(self) {
        match self {
            Task::Flush { done } | Task::Reconcile { done, .. } => {
                let _ = done.send(Err(ShipError::Cancelled));
            }
            Task::PendingCount { reply } => {
                let _ = reply.send(Err(ShipError::Cancelled));
            }
            Task::Snapshot { reply } => {
                let _ = reply.send(Err(ShipError::Cancelled));
            }
            Task::Shutdown { done } => {
                let _ = done.send(());
            }
            Task::Append { .. } | Task::Clear => {}
        }
    }
}

struct Envelope {
    epoch: u64,
    task: Task,
}

/// Submission side of the dispatch worker.
#[derive(Clone)]
pub(crate) struct DispatchHandle {
    tx: mpsc::UnboundedSender<Envelope>,
    epoch: Arc<Mutex<u64>>,
}

impl DispatchHandle {
    /// Queue a task behind everything already submitted.
    ///
    /// Hands the task back when the worker has stopped.
    pub(crate) fn submit(&self, task: Task) -> Result<(), Task> {
        let epoch = self.epoch.lock();
        self.tx
            .send(Envelope {
                epoch: *epoch,
                task,
            })
            .map_err(|e| e.0.task)
    }

    /// Invalidate every task submitted so far and clear the queue.
    ///
    /// `abort` runs first, with submissions held off, so no task stamped
    /// with the new epoch can start a send that `abort` then kills.
    /// Returns the new epoch.
    pub(crate) fn cancel(&self, abort: impl FnOnce()) -> u64 {
        let mut epoch = self.epoch.lock();
        abort();
        *epoch += 1;
        if self
            .tx
            .send(Envelope {
                epoch: *epoch,
                task: Task::Clear,
            })
            .is_err()
        {
            warn!("Dispatch worker stopped, nothing to cancel");
        }
        *epoch
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Start the worker. The tag counter resumes after the highest stored tag.
pub(crate) async fn spawn(
    queue: PersistentQueue,
    sender: BatchSender,
    log_activity: bool,
) -> ShipResult<(DispatchHandle, JoinHandle<()>)> {
    let next_tag = queue.max_tag().await?.map(Tag::next).unwrap_or(Tag(1));
    let (tx, rx) = mpsc::unbounded_channel();
    let epoch = Arc::new(Mutex::new(0));

    let worker = Worker {
        queue,
        sender,
        rx,
        tx: tx.downgrade(),
        epoch: epoch.clone(),
        next_tag,
        log_activity,
    };
    debug!(next_tag = %next_tag, "Starting dispatch worker");
    let handle = tokio::spawn(worker.run());

    Ok((DispatchHandle { tx, epoch }, handle))
}

struct Worker {
    queue: PersistentQueue,
    sender: BatchSender,
    rx: mpsc::UnboundedReceiver<Envelope>,
    /// Weak so the channel closes once every handle is gone.
    tx: mpsc::WeakUnboundedSender<Envelope>,
    epoch: Arc<Mutex<u64>>,
    next_tag: Tag,
    log_activity: bool,
}

impl Worker {
    async fn run(mut self) {
        while let Some(Envelope { epoch, task }) = self.rx.recv().await {
            let current = *self.epoch.lock();
            if epoch < current {
                debug!(task = task.kind(), epoch, current, "Dropping cancelled task");
                task.discard();
                continue;
            }

            match task {
                Task::Append { record } => self.append(record).await,
                Task::Flush { done } => self.flush(epoch, done).await,
                Task::Reconcile {
                    batch_id,
                    outcome,
                    done,
                } => self.reconcile(batch_id, outcome, done).await,
                Task::Clear => self.clear().await,
                Task::PendingCount { reply } => {
                    let _ = reply.send(self.queue.pending_count().await.map_err(ShipError::from));
                }
                Task::Snapshot { reply } => {
                    let _ = reply.send(self.queue.peek_all().await.map_err(ShipError::from));
                }
                Task::Shutdown { done } => {
                    self.rx.close();
                    // Anything still buffered was submitted before the close
                    while let Ok(envelope) = self.rx.try_recv() {
                        envelope.task.discard();
                    }
                    if let Err(e) = self.queue.close().await {
                        warn!(error = %e, "Failed to close queue");
                    }
                    info!("Dispatch worker shut down");
                    let _ = done.send(());
                    return;
                }
            }
        }
        debug!("Dispatch channel closed, worker exiting");
    }

    async fn append(&mut self, record: LogRecord) {
        let tag = self.next_tag;
        self.next_tag = tag.next();

        match self.queue.append(tag, record).await {
            Ok(_) => {
                if self.log_activity {
                    info!(tag = %tag, "Queued record");
                }
            }
            Err(e) => error!(tag = %tag, error = %e, "Failed to persist record, dropping it"),
        }
    }

    async fn flush(&mut self, epoch: u64, done: FlushDone) {
        let batch = match self.queue.drain_all().await {
            Ok(batch) => batch,
            Err(e) => {
                error!(error = %e, "Failed to drain queue");
                let _ = done.send(Err(ShipError::Storage(e)));
                return;
            }
        };

        if batch.is_empty() {
            let _ = done.send(Ok(FlushReport::default()));
            return;
        }

        let Some(tx) = self.tx.upgrade() else {
            // No handle left to see the result; put the records back.
            if let Err(e) = self.queue.reinsert(batch).await {
                error!(error = %e, "Failed to re-queue drained records");
            }
            let _ = done.send(Err(ShipError::WorkerStopped));
            return;
        };

        let batch_id = Uuid::new_v4();
        if self.log_activity {
            info!(batch_id = %batch_id, count = batch.len(), "Sending batch");
        }

        let sender = self.sender.clone();
        let span = info_span!("batch", batch_id = %batch_id);
        tokio::spawn(
            async move {
                let outcome = sender.write(batch).await;
                let reconcile = Envelope {
                    epoch,
                    task: Task::Reconcile {
                        batch_id,
                        outcome,
                        done,
                    },
                };
                if let Err(e) = tx.send(reconcile) {
                    // Worker is gone; rows stay in flight and are recovered on
                    // the next open.
                    warn!("Dispatch worker stopped before reconcile");
                    e.0.task.discard();
                }
            }
            .instrument(span),
        );
    }

    async fn reconcile(&mut self, batch_id: Uuid, outcome: WriteOutcome, done: FlushDone) {
        let WriteOutcome {
            sent,
            unsent,
            error,
        } = outcome;
        let sent_count = sent.len();
        let requeued = unsent.len();

        if let Err(e) = self.queue.acknowledge(sent.into_iter().collect()).await {
            // The rows stay in flight and are re-sent after a restart
            error!(batch_id = %batch_id, error = %e, "Failed to remove acknowledged records");
        }
        if let Err(e) = self.queue.reinsert(unsent).await {
            error!(batch_id = %batch_id, error = %e, "Failed to re-queue unsent records");
            let _ = done.send(Err(ShipError::Storage(e)));
            return;
        }

        let result = match error {
            Some(error) => {
                warn!(
                    batch_id = %batch_id,
                    sent = sent_count,
                    requeued,
                    error = %error,
                    "Batch delivery failed"
                );
                Err(ShipError::Transport(error))
            }
            None => {
                if self.log_activity {
                    info!(batch_id = %batch_id, sent = sent_count, requeued, "Batch delivered");
                }
                Ok(FlushReport {
                    sent: sent_count,
                    requeued,
                })
            }
        };
        let _ = done.send(result);
    }

    async fn clear(&mut self) {
        match self.queue.clear().await {
            Ok(count) => {
                if self.log_activity {
                    info!(count, "Discarded queued records");
                }
            }
            Err(e) => error!(error = %e, "Failed to clear queue"),
        }
    }
}
