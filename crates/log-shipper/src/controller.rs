//! The public face of the shipper.

use crate::dispatch::{self, DispatchHandle, Task};
use crate::{BatchSender, ShipError, ShipResult};
use shipper_core::{Batch, Config, LogRecord, Paths, TOKEN_KEY};
use shipper_queue::{PersistentQueue, QueueLimits};
use shipper_transport::{transport_from_config, Transport};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Counts for one successful flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Records the collector acknowledged.
    pub sent: usize,
    /// Records put back in the queue for a later flush.
    pub requeued: usize,
}

/// Resolves once, when the flush it belongs to has settled.
///
/// Dropping it does not cancel the flush.
#[must_use = "a flush completion does nothing unless awaited"]
pub struct FlushCompletion {
    rx: oneshot::Receiver<ShipResult<FlushReport>>,
}

impl Future for FlushCompletion {
    type Output = ShipResult<FlushReport>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(ShipError::WorkerStopped)))
    }
}

/// Settings that shape how records are accepted.
#[derive(Debug, Clone, Default)]
pub struct ControllerOptions {
    /// Merged into every accepted record under `token`.
    pub token: Option<String>,
    /// Trace appends, drains and sends at info level.
    pub log_activity: bool,
}

impl ControllerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            token: config.token.clone(),
            log_activity: config.log_activity,
        }
    }
}

/// Accepts records, persists them and ships them on demand.
///
/// Cheap to clone; every clone talks to the same dispatch worker.
#[derive(Clone)]
pub struct ShippingController {
    dispatch: DispatchHandle,
    transport: Arc<dyn Transport>,
    options: Arc<ControllerOptions>,
}

impl ShippingController {
    /// Start the dispatch worker over an opened queue.
    pub async fn start(
        queue: PersistentQueue,
        transport: Arc<dyn Transport>,
        options: ControllerOptions,
    ) -> ShipResult<Self> {
        let sender = BatchSender::new(transport.clone());
        let (dispatch, _worker) = dispatch::spawn(queue, sender, options.log_activity).await?;

        Ok(Self {
            dispatch,
            transport,
            options: Arc::new(options),
        })
    }

    /// Open the on-disk queue and the configured transport.
    pub async fn from_config(config: &Config, paths: &Paths) -> ShipResult<Self> {
        config.validate()?;
        paths.ensure_dirs()?;

        let limits = QueueLimits {
            max_records: config.queue_max_records,
            max_age: config.queue_max_age(),
        };
        let queue = PersistentQueue::open(&paths.queue_database_file(), limits).await?;
        let transport = transport_from_config(config)?;

        info!(
            host = %config.host,
            port = config.port,
            over_http = config.over_http,
            "Shipping controller started"
        );
        Self::start(queue, transport, ControllerOptions::from_config(config)).await
    }

    /// Hand a record over for delivery. Never blocks.
    ///
    /// Storage failures are logged by the worker; the caller is not told.
    pub fn accept(&self, record: LogRecord) {
        let record = match &self.options.token {
            Some(token) => record.merged_with(TOKEN_KEY, token.as_str()),
            None => record,
        };

        if self.dispatch.submit(Task::Append { record }).is_err() {
            warn!("Dispatch worker stopped, record dropped");
        }
    }

    /// Send everything pending now.
    ///
    /// Records accepted after this call are left for the next flush.
    pub fn flush(&self) -> FlushCompletion {
        let (done, rx) = oneshot::channel();
        if self.dispatch.submit(Task::Flush { done }).is_err() {
            // the returned task drops its sender, so rx resolves WorkerStopped
            warn!("Dispatch worker stopped, flush ignored");
        }
        FlushCompletion { rx }
    }

    /// Discard everything queued or in flight and abort the current send.
    ///
    /// Outstanding flushes resolve with [`ShipError::Cancelled`].
    pub fn cancel(&self) {
        let epoch = self.dispatch.cancel(|| self.transport.cancel());
        if self.options.log_activity {
            info!(epoch, "Shipping cancelled");
        }
    }

    /// Records waiting for the next flush.
    pub async fn pending_count(&self) -> ShipResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.ask(Task::PendingCount { reply }, rx).await
    }

    /// Copy of the records waiting for the next flush, ordered by tag.
    pub async fn pending_records(&self) -> ShipResult<Batch> {
        let (reply, rx) = oneshot::channel();
        self.ask(Task::Snapshot { reply }, rx).await
    }

    async fn ask<T>(&self, task: Task, rx: oneshot::Receiver<ShipResult<T>>) -> ShipResult<T> {
        self.dispatch
            .submit(task)
            .map_err(|_| ShipError::WorkerStopped)?;
        rx.await.unwrap_or(Err(ShipError::WorkerStopped))
    }

    /// Flush every `interval` until the returned task is aborted.
    ///
    /// The first flush happens one interval after the call.
    pub fn spawn_periodic_flush(&self, interval: Duration) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match controller.flush().await {
                    Ok(report) if report.sent > 0 || report.requeued > 0 => {
                        debug!(sent = report.sent, requeued = report.requeued, "Periodic flush");
                    }
                    Ok(_) => {}
                    Err(ShipError::WorkerStopped) => {
                        debug!("Dispatch worker stopped, periodic flush exiting");
                        return;
                    }
                    Err(e) => warn!(error = %e, "Periodic flush failed"),
                }
            }
        })
    }

    pub fn is_running(&self) -> bool {
        !self.dispatch.is_closed()
    }

    /// Finish the tasks already submitted, then stop the worker and close
    /// the queue. Later calls on any clone fail with `WorkerStopped`.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.dispatch.submit(Task::Shutdown { done }).is_ok() {
            let _ = rx.await;
        }
    }
}
