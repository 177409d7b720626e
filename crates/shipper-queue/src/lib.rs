//! Durable queue of log records awaiting delivery.
//!
//! This crate provides:
//! - `AsyncDatabase`: SQLite on a dedicated executor thread, queries run FIFO
//! - `PersistentQueue`: tag-keyed pending/in-flight record store with crash
//!   recovery and bounded storage
//!
//! ```ignore
//! let queue = PersistentQueue::open(&path, QueueLimits::default()).await?;
//! queue.append(Tag(1), record).await?;
//! let batch = queue.drain_all().await?;
//! ```

mod error;
mod executor;
mod migrations;
mod queue;

pub use error::{QueueError, QueueResult};
pub use executor::AsyncDatabase;
pub use migrations::run_migrations;
pub use queue::{PersistentQueue, QueueLimits};
