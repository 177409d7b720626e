//! Persistent queue of records awaiting delivery.
//!
//! Rows are either *pending* (waiting for the next drain) or *in flight*
//! (handed to a transport, waiting to be acknowledged or re-inserted). Both
//! states live in SQLite so a crash never loses a record: on open, rows left
//! in flight by the previous process go back to pending.

use crate::{AsyncDatabase, QueueError, QueueResult};
use rusqlite::{params, Connection};
use shipper_core::{Batch, LogRecord, QueuedRecord, Tag};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

const STATE_PENDING: i64 = 0;
const STATE_IN_FLIGHT: i64 = 1;

/// Default cap on pending records.
pub const DEFAULT_MAX_RECORDS: usize = 10_000;

/// Storage bounds for the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    /// Maximum pending records. Oldest (lowest tag) are evicted first.
    pub max_records: usize,
    /// Pending records older than this are evicted on append and drain.
    pub max_age: Option<Duration>,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_records: DEFAULT_MAX_RECORDS,
            max_age: None,
        }
    }
}

/// Durable, tag-keyed store of pending log records.
///
/// Not synchronized on its own: callers are expected to funnel every
/// mutation through a single owner.
pub struct PersistentQueue {
    db: AsyncDatabase,
    limits: QueueLimits,
}

impl PersistentQueue {
    /// Open (or create) the queue at `path` and recover in-flight rows.
    pub async fn open(path: &Path, limits: QueueLimits) -> QueueResult<Self> {
        let queue = Self {
            db: AsyncDatabase::open(path).await?,
            limits,
        };
        queue.recover().await?;
        Ok(queue)
    }

    /// In-memory queue. Useful for tests.
    pub async fn in_memory(limits: QueueLimits) -> QueueResult<Self> {
        Ok(Self {
            db: AsyncDatabase::open_in_memory().await?,
            limits,
        })
    }

    /// Reset rows a previous process left in flight back to pending.
    ///
    /// Their delivery outcome is unknown, so they will be sent again.
    async fn recover(&self) -> QueueResult<usize> {
        let reset = self
            .db
            .call_sqlite(|conn| {
                conn.execute(
                    "UPDATE pending_logs SET state = ?1 WHERE state = ?2",
                    params![STATE_PENDING, STATE_IN_FLIGHT],
                )
            })
            .await?;
        if reset > 0 {
            info!(
                path = self.db.path(),
                count = reset,
                "Recovered in-flight records to pending"
            );
        }
        Ok(reset)
    }

    /// Durably add one record. Returns the number of records evicted to stay
    /// within the limits.
    pub async fn append(&self, tag: Tag, record: LogRecord) -> QueueResult<usize> {
        let json = record.to_json_line()?;
        let now = now_millis();
        let limits = self.limits;
        let tag_value = to_sql_tag(tag)?;

        let evicted = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO pending_logs (tag, record, enqueued_at, state) VALUES (?1, ?2, ?3, ?4)",
                    params![tag_value, json, now, STATE_PENDING],
                )?;
                let evicted = evict(&tx, limits, now)?;
                tx.commit()?;
                Ok(evicted)
            })
            .await?;

        if evicted > 0 {
            warn!(tag = %tag, evicted, "Queue limit reached, dropped oldest records");
        }
        Ok(evicted)
    }

    /// Atomically move every pending record in flight and return them.
    ///
    /// The pending set is empty when this returns.
    pub async fn drain_all(&self) -> QueueResult<Batch> {
        let limits = self.limits;
        let now = now_millis();

        let (rows, evicted) = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let evicted = evict(&tx, limits, now)?;
                let rows = select_rows(&tx, STATE_PENDING)?;
                tx.execute(
                    "UPDATE pending_logs SET state = ?1 WHERE state = ?2",
                    params![STATE_IN_FLIGHT, STATE_PENDING],
                )?;
                tx.commit()?;
                Ok((rows, evicted))
            })
            .await?;

        if evicted > 0 {
            warn!(evicted, "Dropped expired records before drain");
        }

        let batch = rows_to_batch(rows)?;
        debug!(count = batch.len(), "Drained pending records");
        Ok(batch)
    }

    /// Delete acknowledged in-flight records. Returns how many were removed.
    pub async fn acknowledge(&self, tags: Vec<Tag>) -> QueueResult<usize> {
        if tags.is_empty() {
            return Ok(0);
        }
        let tags = tags
            .into_iter()
            .map(to_sql_tag)
            .collect::<QueueResult<Vec<_>>>()?;

        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut removed = 0;
                {
                    let mut stmt = tx
                        .prepare("DELETE FROM pending_logs WHERE tag = ?1 AND state = ?2")?;
                    for tag in tags {
                        removed += stmt.execute(params![tag, STATE_IN_FLIGHT])?;
                    }
                }
                tx.commit()?;
                Ok(removed)
            })
            .await
    }

    /// Put records back in the pending set, keeping their tags.
    pub async fn reinsert(&self, batch: Batch) -> QueueResult<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let rows = batch
            .into_iter()
            .map(|(tag, queued)| {
                Ok((
                    to_sql_tag(tag)?,
                    queued.record.to_json_line()?,
                    queued.enqueued_at,
                ))
            })
            .collect::<QueueResult<Vec<_>>>()?;
        let count = rows.len();
        let limits = self.limits;
        let now = now_millis();

        let evicted = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT OR REPLACE INTO pending_logs (tag, record, enqueued_at, state)
                         VALUES (?1, ?2, ?3, ?4)",
                    )?;
                    for (tag, json, enqueued_at) in rows {
                        stmt.execute(params![tag, json, enqueued_at, STATE_PENDING])?;
                    }
                }
                let evicted = evict(&tx, limits, now)?;
                tx.commit()?;
                Ok(evicted)
            })
            .await?;

        if evicted > 0 {
            warn!(reinserted = count, evicted, "Queue limit reached while re-inserting");
        }
        Ok(count)
    }

    /// Discard every pending and in-flight record.
    pub async fn clear(&self) -> QueueResult<usize> {
        let removed = self
            .db
            .call_sqlite(|conn| conn.execute("DELETE FROM pending_logs", []))
            .await?;
        info!(count = removed, "Cleared queue");
        Ok(removed)
    }

    /// Copy of the pending set without changing it.
    pub async fn peek_all(&self) -> QueueResult<Batch> {
        let rows = self
            .db
            .call(|conn| select_rows(conn, STATE_PENDING))
            .await?;
        rows_to_batch(rows)
    }

    pub async fn pending_count(&self) -> QueueResult<usize> {
        self.count_state(STATE_PENDING).await
    }

    pub async fn in_flight_count(&self) -> QueueResult<usize> {
        self.count_state(STATE_IN_FLIGHT).await
    }

    async fn count_state(&self, state: i64) -> QueueResult<usize> {
        let count: i64 = self
            .db
            .call_sqlite(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM pending_logs WHERE state = ?1",
                    params![state],
                    |row| row.get(0),
                )
            })
            .await?;
        Ok(count as usize)
    }

    /// Highest tag stored in any state.
    pub async fn max_tag(&self) -> QueueResult<Option<Tag>> {
        let max: Option<i64> = self
            .db
            .call_sqlite(|conn| {
                conn.query_row("SELECT MAX(tag) FROM pending_logs", [], |row| row.get(0))
            })
            .await?;
        Ok(max.map(|tag| Tag(tag as u64)))
    }

    /// Close the underlying database.
    pub async fn close(self) -> QueueResult<()> {
        self.db.close().await
    }
}

type Row = (i64, String, i64);

fn select_rows(conn: &Connection, state: i64) -> QueueResult<Vec<Row>> {
    let mut stmt = conn.prepare(
        "SELECT tag, record, enqueued_at FROM pending_logs WHERE state = ?1 ORDER BY tag",
    )?;
    let rows = stmt
        .query_map(params![state], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn rows_to_batch(rows: Vec<Row>) -> QueueResult<Batch> {
    rows.into_iter()
        .map(|(tag, json, enqueued_at)| {
            let record: LogRecord = serde_json::from_str(&json)?;
            Ok((
                Tag(tag as u64),
                QueuedRecord {
                    record,
                    enqueued_at,
                },
            ))
        })
        .collect()
}

/// Apply age and size limits to the pending set.
fn evict(conn: &Connection, limits: QueueLimits, now: i64) -> QueueResult<usize> {
    let mut evicted = 0;

    if let Some(max_age) = limits.max_age {
        let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(max_age_ms);
        evicted += conn.execute(
            "DELETE FROM pending_logs WHERE state = ?1 AND enqueued_at < ?2",
            params![STATE_PENDING, cutoff],
        )?;
    }

    let pending: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pending_logs WHERE state = ?1",
        params![STATE_PENDING],
        |row| row.get(0),
    )?;
    let max_records = i64::try_from(limits.max_records).unwrap_or(i64::MAX);
    let excess = pending.saturating_sub(max_records);
    if excess > 0 {
        evicted += conn.execute(
            "DELETE FROM pending_logs WHERE tag IN (
                SELECT tag FROM pending_logs WHERE state = ?1 ORDER BY tag ASC LIMIT ?2
            )",
            params![STATE_PENDING, excess],
        )?;
    }

    Ok(evicted)
}

fn to_sql_tag(tag: Tag) -> QueueResult<i64> {
    i64::try_from(tag.0).map_err(|_| QueueError::InvalidData(format!("tag {tag} out of range")))
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
