//! Async SQLite executor using a dedicated background thread.
//!
//! Every statement is sent over a channel to the single thread that owns the
//! connection, so callers on the tokio runtime never block and statements run
//! in the order they were submitted. Only SQL and light row mapping belong
//! inside [`AsyncDatabase::call`].

use crate::{migrations, QueueError, QueueResult};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

/// Convert a tokio_rusqlite::Error to QueueError.
fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> QueueError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => QueueError::Sqlite(e),
        tokio_rusqlite::Error::Close(_) => QueueError::Connection("Connection closed".to_string()),
        other => QueueError::Connection(other.to_string()),
    }
}

/// Pragmas applied to every connection.
///
/// `synchronous = FULL` makes a committed append survive power loss as well
/// as process termination.
const PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = FULL;
    PRAGMA temp_store = MEMORY;
    PRAGMA busy_timeout = 5000;
";

/// Async SQLite database with a dedicated executor thread.
#[derive(Clone)]
pub struct AsyncDatabase {
    conn: Connection,
    path: String,
}

impl AsyncDatabase {
    /// Open a database at the given path.
    ///
    /// Creates the file and its parent directory if needed, applies pragmas
    /// and runs pending migrations.
    pub async fn open(path: &Path) -> QueueResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();
        info!(path = %path_str, "Opening queue database");

        let conn = Connection::open(path)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        Self::initialize(conn, path_str).await
    }

    /// Open a private in-memory database. Nothing survives a restart.
    pub async fn open_in_memory() -> QueueResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        Self::initialize(conn, ":memory:".to_string()).await
    }

    async fn initialize(conn: Connection, path: String) -> QueueResult<Self> {
        let db = Self { conn, path };

        db.call_sqlite(|conn| conn.execute_batch(PRAGMAS)).await?;
        db.call(|conn| migrations::run_migrations(conn)).await?;

        debug!(path = %db.path, "Queue database initialized");
        Ok(db)
    }

    /// Execute a closure on the database connection.
    ///
    /// The closure runs on the dedicated SQLite thread; the caller's task is
    /// parked until the result is ready.
    pub async fn call<F, T>(&self, f: F) -> QueueResult<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> QueueResult<T> + Send + 'static,
        T: Send + 'static,
    {
        // The closure's own result rides inside tokio_rusqlite's Ok variant
        let outer_result = self.conn.call(move |conn| Ok(f(conn))).await;

        match outer_result {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    /// Execute a closure that returns a rusqlite::Result.
    pub async fn call_sqlite<F, T>(&self, f: F) -> QueueResult<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(conn)?))
            .await
            .map_err(from_tokio_rusqlite)
    }

    /// Get the database file path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Close the connection after pending statements finish.
    pub async fn close(self) -> QueueResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to close database: {:?}", e)))?;
        info!(path = %self.path, "Queue database closed");
        Ok(())
    }
}
