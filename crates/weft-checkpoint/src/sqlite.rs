use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tracing::debug;

use weft_core::error::{CheckpointError, Result, WeftError};

use crate::store::CheckpointStore;
use crate::types::{Checkpoint, CheckpointMetadata, Snapshot};

const SELECT_COLUMNS: &str =
    "SELECT id, thread_id, step, state, next_node, metadata, created_at FROM checkpoints";

/// SQLite-backed checkpoint store for durable persistence.
///
/// Thread-safe via `Arc<Mutex<Connection>>`. All SQLite operations are
/// dispatched to a blocking thread via `tokio::task::spawn_blocking`.
/// The connection is opened by the constructor and closed on drop.
pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCheckpointStore {
    /// Open (or create) a SQLite database at the given path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| unavailable("open database", e))?;
        debug!(path = %path.display(), "opened checkpoint database");
        Self::with_connection(conn)
    }

    /// Create an in-memory SQLite database (useful for tests).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| unavailable("open in-memory db", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id TEXT NOT NULL,
                step INTEGER NOT NULL,
                id TEXT NOT NULL,
                state TEXT NOT NULL,
                next_node TEXT,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (thread_id, step)
            );",
        )
        .map_err(|e| unavailable("create table", e))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| CheckpointError::StoreUnavailable(format!("spawn_blocking: {e}")))?
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| CheckpointError::StoreUnavailable("connection lock poisoned".into()).into())
}

fn unavailable(context: &str, e: rusqlite::Error) -> WeftError {
    CheckpointError::StoreUnavailable(format!("{context}: {e}")).into()
}

fn corrupt(context: &str, e: impl std::fmt::Display) -> WeftError {
    CheckpointError::Corrupt(format!("{context}: {e}")).into()
}

/// Columns exactly as stored, decoded after the statement finishes.
struct RawRow {
    id: String,
    thread_id: String,
    step: i64,
    state: String,
    next_node: Option<String>,
    metadata: String,
    created_at: String,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        step: row.get(2)?,
        state: row.get(3)?,
        next_node: row.get(4)?,
        metadata: row.get(5)?,
        created_at: row.get(6)?,
    })
}

impl RawRow {
    fn decode(self) -> Result<Checkpoint> {
        let step = usize::try_from(self.step).map_err(|e| corrupt("step", e))?;
        let state: Value = serde_json::from_str(&self.state).map_err(|e| corrupt("state", e))?;
        let metadata: CheckpointMetadata =
            serde_json::from_str(&self.metadata).map_err(|e| corrupt("metadata", e))?;
        let created_at: DateTime<Utc> = self
            .created_at
            .parse()
            .map_err(|e| corrupt("created_at", e))?;
        Ok(Checkpoint {
            id: self.id,
            thread_id: self.thread_id,
            step,
            state,
            next_node: self.next_node,
            metadata,
            created_at,
        })
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn append(&self, thread_id: &str, snapshot: Snapshot) -> Result<usize> {
        let thread_id = thread_id.to_owned();
        self.with_conn(move |conn| {
            let state = serde_json::to_string(&snapshot.state)?;
            let metadata = serde_json::to_string(&snapshot.metadata)?;

            let tx = conn
                .transaction()
                .map_err(|e| unavailable("begin transaction", e))?;
            let next: i64 = tx
                .query_row(
                    "SELECT COALESCE(MAX(step) + 1, 0) FROM checkpoints WHERE thread_id = ?1",
                    params![thread_id],
                    |row| row.get(0),
                )
                .map_err(|e| unavailable("next step", e))?;
            let step = usize::try_from(next).map_err(|e| corrupt("step", e))?;

            let checkpoint = Checkpoint::from_snapshot(thread_id, step, snapshot);
            tx.execute(
                "INSERT INTO checkpoints
                    (thread_id, step, id, state, next_node, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    checkpoint.thread_id,
                    next,
                    checkpoint.id,
                    state,
                    checkpoint.next_node,
                    metadata,
                    checkpoint.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| unavailable("insert checkpoint", e))?;
            tx.commit().map_err(|e| unavailable("commit", e))?;
            Ok(step)
        })
        .await
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let thread_id = thread_id.to_owned();
        self.with_conn(move |conn| {
            let raw = conn
                .query_row(
                    &format!("{SELECT_COLUMNS} WHERE thread_id = ?1 ORDER BY step DESC LIMIT 1"),
                    params![thread_id],
                    read_row,
                )
                .optional()
                .map_err(|e| unavailable("query latest", e))?;
            raw.map(RawRow::decode).transpose()
        })
        .await
    }

    async fn get(&self, thread_id: &str, step: usize) -> Result<Option<Checkpoint>> {
        let thread_id = thread_id.to_owned();
        let step = i64::try_from(step).map_err(|e| corrupt("step", e))?;
        self.with_conn(move |conn| {
            let raw = conn
                .query_row(
                    &format!("{SELECT_COLUMNS} WHERE thread_id = ?1 AND step = ?2"),
                    params![thread_id, step],
                    read_row,
                )
                .optional()
                .map_err(|e| unavailable("query step", e))?;
            raw.map(RawRow::decode).transpose()
        })
        .await
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let thread_id = thread_id.to_owned();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!("{SELECT_COLUMNS} WHERE thread_id = ?1 ORDER BY step ASC"))
                .map_err(|e| unavailable("prepare", e))?;
            let rows = stmt
                .query_map(params![thread_id], read_row)
                .map_err(|e| unavailable("query", e))?;

            let mut checkpoints = Vec::new();
            for row in rows {
                let raw = row.map_err(|e| unavailable("read row", e))?;
                checkpoints.push(raw.decode()?);
            }
            Ok(checkpoints)
        })
        .await
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let thread_id = thread_id.to_owned();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM checkpoints WHERE thread_id = ?1",
                params![thread_id],
            )
            .map_err(|e| unavailable("delete", e))?;
            Ok(())
        })
        .await
    }
}
