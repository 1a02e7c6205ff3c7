//! SQLite-backed key-value store.
//!
//! Statements run on the blocking pool. `update` wraps its read and write
//! in a `BEGIN IMMEDIATE` transaction, which takes the database write lock
//! up front, so other connections (other processes included) wait on the
//! busy timeout instead of interleaving.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{KeyValueStore, StorageError, UpdateFn};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
)";

/// How long a writer waits for another connection's lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type ConnGuard = OwnedMutexGuard<Connection>;

/// Key-value table in a SQLite database
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `op` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone().lock_owned().await;
        blocking(move || {
            discard_open_transaction(&conn)?;
            op(&conn)
        })
        .await
    }
}

async fn blocking<T, F>(op: F) -> Result<T, StorageError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| StorageError::Lock(e.to_string()))?
}

fn select_value(conn: &Connection, key: &str) -> Result<Option<String>, StorageError> {
    let value = conn
        .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(value)
}

fn upsert_value(conn: &Connection, key: &str, value: &str) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO kv (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// A cancelled `update` can leave its transaction open on the connection
fn discard_open_transaction(conn: &Connection) -> Result<(), StorageError> {
    if !conn.is_autocommit() {
        conn.execute_batch("ROLLBACK")?;
    }
    Ok(())
}

/// Open a write transaction and read the current value
fn begin_update(conn: ConnGuard, key: String) -> Result<(ConnGuard, Option<String>), StorageError> {
    discard_open_transaction(&conn)?;
    conn.execute_batch("BEGIN IMMEDIATE")?;

    match select_value(&conn, &key) {
        Ok(current) => Ok((conn, current)),
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

/// Write (if asked) and commit; roll back on any failure
fn finish_update(conn: ConnGuard, key: String, next: Option<String>) -> Result<(), StorageError> {
    let written = match next {
        Some(value) => upsert_value(&conn, &key, &value),
        None => Ok(()),
    };

    match written.and_then(|()| Ok(conn.execute_batch("COMMIT")?)) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let key = key.to_string();
        self.with_conn(move |conn| select_value(conn, &key)).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn| upsert_value(conn, &key, &value))
            .await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }

    async fn update<'a>(&self, key: &str, apply: UpdateFn<'a>) -> Result<(), StorageError> {
        let conn = self.conn.clone().lock_owned().await;
        let read_key = key.to_string();
        let (conn, current) = blocking(move || begin_update(conn, read_key)).await?;

        let next = match apply(current) {
            Ok(next) => next,
            Err(e) => {
                blocking(move || finish_rollback(conn)).await?;
                return Err(e);
            }
        };

        let write_key = key.to_string();
        blocking(move || finish_update(conn, write_key, next)).await
    }
}

fn finish_rollback(conn: ConnGuard) -> Result<(), StorageError> {
    conn.execute_batch("ROLLBACK")?;
    Ok(())
}
