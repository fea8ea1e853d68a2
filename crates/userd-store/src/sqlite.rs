// ABOUTME: SQLite-backed Store holding the durable users table.
// ABOUTME: Queries run on the blocking pool against a single mutex-guarded connection.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use thiserror::Error;
use ulid::Ulid;
use userd_core::{Record, Store, StoreError, UserPatch};

/// Errors that can occur while opening the database.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL,
    created_at TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1
);";

const COLUMNS: &str = "id, name, email, created_at, active";

/// The durable user table. Single-row statements give per-record atomicity;
/// the connection mutex serialises statements from concurrent tasks.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a database at the given path and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self, SqliteStoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, SqliteStoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, SqliteStoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("sqlite task failed: {e}")))?
    }
}

fn unavailable(err: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn conversion_error(
    index: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<Record> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(3)?;
    Ok(Record {
        id: id.parse::<Ulid>().map_err(|e| conversion_error(0, e))?,
        name: row.get(1)?,
        email: row.get(2)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| conversion_error(3, e))?
            .with_timezone(&Utc),
        active: row.get(4)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn put(&self, record: &Record) -> Result<(), StoreError> {
        let record = record.clone();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, name, email, created_at, active) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id.to_string(),
                    record.name,
                    record.email,
                    record.created_at.to_rfc3339(),
                    record.active,
                ],
            );
            match inserted {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                    Err(StoreError::Conflict(record.id))
                }
                Err(e) => Err(unavailable(e)),
            }
        })
        .await
    }

    async fn get(&self, id: Ulid) -> Result<Record, StoreError> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_record,
            )
            .optional()
            .map_err(unavailable)?
            .ok_or(StoreError::NotFound(id))
        })
        .await
    }

    async fn update(&self, id: Ulid, patch: &UserPatch) -> Result<Record, StoreError> {
        let patch = patch.clone();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "UPDATE users SET name = COALESCE(?2, name), email = COALESCE(?3, email)
                     WHERE id = ?1 RETURNING {COLUMNS}"
                ),
                params![id.to_string(), patch.name, patch.email],
                row_to_record,
            )
            .optional()
            .map_err(unavailable)?
            .ok_or(StoreError::NotFound(id))
        })
        .await
    }

    async fn delete(&self, id: Ulid) -> Result<Record, StoreError> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("DELETE FROM users WHERE id = ?1 RETURNING {COLUMNS}"),
                params![id.to_string()],
                row_to_record,
            )
            .optional()
            .map_err(unavailable)?
            .ok_or(StoreError::NotFound(id))
        })
        .await
    }

    async fn set_active(&self, id: Ulid, active: bool) -> Result<Record, StoreError> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("UPDATE users SET active = ?2 WHERE id = ?1 RETURNING {COLUMNS}"),
                params![id.to_string(), active],
                row_to_record,
            )
            .optional()
            .map_err(unavailable)?
            .ok_or(StoreError::NotFound(id))
        })
        .await
    }

    async fn list_all(&self) -> Result<Vec<Record>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT {COLUMNS} FROM users ORDER BY id ASC"))
                .map_err(unavailable)?;
            let rows = stmt.query_map([], row_to_record).map_err(unavailable)?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row.map_err(unavailable)?);
            }
            Ok(records)
        })
        .await
    }
}
