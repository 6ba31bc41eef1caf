// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistent vector collection backed by SQLite.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_rusqlite::Connection;
use tracing::debug;

use engram_core::{EngramError, Role, ThreadId};

use crate::types::{StoredVector, blob_to_vec, vec_to_blob};

/// Helper to convert tokio_rusqlite errors into EngramError::Storage.
fn storage_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> EngramError {
    EngramError::Storage {
        source: Box::new(e),
    }
}

const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;
    CREATE TABLE IF NOT EXISTS memory_vectors (
        id TEXT PRIMARY KEY NOT NULL,
        namespace TEXT NOT NULL,
        thread_id TEXT NOT NULL,
        seq INTEGER NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        embedding BLOB NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_memory_vectors_namespace
        ON memory_vectors (namespace, thread_id);
";

/// Storage seam for embedded turns.
#[async_trait]
pub trait VectorStore: Send + Sync + 'static {
    /// Inserts or replaces the vector with the same id.
    async fn insert(&self, vector: &StoredVector) -> Result<(), EngramError>;

    /// Every vector in the namespace.
    async fn scan(&self, namespace: &str) -> Result<Vec<StoredVector>, EngramError>;

    /// Deletes the thread's vectors within the namespace, returning how many went.
    async fn delete(&self, namespace: &str, thread_id: &ThreadId) -> Result<usize, EngramError>;

    /// Number of the thread's vectors within the namespace.
    async fn count(&self, namespace: &str, thread_id: &ThreadId) -> Result<usize, EngramError>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), EngramError>;
}

/// [`VectorStore`] over a single SQLite file.
///
/// Embeddings are little-endian f32 BLOBs; similarity is computed by the
/// caller over a namespace scan.
pub struct SqliteVectorStore {
    conn: Connection,
}

impl SqliteVectorStore {
    /// Opens (creating if needed) the database at `path` and applies the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, EngramError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| EngramError::Storage {
                    source: Box::new(e),
                })?;
            }
        }
        let conn = Connection::open(path)
            .await
            .map_err(|e| EngramError::Storage {
                source: Box::new(e),
            })?;
        let store = Self::with_connection(conn).await?;
        debug!(path = %path.display(), "vector store opened");
        Ok(store)
    }

    /// In-memory store, for tests.
    pub async fn open_in_memory() -> Result<Self, EngramError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| EngramError::Storage {
                source: Box::new(e),
            })?;
        Self::with_connection(conn).await
    }

    async fn with_connection(conn: Connection) -> Result<Self, EngramError> {
        conn.call(|conn| -> Result<(), rusqlite::Error> {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(storage_err)?;
        Ok(Self { conn })
    }

    /// Flushes the WAL into the main database file.
    pub async fn checkpoint(&self) -> Result<(), EngramError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn insert(&self, vector: &StoredVector) -> Result<(), EngramError> {
        let id = vector.id.clone();
        let namespace = vector.namespace.clone();
        let thread_id = vector.thread_id.to_string();
        let seq = vector.seq as i64;
        let role = vector.role.to_string();
        let content = vector.content.clone();
        let blob = vec_to_blob(&vector.embedding);
        let created_at = vector.timestamp.to_rfc3339();

        self.conn
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "INSERT OR REPLACE INTO memory_vectors (id, namespace, thread_id, seq, role, content, embedding, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![id, namespace, thread_id, seq, role, content, blob, created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }

    async fn scan(&self, namespace: &str) -> Result<Vec<StoredVector>, EngramError> {
        let namespace = namespace.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<StoredVector>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, namespace, thread_id, seq, role, content, embedding, created_at FROM memory_vectors WHERE namespace = ?1 ORDER BY created_at, seq",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![namespace], row_to_vector)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(storage_err)
    }

    async fn delete(&self, namespace: &str, thread_id: &ThreadId) -> Result<usize, EngramError> {
        let namespace = namespace.to_string();
        let thread_id = thread_id.to_string();
        self.conn
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                conn.execute(
                    "DELETE FROM memory_vectors WHERE namespace = ?1 AND thread_id = ?2",
                    rusqlite::params![namespace, thread_id],
                )
            })
            .await
            .map_err(storage_err)
    }

    async fn count(&self, namespace: &str, thread_id: &ThreadId) -> Result<usize, EngramError> {
        let namespace = namespace.to_string();
        let thread_id = thread_id.to_string();
        self.conn
            .call(move |conn| -> Result<i64, rusqlite::Error> {
                conn.query_row(
                    "SELECT COUNT(*) FROM memory_vectors WHERE namespace = ?1 AND thread_id = ?2",
                    rusqlite::params![namespace, thread_id],
                    |row| row.get(0),
                )
            })
            .await
            .map(|n| n as usize)
            .map_err(storage_err)
    }

    async fn ping(&self) -> Result<(), EngramError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }
}

fn conversion_err(column: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}

fn row_to_vector(row: &rusqlite::Row<'_>) -> Result<StoredVector, rusqlite::Error> {
    let thread_id: String = row.get(2)?;
    let seq: i64 = row.get(3)?;
    let role: String = row.get(4)?;
    let blob: Vec<u8> = row.get(6)?;
    let created_at: String = row.get(7)?;

    let role = Role::from_str(&role).map_err(|e| conversion_err(4, e))?;
    let timestamp = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| conversion_err(7, e))?
        .with_timezone(&Utc);

    Ok(StoredVector {
        id: row.get(0)?,
        namespace: row.get(1)?,
        thread_id: ThreadId::new(thread_id),
        seq: seq.max(0) as u64,
        role,
        content: row.get(5)?,
        embedding: blob_to_vec(&blob),
        timestamp,
    })
}
