// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-wide backend resources with an explicit lifecycle.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, info};

use engram_config::model::EngramConfig;
use engram_core::EngramError;

use crate::store::SqliteVectorStore;

/// Shared HTTP client and lazily opened SQLite collection.
///
/// One pool is created at startup and handed to every adapter; each call
/// borrows the shared resources for its own duration. After
/// [`shutdown`](Self::shutdown) the pool refuses to hand out resources.
pub struct ConnectionPool {
    http: reqwest::Client,
    vector_path: Option<PathBuf>,
    vector_store: OnceCell<Arc<SqliteVectorStore>>,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Creates a pool. `vector_path` is `None` when no vector backend is used.
    pub fn new(vector_path: Option<PathBuf>, http_timeout: Duration) -> Result<Self, EngramError> {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| EngramError::Provider {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self {
            http,
            vector_path,
            vector_store: OnceCell::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn from_config(config: &EngramConfig) -> Result<Self, EngramError> {
        let vector_path = config
            .agent
            .variant
            .uses_vector()
            .then(|| PathBuf::from(&config.vector.database_path));
        let timeout = Duration::from_millis(
            config
                .graph
                .request_timeout_ms
                .max(config.bridge.query_timeout_ms),
        );
        Self::new(vector_path, timeout)
    }

    /// Opens every configured resource eagerly.
    pub async fn initialize(&self) -> Result<(), EngramError> {
        if self.vector_path.is_some() {
            self.vector_store().await?;
        }
        info!(vector = self.vector_path.is_some(), "connection pool initialized");
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), EngramError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngramError::Internal("connection pool is shut down".into()));
        }
        Ok(())
    }

    /// Shared HTTP client. Cloning is cheap and shares the connection pool.
    pub fn http(&self) -> Result<reqwest::Client, EngramError> {
        self.ensure_open()?;
        Ok(self.http.clone())
    }

    /// The SQLite vector collection, opened on first use.
    pub async fn vector_store(&self) -> Result<Arc<SqliteVectorStore>, EngramError> {
        self.ensure_open()?;
        let path = self
            .vector_path
            .as_ref()
            .ok_or_else(|| EngramError::Config("no vector database path configured".into()))?;
        let store = self
            .vector_store
            .get_or_try_init(|| async {
                let store = SqliteVectorStore::open(path).await?;
                Ok::<_, EngramError>(Arc::new(store))
            })
            .await?;
        Ok(Arc::clone(store))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Flushes the SQLite WAL and closes the pool. Idempotent.
    pub async fn shutdown(&self) -> Result<(), EngramError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(store) = self.vector_store.get() {
            store.checkpoint().await?;
            debug!("shutdown: WAL checkpoint complete");
        }
        info!("connection pool shut down");
        Ok(())
    }
}
