// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Uniform query/write/clear capability over a memory backend.

use async_trait::async_trait;

use crate::error::EngramError;
use crate::traits::adapter::MemoryAdapter;
use crate::types::{RetrievalResult, ThreadId, Turn};

/// Capability contract implemented identically by every memory backend.
///
/// Retrieval and augmentation depend only on this trait, never on a concrete
/// backend. Implementations must be safe to call concurrently for distinct
/// threads; same-thread writes are serialized by the execution bridge.
#[async_trait]
pub trait MemoryBackend: MemoryAdapter {
    /// Returns up to `top_k` records relevant to `context`, scoped to the
    /// thread's namespace, ordered by descending relevance.
    ///
    /// Transport failures are returned as errors; the retrieval middleware
    /// turns them into degraded results.
    async fn query(
        &self,
        thread_id: &ThreadId,
        context: &[Turn],
        top_k: usize,
    ) -> Result<RetrievalResult, EngramError>;

    /// Persists one turn as one or more memory records.
    async fn write(&self, thread_id: &ThreadId, turn: &Turn) -> Result<(), EngramError>;

    /// Deletes every record scoped to the thread and confirms the deletion.
    ///
    /// Returns [`EngramError::ClearNotConfirmed`] when deletion cannot be
    /// guaranteed.
    async fn clear(&self, thread_id: &ThreadId) -> Result<(), EngramError>;

    /// Number of records currently scoped to the thread.
    async fn count(&self, thread_id: &ThreadId) -> Result<usize, EngramError>;
}
