// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory memory backend with scriptable failure modes.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use engram_core::{
    BackendKind, EngramError, HealthStatus, MemoryAdapter, MemoryBackend, MemoryRecord,
    RecordKind, RetrievalResult, Role, SourceRef, ThreadId, Turn, turn_text,
};
use engram_memory::retry::write_with_retry;
use engram_memory::types::namespace_for;

use crate::keyword_overlap;

struct Stored {
    namespace: String,
    turn: Turn,
}

/// A [`MemoryBackend`] that keeps turns in a vector and ranks them by
/// keyword overlap with the query window.
///
/// Failures are toggled at runtime so a single backend can be healthy for
/// one turn and unavailable for the next.
pub struct MockBackend {
    name: String,
    shared_memory: bool,
    stored: Mutex<Vec<Stored>>,
    unavailable: AtomicBool,
    clear_unconfirmed: AtomicBool,
    failing_writes: AtomicU32,
    query_delay: Mutex<Option<Duration>>,
    write_delay: Mutex<Option<Duration>>,
    queries: AtomicUsize,
    write_attempts: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::named("mock-memory")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared_memory: false,
            stored: Mutex::new(Vec::new()),
            unavailable: AtomicBool::new(false),
            clear_unconfirmed: AtomicBool::new(false),
            failing_writes: AtomicU32::new(0),
            query_delay: Mutex::new(None),
            write_delay: Mutex::new(None),
            queries: AtomicUsize::new(0),
            write_attempts: AtomicUsize::new(0),
        }
    }

    /// Every thread reads and writes the one global namespace.
    pub fn shared(mut self) -> Self {
        self.shared_memory = true;
        self
    }

    /// Every operation fails with `BackendUnavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Clears succeed in deleting nothing and report `ClearNotConfirmed`.
    pub fn set_clear_unconfirmed(&self, unconfirmed: bool) {
        self.clear_unconfirmed.store(unconfirmed, Ordering::SeqCst);
    }

    /// The next `count` write attempts fail.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub fn set_query_delay(&self, delay: Option<Duration>) {
        if let Ok(mut slot) = self.query_delay.lock() {
            *slot = delay;
        }
    }

    pub fn set_write_delay(&self, delay: Option<Duration>) {
        if let Ok(mut slot) = self.write_delay.lock() {
            *slot = delay;
        }
    }

    /// Stores a turn directly, as if an earlier session had written it.
    pub fn seed(&self, thread_id: &ThreadId, role: Role, text: &str) {
        let namespace = namespace_for(thread_id, self.shared_memory);
        if let Ok(mut stored) = self.stored.lock() {
            let seq = stored.len() as u64 + 1;
            let mut turn = Turn::new(thread_id.clone(), role, text, Utc::now());
            turn.seq = seq;
            stored.push(Stored { namespace, turn });
        }
    }

    /// Turns currently stored for the thread, in write order.
    pub fn turns(&self, thread_id: &ThreadId) -> Vec<Turn> {
        self.stored
            .lock()
            .map(|stored| {
                stored
                    .iter()
                    .filter(|s| &s.turn.thread_id == thread_id)
                    .map(|s| s.turn.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn total_records(&self) -> usize {
        self.stored.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Write attempts including failed ones.
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), EngramError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EngramError::unavailable(self.name.clone(), "connection refused"));
        }
        Ok(())
    }

    fn delay(slot: &Mutex<Option<Duration>>) -> Option<Duration> {
        slot.lock().ok().and_then(|d| *d)
    }

    async fn attempt_write(&self, namespace: &str, turn: &Turn) -> Result<(), EngramError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let failing = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(EngramError::unavailable(self.name.clone(), "write rejected"));
        }
        let mut stored = self
            .stored
            .lock()
            .map_err(|_| EngramError::Internal("mock backend lock poisoned".into()))?;
        stored.retain(|s| !(s.turn.thread_id == turn.thread_id && s.turn.seq == turn.seq));
        stored.push(Stored {
            namespace: namespace.to_string(),
            turn: turn.clone(),
        });
        Ok(())
    }

    fn record(stored: &Stored) -> MemoryRecord {
        let turn = &stored.turn;
        let turn_ref = turn.turn_ref();
        MemoryRecord {
            id: turn_ref.to_string(),
            thread_id: turn.thread_id.clone(),
            source: SourceRef::Turn(turn_ref),
            kind: RecordKind::Turn,
            role: Some(turn.role),
            content: turn_text(turn),
            timestamp: turn.timestamp,
            metadata: serde_json::json!({ "namespace": stored.namespace }),
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryAdapter for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Custom
    }

    async fn health_check(&self) -> Result<HealthStatus, EngramError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Ok(HealthStatus::Unhealthy("connection refused".into()));
        }
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), EngramError> {
        Ok(())
    }
}

#[async_trait]
impl MemoryBackend for MockBackend {
    async fn query(
        &self,
        thread_id: &ThreadId,
        context: &[Turn],
        top_k: usize,
    ) -> Result<RetrievalResult, EngramError> {
        let started = Instant::now();
        self.queries.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = Self::delay(&self.query_delay) {
            tokio::time::sleep(delay).await;
        }
        self.check_available()?;

        let namespace = namespace_for(thread_id, self.shared_memory);
        let query = context.iter().map(turn_text).collect::<Vec<_>>().join("\n");
        let mut hits: Vec<(MemoryRecord, f32)> = {
            let stored = self
                .stored
                .lock()
                .map_err(|_| EngramError::Internal("mock backend lock poisoned".into()))?;
            stored
                .iter()
                .filter(|s| s.namespace == namespace)
                .filter_map(|s| {
                    let overlap = keyword_overlap(&query, &turn_text(&s.turn));
                    (overlap > 0).then(|| (Self::record(s), overlap as f32))
                })
                .collect()
        };
        hits.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| b.0.timestamp.cmp(&a.0.timestamp))
        });
        hits.truncate(top_k);
        Ok(RetrievalResult::from_scored(
            self.name.clone(),
            hits,
            started.elapsed(),
        ))
    }

    async fn write(&self, thread_id: &ThreadId, turn: &Turn) -> Result<(), EngramError> {
        if let Some(delay) = Self::delay(&self.write_delay) {
            tokio::time::sleep(delay).await;
        }
        let namespace = namespace_for(thread_id, self.shared_memory);
        let namespace = namespace.as_str();
        let this = self;
        write_with_retry(&self.name, thread_id, move || this.attempt_write(namespace, turn)).await
    }

    async fn clear(&self, thread_id: &ThreadId) -> Result<(), EngramError> {
        let not_confirmed = |reason: &str| EngramError::ClearNotConfirmed {
            backend: self.name.clone(),
            thread_id: thread_id.to_string(),
            reason: reason.to_string(),
        };
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(not_confirmed("connection refused"));
        }
        if self.clear_unconfirmed.load(Ordering::SeqCst) {
            return Err(not_confirmed("records remain after clear"));
        }
        let mut stored = self
            .stored
            .lock()
            .map_err(|_| EngramError::Internal("mock backend lock poisoned".into()))?;
        stored.retain(|s| &s.turn.thread_id != thread_id);
        Ok(())
    }

    async fn count(&self, thread_id: &ThreadId) -> Result<usize, EngramError> {
        self.check_available()?;
        Ok(self.turns(thread_id).len())
    }
}
