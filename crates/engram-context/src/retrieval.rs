// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retrieval middleware.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use engram_bridge::ExecutionBridge;
use engram_config::model::EngramConfig;
use engram_core::metrics::{record_degraded_retrieval, record_retrieval_latency};
use engram_core::{ConversationState, MemoryBackend, RetrievalResult};

const NO_BACKEND: &str = "none";

/// Queries a memory backend for the turns at the tail of a conversation.
///
/// Never fails: timeouts and backend errors produce an empty result with
/// `degraded = true`.
pub struct RetrievalMiddleware {
    backend: Option<Arc<dyn MemoryBackend>>,
    bridge: Arc<ExecutionBridge>,
    query_window: usize,
    top_k: usize,
    timeout: Duration,
    shared_memory: bool,
}

impl RetrievalMiddleware {
    /// Creates a middleware with the default window (2), top-k (5) and a
    /// 5 second timeout. `backend = None` disables retrieval.
    pub fn new(backend: Option<Arc<dyn MemoryBackend>>, bridge: Arc<ExecutionBridge>) -> Self {
        Self {
            backend,
            bridge,
            query_window: 2,
            top_k: 5,
            timeout: Duration::from_secs(5),
            shared_memory: false,
        }
    }

    pub fn from_config(
        config: &EngramConfig,
        backend: Option<Arc<dyn MemoryBackend>>,
        bridge: Arc<ExecutionBridge>,
    ) -> Self {
        Self::new(backend, bridge)
            .with_query_window(config.retrieval.query_window)
            .with_top_k(config.retrieval.top_k)
            .with_timeout(Duration::from_millis(config.bridge.query_timeout_ms))
            .with_shared_memory(config.retrieval.shared_memory)
    }

    pub fn with_query_window(mut self, turns: usize) -> Self {
        self.query_window = turns.max(1);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_shared_memory(mut self, shared: bool) -> Self {
        self.shared_memory = shared;
        self
    }

    pub fn backend(&self) -> Option<&Arc<dyn MemoryBackend>> {
        self.backend.as_ref()
    }

    pub fn query_window(&self) -> usize {
        self.query_window
    }

    /// Retrieves memories for the configured window of `state`.
    pub fn retrieve(&self, state: &ConversationState) -> RetrievalResult {
        self.retrieve_window(state, self.query_window)
    }

    /// Retrieves memories for the last `window` turns of `state`.
    pub fn retrieve_window(&self, state: &ConversationState, window: usize) -> RetrievalResult {
        let version = state.checkpoint_version();
        let Some(backend) = self.backend.as_ref() else {
            return RetrievalResult::empty(NO_BACKEND).with_checkpoint(version);
        };
        let name = backend.name().to_string();
        let thread_id = state.thread_id().clone();
        let context = state.window(window).to_vec();
        if context.is_empty() || self.top_k == 0 {
            return RetrievalResult::empty(name).with_checkpoint(version);
        }

        let started = Instant::now();
        let task_backend = Arc::clone(backend);
        let task_thread = thread_id.clone();
        let top_k = self.top_k;
        let outcome = self.bridge.query(
            &thread_id,
            async move { task_backend.query(&task_thread, &context, top_k).await },
            self.timeout,
        );

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                let elapsed = started.elapsed();
                warn!(
                    thread_id = %thread_id,
                    backend = %name,
                    error = %e,
                    "retrieval degraded"
                );
                record_degraded_retrieval(&name);
                return RetrievalResult::degraded(name, elapsed).with_checkpoint(version);
            }
        };

        let latency = result.backend_latency;
        let result = if self.shared_memory {
            result
        } else {
            let total = result.len();
            let backend_name = result.backend.clone();
            let degraded = result.degraded;
            let kept: Vec<_> = result
                .into_scored()
                .into_iter()
                .filter(|(record, _)| record.thread_id == thread_id)
                .collect();
            if kept.len() < total {
                warn!(
                    thread_id = %thread_id,
                    backend = %name,
                    dropped = total - kept.len(),
                    "dropped records from other threads"
                );
            }
            let mut filtered = RetrievalResult::from_scored(backend_name, kept, latency);
            filtered.degraded = degraded;
            filtered
        };

        record_retrieval_latency(&name, latency.as_secs_f64());
        debug!(
            thread_id = %thread_id,
            backend = %name,
            records = result.len(),
            latency_ms = latency.as_millis() as u64,
            "retrieval complete"
        );
        result.with_checkpoint(version)
    }
}
