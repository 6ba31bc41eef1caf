// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The memory-augmented turn pipeline.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use engram_bridge::ExecutionBridge;
use engram_config::AgentVariant;
use engram_context::{AugmentationMiddleware, RetrievalMiddleware};
use engram_core::{
    AgentContext, Clearable, CompletionProvider, ConversationState, ConversationStateManager,
    EngramError, HealthStatus, MemoryBackend, ProviderMessage, RetrievalResult, Role, ThreadId,
    Turn, from_turn, to_turn_at,
};

use crate::builder::MemoryAgentBuilder;

/// Retrieval metadata exposed to the benchmark harness.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalReport {
    pub degraded: bool,
    pub backend_latency: Duration,
    /// Number of records the backend returned.
    pub records: usize,
    pub backend: String,
}

impl From<&RetrievalResult> for RetrievalReport {
    fn from(result: &RetrievalResult) -> Self {
        Self {
            degraded: result.degraded,
            backend_latency: result.backend_latency,
            records: result.len(),
            backend: result.backend.clone(),
        }
    }
}

/// Result of one [`MemoryAgent::run_turn`].
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub response: ProviderMessage,
    pub retrieval: RetrievalReport,
    /// State version after the response was appended.
    pub checkpoint_version: u64,
}

/// Bridge bounds for the operations the agent runs.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Timeouts {
    pub(crate) query: Duration,
    pub(crate) write: Duration,
    pub(crate) clear: Duration,
    pub(crate) completion: Duration,
}

/// A conversational agent with pluggable memory.
///
/// Agents serving different conversations may share one bridge and one set
/// of backends while each owns its own state manager.
pub struct MemoryAgent {
    pub(crate) name: String,
    pub(crate) variant: AgentVariant,
    pub(crate) system_prompt: String,
    pub(crate) state: ConversationStateManager,
    pub(crate) backend: Option<Arc<dyn MemoryBackend>>,
    pub(crate) retrieval: RetrievalMiddleware,
    pub(crate) augmentation: AugmentationMiddleware,
    pub(crate) provider: Arc<dyn CompletionProvider>,
    pub(crate) bridge: Arc<ExecutionBridge>,
    pub(crate) timeouts: Timeouts,
}

impl MemoryAgent {
    pub fn builder() -> MemoryAgentBuilder {
        MemoryAgentBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variant(&self) -> AgentVariant {
        self.variant
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn backend(&self) -> Option<&Arc<dyn MemoryBackend>> {
        self.backend.as_ref()
    }

    pub fn bridge(&self) -> &Arc<ExecutionBridge> {
        &self.bridge
    }

    pub fn state_manager(&self) -> &ConversationStateManager {
        &self.state
    }

    pub fn state_manager_mut(&mut self) -> &mut ConversationStateManager {
        &mut self.state
    }

    /// Snapshot of the thread's conversation state.
    pub fn state(&self, thread_id: &ThreadId) -> ConversationState {
        self.state.state(thread_id)
    }

    /// Timestamp for a live turn: now, but never before the thread's last turn.
    fn live_timestamp(&self, thread_id: &ThreadId) -> DateTime<Utc> {
        let now = Utc::now();
        self.state
            .state(thread_id)
            .last_turn()
            .map(|t| t.timestamp.max(now))
            .unwrap_or(now)
    }

    /// Runs one full turn for `message` on `thread_id`.
    ///
    /// Retrieval failures degrade silently; normalization, state, completion
    /// and write failures are returned.
    pub fn run_turn(
        &mut self,
        thread_id: &ThreadId,
        message: ProviderMessage,
    ) -> Result<TurnOutcome, EngramError> {
        let ts = self.live_timestamp(thread_id);
        let user_turn = to_turn_at(thread_id, &message, ts)?;
        let user_turn = self.state.append_turn(thread_id, user_turn)?;

        let snapshot = self.state.state(thread_id);
        let retrieval = self.retrieval.retrieve(&snapshot);
        let report = RetrievalReport::from(&retrieval);

        let base = AgentContext {
            system_prompt: Some(self.system_prompt.clone()),
            messages: snapshot
                .history()
                .iter()
                .map(from_turn)
                .collect::<Result<Vec<_>, _>>()?,
            checkpoint_version: snapshot.checkpoint_version(),
        };
        let context = self.augmentation.augment(base, &retrieval);

        let provider = Arc::clone(&self.provider);
        let response = self.bridge.run(
            "completion",
            async move { provider.complete(context).await },
            self.timeouts.completion,
        )?;

        let ts = self.live_timestamp(thread_id);
        let mut response_turn = to_turn_at(thread_id, &response, ts)?;
        if response_turn.role != Role::Assistant {
            warn!(thread_id = %thread_id, role = %response_turn.role, "provider reply normalized to assistant role");
            response_turn.role = Role::Assistant;
        }
        let response_turn = self.state.append_turn(thread_id, response_turn)?;

        self.persist(thread_id, &user_turn)?;
        self.persist(thread_id, &response_turn)?;

        let checkpoint_version = self.state.checkpoint_version(thread_id);
        debug!(
            thread_id = %thread_id,
            agent = %self.name,
            degraded = report.degraded,
            records = report.records,
            checkpoint_version,
            "turn complete"
        );
        Ok(TurnOutcome {
            response: from_turn(&response_turn)?,
            retrieval: report,
            checkpoint_version,
        })
    }

    /// Ingests a prior conversation without calling the model.
    ///
    /// Each message is stamped now (clamped to the previous turn), appended and
    /// persisted. Returns the final checkpoint version.
    pub fn replay(
        &mut self,
        thread_id: &ThreadId,
        messages: &[ProviderMessage],
    ) -> Result<u64, EngramError> {
        for message in messages {
            let ts = self.live_timestamp(thread_id);
            let turn = to_turn_at(thread_id, message, ts)?;
            self.ingest(thread_id, turn)?;
        }
        info!(thread_id = %thread_id, messages = messages.len(), "conversation replayed");
        Ok(self.state.checkpoint_version(thread_id))
    }

    /// Appends and persists an already normalized turn, keeping its timestamp.
    ///
    /// Honours `state.allow_out_of_order` for historical data.
    pub fn ingest(&mut self, thread_id: &ThreadId, turn: Turn) -> Result<Turn, EngramError> {
        let stamped = self.state.append_turn(thread_id, turn)?;
        self.persist(thread_id, &stamped)?;
        Ok(stamped)
    }

    /// Writes a stamped turn to the backend through the bridge.
    ///
    /// A write that outlives its timeout keeps running and holding the
    /// thread's write slot, so it is logged rather than failed. If it later
    /// fails, the next write on the thread returns that failure.
    fn persist(&self, thread_id: &ThreadId, turn: &Turn) -> Result<(), EngramError> {
        let Some(backend) = self.backend.as_ref() else {
            return Ok(());
        };
        let backend = Arc::clone(backend);
        let task_thread = thread_id.clone();
        let task_turn = turn.clone();
        let outcome = self.bridge.write(
            thread_id,
            async move { backend.write(&task_thread, &task_turn).await },
            self.timeouts.write,
        );
        match outcome {
            Ok(()) => Ok(()),
            Err(EngramError::BridgeTimeout { duration, .. }) => {
                warn!(
                    thread_id = %thread_id,
                    seq = turn.seq,
                    timeout_ms = duration.as_millis() as u64,
                    "memory write still running after timeout"
                );
                Ok(())
            }
            Err(e) => {
                error!(thread_id = %thread_id, seq = turn.seq, error = %e, "memory write failed");
                Err(e)
            }
        }
    }

    /// Manual memory search for statistics and debugging.
    ///
    /// Unlike retrieval during a turn, failures are returned.
    pub fn search(
        &self,
        thread_id: &ThreadId,
        text: &str,
        limit: usize,
    ) -> Result<RetrievalResult, EngramError> {
        let Some(backend) = self.backend.as_ref() else {
            return Ok(RetrievalResult::empty("none"));
        };
        let backend = Arc::clone(backend);
        let task_thread = thread_id.clone();
        let probe = Turn::new(thread_id.clone(), Role::User, text, Utc::now());
        self.bridge.query(
            thread_id,
            async move { backend.query(&task_thread, &[probe], limit).await },
            self.timeouts.query,
        )
    }

    /// Number of backend records scoped to the thread; 0 without a backend.
    pub fn memory_count(&self, thread_id: &ThreadId) -> Result<usize, EngramError> {
        let Some(backend) = self.backend.as_ref() else {
            return Ok(0);
        };
        let backend = Arc::clone(backend);
        let task_thread = thread_id.clone();
        self.bridge.query(
            thread_id,
            async move { backend.count(&task_thread).await },
            self.timeouts.query,
        )
    }

    pub fn health(&self) -> Result<HealthStatus, EngramError> {
        let Some(backend) = self.backend.as_ref() else {
            return Ok(HealthStatus::Healthy);
        };
        let backend = Arc::clone(backend);
        self.bridge.run(
            "health",
            async move { backend.health_check().await },
            self.timeouts.query,
        )
    }

    /// Shuts the backend adapter down. The bridge is shared and left running.
    pub fn shutdown(&self) -> Result<(), EngramError> {
        let Some(backend) = self.backend.as_ref() else {
            return Ok(());
        };
        let backend = Arc::clone(backend);
        self.bridge.run(
            "shutdown",
            async move { backend.shutdown().await },
            self.timeouts.clear,
        )
    }
}

impl Clearable for MemoryAgent {
    /// Purges backend records, then the conversation state.
    ///
    /// If the backend cannot confirm, the state keeps its history and its
    /// pending-clear flag and the error is returned.
    fn clear(&mut self, thread_id: &ThreadId) -> Result<(), EngramError> {
        self.state.begin_clear(thread_id);

        if let Some(backend) = self.backend.as_ref() {
            let name = backend.name().to_string();
            let backend = Arc::clone(backend);
            let task_thread = thread_id.clone();
            let outcome = self.bridge.clear(
                thread_id,
                async move { backend.clear(&task_thread).await },
                self.timeouts.clear,
            );
            if let Err(e) = outcome {
                error!(thread_id = %thread_id, backend = %name, error = %e, "memory clear failed");
                return Err(match e {
                    EngramError::ClearNotConfirmed { .. } => e,
                    other => EngramError::ClearNotConfirmed {
                        backend: name,
                        thread_id: thread_id.to_string(),
                        reason: other.to_string(),
                    },
                });
            }
        }

        let version = self.state.clear(thread_id);
        info!(thread_id = %thread_id, agent = %self.name, version, "thread cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_config::EngramConfig;
    use engram_core::message_text;
    use engram_test_utils::{MockBackend, MockProvider};
    use tracing_test::traced_test;

    fn agent_with(backend: Arc<MockBackend>, config: EngramConfig) -> MemoryAgent {
        MemoryAgent::builder()
            .config(config)
            .provider(Arc::new(MockProvider::new()))
            .backend(backend)
            .build()
            .unwrap()
    }

    #[traced_test]
    #[test]
    fn write_timeout_is_logged_not_returned() {
        let backend = Arc::new(MockBackend::new());
        backend.set_write_delay(Some(Duration::from_millis(150)));
        let mut config = EngramConfig::default();
        config.bridge.write_timeout_ms = 10;
        let mut agent = agent_with(Arc::clone(&backend), config);

        let outcome = agent
            .run_turn(&ThreadId::new("t1"), ProviderMessage::user("hello there"))
            .unwrap();
        assert_eq!(message_text(&outcome.response), "mock response");
        assert!(logs_contain("memory write still running after timeout"));
    }

    #[test]
    fn response_is_appended_as_assistant_turn() {
        let provider = Arc::new(MockProvider::new());
        let mut agent = MemoryAgent::builder()
            .variant(AgentVariant::Baseline)
            .provider(provider)
            .build()
            .unwrap();
        let thread = ThreadId::new("t1");
        agent.run_turn(&thread, ProviderMessage::user("hi")).unwrap();
        let history = agent.state(&thread);
        assert_eq!(history.history()[1].role, Role::Assistant);
    }

    #[test]
    fn search_without_backend_is_empty() {
        let agent = MemoryAgent::builder()
            .variant(AgentVariant::Baseline)
            .provider(Arc::new(MockProvider::new()))
            .build()
            .unwrap();
        let result = agent.search(&ThreadId::new("t1"), "anything", 3).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.backend, "none");
        assert_eq!(agent.memory_count(&ThreadId::new("t1")).unwrap(), 0);
    }

    #[test]
    fn failed_clear_keeps_pending_flag() {
        let backend = Arc::new(MockBackend::new());
        let mut agent = agent_with(Arc::clone(&backend), EngramConfig::default());
        let thread = ThreadId::new("t1");
        agent.run_turn(&thread, ProviderMessage::user("hi")).unwrap();

        backend.set_unavailable(true);
        let err = agent.clear(&thread).unwrap_err();
        assert!(matches!(err, EngramError::ClearNotConfirmed { .. }));
        assert!(agent.state(&thread).pending_clear());

        backend.set_unavailable(false);
        agent.clear(&thread).unwrap();
        assert!(agent.state(&thread).is_empty());
        assert!(!agent.state(&thread).pending_clear());
    }
}
