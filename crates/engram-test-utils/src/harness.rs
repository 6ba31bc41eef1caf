// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles a complete [`MemoryAgent`] with a mock provider,
//! its own execution bridge and one of: no memory, a [`MockBackend`], a
//! graph backend over an [`InMemoryGraph`], or a real SQLite vector store in
//! a temp directory. The harness drives the agent synchronously, so tests
//! using it are plain `#[test]` functions, never `#[tokio::test]`.

use std::sync::Arc;

use engram_agent::{MemoryAgent, TurnOutcome};
use engram_bridge::ExecutionBridge;
use engram_config::{AgentVariant, EngramConfig};
use engram_core::{Clearable, EngramError, MemoryBackend, ProviderMessage, ThreadId};
use engram_memory::GraphMemory;

use crate::hashing_embedder::{HashingEmbedder, KeywordReranker};
use crate::in_memory_graph::InMemoryGraph;
use crate::mock_backend::MockBackend;
use crate::mock_provider::MockProvider;

enum Memory {
    None,
    Mock(Arc<MockBackend>),
    Graph(Arc<InMemoryGraph>),
    SqliteVector,
}

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    config: EngramConfig,
    responses: Vec<String>,
    memory: Memory,
    bridge: Option<Arc<ExecutionBridge>>,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        let mut config = EngramConfig::default();
        config.agent.system_prompt = Some("You are a test assistant.".to_string());
        Self {
            config,
            responses: Vec::new(),
            memory: Memory::None,
            bridge: None,
        }
    }

    /// Set mock provider responses.
    pub fn with_mock_responses(mut self, responses: Vec<String>) -> Self {
        self.responses = responses;
        self
    }

    /// Replace the configuration. The memory choice still decides the variant.
    pub fn with_config(mut self, config: EngramConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.agent.system_prompt = Some(prompt.into());
        self
    }

    /// Use a shared bridge instead of creating one.
    pub fn with_bridge(mut self, bridge: Arc<ExecutionBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn with_mock_backend(mut self, backend: Arc<MockBackend>) -> Self {
        self.memory = Memory::Mock(backend);
        self
    }

    pub fn with_graph(mut self, graph: Arc<InMemoryGraph>) -> Self {
        self.memory = Memory::Graph(graph);
        self
    }

    /// Persistent vector memory in a temp directory, with the hashing embedder
    /// and keyword reranker standing in for the ONNX models.
    pub fn with_sqlite_vector(mut self) -> Self {
        self.memory = Memory::SqliteVector;
        self
    }

    /// Build the test harness, creating all required subsystems.
    pub fn build(self) -> Result<TestHarness, EngramError> {
        let mut config = self.config;
        config.agent.variant = match self.memory {
            Memory::None => AgentVariant::Baseline,
            Memory::Mock(_) | Memory::SqliteVector => AgentVariant::Vdb,
            Memory::Graph(_) => AgentVariant::Graph,
        };
        let provider = Arc::new(if self.responses.is_empty() {
            MockProvider::new()
        } else {
            MockProvider::with_responses(self.responses)
        });
        let bridge = match self.bridge {
            Some(bridge) => bridge,
            None => Arc::new(ExecutionBridge::new(config.bridge.worker_threads)?),
        };

        let mut temp_dir = None;
        let backend: Option<Arc<dyn MemoryBackend>> = match self.memory {
            Memory::None => None,
            Memory::Mock(backend) => Some(backend as Arc<dyn MemoryBackend>),
            Memory::Graph(graph) => {
                let memory = GraphMemory::new(graph, config.retrieval.shared_memory)
                    .with_limits(config.graph.max_facts, config.graph.max_nodes);
                Some(Arc::new(memory) as Arc<dyn MemoryBackend>)
            }
            Memory::SqliteVector => {
                let dir = tempfile::TempDir::new()
                    .map_err(|e| EngramError::Storage { source: e.into() })?;
                config.vector.database_path =
                    dir.path().join("memory.db").to_string_lossy().into_owned();
                temp_dir = Some(dir);
                None
            }
        };

        let mut builder = MemoryAgent::builder()
            .config(config)
            .provider(provider.clone())
            .bridge(Arc::clone(&bridge))
            .embedder(Arc::new(HashingEmbedder::default()))
            .reranker(Arc::new(KeywordReranker));
        if let Some(backend) = backend {
            builder = builder.backend(backend);
        }
        let agent = builder.build()?;

        Ok(TestHarness {
            agent,
            provider,
            bridge,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete agent environment for integration tests.
pub struct TestHarness {
    agent: MemoryAgent,
    provider: Arc<MockProvider>,
    bridge: Arc<ExecutionBridge>,
    _temp_dir: Option<tempfile::TempDir>,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Runs one user turn on `thread`.
    pub fn send(&mut self, thread: &str, text: &str) -> Result<TurnOutcome, EngramError> {
        self.agent
            .run_turn(&ThreadId::new(thread), ProviderMessage::user(text))
    }

    pub fn clear(&mut self, thread: &str) -> Result<(), EngramError> {
        self.agent.clear(&ThreadId::new(thread))
    }

    pub fn agent(&self) -> &MemoryAgent {
        &self.agent
    }

    pub fn agent_mut(&mut self) -> &mut MemoryAgent {
        &mut self.agent
    }

    pub fn provider(&self) -> &Arc<MockProvider> {
        &self.provider
    }

    pub fn bridge(&self) -> &Arc<ExecutionBridge> {
        &self.bridge
    }
}
