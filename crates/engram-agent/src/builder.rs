// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Assembles a [`MemoryAgent`] from configuration.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use engram_bridge::ExecutionBridge;
use engram_config::{AgentVariant, EngramConfig};
use engram_context::{AugmentationMiddleware, RetrievalMiddleware};
use engram_core::{
    CompletionProvider, ConversationStateManager, EmbeddingAdapter, EngramError, MemoryBackend,
    Reranker,
};
use engram_memory::{ConnectionPool, GraphMemory, HybridMemory, ModelOverrides, VectorMemory};

use crate::agent::{MemoryAgent, Timeouts};
use crate::prompt::default_prompt;

/// Builder for [`MemoryAgent`].
///
/// Only the completion provider is required. The bridge and pool are created
/// from the configuration when not supplied; pass shared ones to let several
/// agents reuse the same runtime and backend connections.
#[derive(Default)]
pub struct MemoryAgentBuilder {
    config: EngramConfig,
    provider: Option<Arc<dyn CompletionProvider>>,
    bridge: Option<Arc<ExecutionBridge>>,
    pool: Option<Arc<ConnectionPool>>,
    backend: Option<Arc<dyn MemoryBackend>>,
    models: ModelOverrides,
}

impl MemoryAgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngramConfig) -> Self {
        self.config = config;
        self
    }

    pub fn variant(mut self, variant: AgentVariant) -> Self {
        self.config.agent.variant = variant;
        self
    }

    pub fn provider(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn bridge(mut self, bridge: Arc<ExecutionBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn pool(mut self, pool: Arc<ConnectionPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Embeds with `embedder` instead of the configured model.
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingAdapter>) -> Self {
        self.models.embedder = Some(embedder);
        self
    }

    /// Reranks with `reranker` instead of the bundled cross-encoder.
    ///
    /// Only used when `vector.rerank` is on.
    pub fn reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.models.reranker = Some(reranker);
        self
    }

    /// Uses `backend` instead of the adapters the variant would create.
    pub fn backend(mut self, backend: Arc<dyn MemoryBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn build(self) -> Result<MemoryAgent, EngramError> {
        let config = self.config;
        let provider = self.provider.ok_or_else(|| {
            EngramError::Config("a completion provider is required to build an agent".into())
        })?;
        let bridge = match self.bridge {
            Some(bridge) => bridge,
            None => Arc::new(ExecutionBridge::new(config.bridge.worker_threads)?),
        };

        let backend = match self.backend {
            Some(backend) => Some(backend),
            None => {
                let pool = match self.pool {
                    Some(pool) => pool,
                    None => Arc::new(ConnectionPool::from_config(&config)?),
                };
                create_backend(&config, &bridge, pool, self.models)?
            }
        };

        let timeouts = Timeouts {
            query: Duration::from_millis(config.bridge.query_timeout_ms),
            write: Duration::from_millis(config.bridge.write_timeout_ms),
            clear: Duration::from_millis(config.bridge.clear_timeout_ms),
            completion: Duration::from_millis(config.bridge.completion_timeout_ms),
        };
        let system_prompt = config
            .agent
            .system_prompt
            .clone()
            .unwrap_or_else(|| default_prompt(config.agent.variant));

        info!(
            agent = %config.agent.name,
            variant = %config.agent.variant,
            backend = backend.as_ref().map(|b| b.name()).unwrap_or("none"),
            provider = provider.name(),
            "memory agent ready"
        );

        Ok(MemoryAgent {
            name: config.agent.name.clone(),
            variant: config.agent.variant,
            system_prompt,
            state: ConversationStateManager::new(config.state.allow_out_of_order),
            retrieval: RetrievalMiddleware::from_config(&config, backend.clone(), Arc::clone(&bridge)),
            augmentation: AugmentationMiddleware::from_config(&config),
            backend,
            provider,
            bridge,
            timeouts,
        })
    }
}

/// Creates the backend adapters for the configured variant.
fn create_backend(
    config: &EngramConfig,
    bridge: &ExecutionBridge,
    pool: Arc<ConnectionPool>,
    models: ModelOverrides,
) -> Result<Option<Arc<dyn MemoryBackend>>, EngramError> {
    let variant = config.agent.variant;
    if variant == AgentVariant::Baseline {
        return Ok(None);
    }

    let vector: Option<Arc<dyn MemoryBackend>> = if variant.uses_vector() {
        let task_config = config.clone();
        let task_pool = Arc::clone(&pool);
        let memory = bridge.run(
            "connect",
            async move { VectorMemory::from_config(&task_config, &task_pool, models).await },
            Duration::from_millis(config.bridge.connect_timeout_ms),
        )?;
        Some(Arc::new(memory) as Arc<dyn MemoryBackend>)
    } else {
        None
    };

    let graph: Option<Arc<dyn MemoryBackend>> = if variant.uses_graph() {
        Some(Arc::new(GraphMemory::from_config(config, &pool)?) as Arc<dyn MemoryBackend>)
    } else {
        None
    };

    let backend: Option<Arc<dyn MemoryBackend>> = match (vector, graph) {
        (Some(vector), Some(graph)) => {
            Some(Arc::new(HybridMemory::new(vector, graph)) as Arc<dyn MemoryBackend>)
        }
        (Some(single), None) | (None, Some(single)) => Some(single),
        (None, None) => None,
    };
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_test_utils::{HashingEmbedder, KeywordReranker, MockProvider};

    fn config_in(dir: &tempfile::TempDir, variant: AgentVariant) -> EngramConfig {
        let mut config = EngramConfig::default();
        config.agent.variant = variant;
        config.vector.database_path = dir.path().join("memory.db").to_string_lossy().into_owned();
        config
    }

    fn builder_in(dir: &tempfile::TempDir, variant: AgentVariant) -> MemoryAgentBuilder {
        MemoryAgentBuilder::new()
            .config(config_in(dir, variant))
            .provider(Arc::new(MockProvider::new()))
            .embedder(Arc::new(HashingEmbedder::default()))
            .reranker(Arc::new(KeywordReranker))
    }

    #[test]
    fn vdb_variant_wires_vector_memory_and_its_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let agent = builder_in(&dir, AgentVariant::Vdb)
            .build()
            .unwrap();
        assert_eq!(agent.backend().map(|b| b.name()), Some("vector"));
        assert_eq!(agent.system_prompt(), default_prompt(AgentVariant::Vdb));
        assert!(dir.path().join("memory.db").exists());
    }

    #[test]
    fn hybrid_variant_wires_both_backends() {
        let dir = tempfile::tempdir().unwrap();
        let agent = builder_in(&dir, AgentVariant::Hybrid)
            .build()
            .unwrap();
        assert_eq!(agent.backend().map(|b| b.name()), Some("hybrid"));
    }

    #[test]
    fn baseline_has_no_backend_and_configured_prompt_wins() {
        let mut config = EngramConfig::default();
        config.agent.variant = AgentVariant::Baseline;
        config.agent.system_prompt = Some("custom".into());
        let agent = MemoryAgentBuilder::new()
            .config(config)
            .provider(Arc::new(MockProvider::new()))
            .build()
            .unwrap();
        assert!(agent.backend().is_none());
        assert_eq!(agent.system_prompt(), "custom");
        assert_eq!(agent.variant(), AgentVariant::Baseline);
    }

    #[test]
    fn injected_models_skip_the_download() {
        let dir = tempfile::tempdir().unwrap();
        let mut agent = builder_in(&dir, AgentVariant::Vdb).build().unwrap();
        agent
            .replay(
                &"t1".into(),
                &[engram_core::ProviderMessage::user("my sister lives in Porto")],
            )
            .unwrap();
        let hits = agent.search(&"t1".into(), "where does my sister live", 3).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(!dir.path().join("models").exists());
    }

    #[test]
    fn build_requires_a_provider() {
        let err = MemoryAgentBuilder::new()
            .variant(AgentVariant::Baseline)
            .build()
            .err()
            .expect("missing provider should fail");
        assert!(matches!(err, EngramError::Config(_)));
    }
}
