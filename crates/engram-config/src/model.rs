// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Engram memory middleware.
//!
//! All structs use `#[serde(deny_unknown_fields)]` so a misspelled key fails
//! at startup with a suggestion instead of being silently ignored.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Top-level Engram configuration. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngramConfig {
    /// Agent identity, variant selection, and model settings.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Conversation state manager settings.
    #[serde(default)]
    pub state: StateConfig,

    /// Retrieval middleware settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Augmentation middleware settings.
    #[serde(default)]
    pub augmentation: AugmentationConfig,

    /// Synchronous execution bridge settings.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Vector-search backend settings.
    #[serde(default)]
    pub vector: VectorConfig,

    /// Knowledge-graph backend settings.
    #[serde(default)]
    pub graph: GraphConfig,
}

/// Which memory backends an agent is wired to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Deserialize, Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AgentVariant {
    /// No memory backend; history only.
    Baseline,
    /// Vector-search backend.
    #[default]
    Vdb,
    /// Knowledge-graph backend.
    Graph,
    /// Both backends, results fused.
    Hybrid,
}

impl AgentVariant {
    pub fn uses_vector(self) -> bool {
        matches!(self, AgentVariant::Vdb | AgentVariant::Hybrid)
    }

    pub fn uses_graph(self) -> bool {
        matches!(self, AgentVariant::Graph | AgentVariant::Hybrid)
    }
}

/// Agent identity and behavior configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Display name of the agent, used in logs.
    #[serde(default = "default_agent_name")]
    pub name: String,

    #[serde(default)]
    pub variant: AgentVariant,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Overrides the variant's built-in system prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Model identifier passed through to the completion provider.
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            variant: AgentVariant::default(),
            log_level: default_log_level(),
            system_prompt: None,
            model: default_model(),
        }
    }
}

fn default_agent_name() -> String {
    "engram".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Conversation state configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    /// Accept turns older than the last one (batch replay of haystacks).
    #[serde(default)]
    pub allow_out_of_order: bool,
}

/// Retrieval middleware configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetrievalConfig {
    /// Number of trailing turns used as the query.
    #[serde(default = "default_query_window")]
    pub query_window: usize,

    /// Maximum records requested from the backend.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Share one `global` namespace across all threads.
    #[serde(default)]
    pub shared_memory: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            query_window: default_query_window(),
            top_k: default_top_k(),
            shared_memory: false,
        }
    }
}

fn default_query_window() -> usize {
    2
}

fn default_top_k() -> usize {
    5
}

/// Augmentation middleware configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AugmentationConfig {
    /// Estimated-token budget for the injected memory block.
    #[serde(default = "default_budget_tokens")]
    pub budget_tokens: usize,

    /// Maximum number of memories injected per turn.
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            budget_tokens: default_budget_tokens(),
            max_records: default_max_records(),
        }
    }
}

fn default_budget_tokens() -> usize {
    1000
}

fn default_max_records() -> usize {
    5
}

/// Execution bridge configuration. Timeouts are in milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    #[serde(default = "default_clear_timeout_ms")]
    pub clear_timeout_ms: u64,

    #[serde(default = "default_completion_timeout_ms")]
    pub completion_timeout_ms: u64,

    /// Bound on opening backends at startup, including first-run model downloads.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            query_timeout_ms: default_query_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            clear_timeout_ms: default_clear_timeout_ms(),
            completion_timeout_ms: default_completion_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

fn default_worker_threads() -> usize {
    2
}

fn default_query_timeout_ms() -> u64 {
    5_000
}

fn default_write_timeout_ms() -> u64 {
    10_000
}

fn default_clear_timeout_ms() -> u64 {
    30_000
}

fn default_completion_timeout_ms() -> u64 {
    60_000
}

fn default_connect_timeout_ms() -> u64 {
    300_000
}

/// Embedding implementation used by the vector backend.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Deserialize, Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingKind {
    /// Local all-MiniLM-L6-v2 through ONNX Runtime, 384 dimensions.
    #[default]
    Onnx,
    /// OpenAI-compatible `/embeddings` endpoint.
    OpenAi,
}

/// Vector-search backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VectorConfig {
    /// Path to the SQLite file holding the persistent collection.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default)]
    pub embedding: EmbeddingKind,

    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,

    /// Base URL of the embeddings API (without `/embeddings`).
    #[serde(default = "default_embedding_endpoint")]
    pub embedding_endpoint: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// API key for the embeddings endpoint. `None` falls back to `OPENAI_API_KEY`.
    #[serde(default)]
    pub embedding_api_key: Option<String>,

    /// Records below this cosine similarity are not returned.
    #[serde(default)]
    pub min_similarity: f64,

    /// Directory caching downloaded ONNX models. `None` uses the data directory.
    #[serde(default)]
    pub model_dir: Option<String>,

    /// Rescore similarity hits with a cross-encoder before keeping `top_k`.
    #[serde(default = "default_rerank")]
    pub rerank: bool,

    /// Similarity hits fetched for the reranker to choose from.
    #[serde(default = "default_rerank_candidates")]
    pub rerank_candidates: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            embedding: EmbeddingKind::default(),
            embedding_dimensions: default_embedding_dimensions(),
            embedding_endpoint: default_embedding_endpoint(),
            embedding_model: default_embedding_model(),
            embedding_api_key: None,
            min_similarity: 0.0,
            model_dir: None,
            rerank: default_rerank(),
            rerank_candidates: default_rerank_candidates(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("engram").join("memory.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("engram-memory.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_embedding_dimensions() -> usize {
    384
}

fn default_rerank() -> bool {
    true
}

fn default_rerank_candidates() -> usize {
    20
}

fn default_embedding_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

/// Knowledge-graph backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GraphConfig {
    /// Streamable-HTTP endpoint of the Graphiti MCP server.
    #[serde(default = "default_mcp_url")]
    pub mcp_url: String,

    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,

    #[serde(default = "default_max_facts")]
    pub max_facts: usize,

    /// Weight of service relevance against recency when ranking (0.0-1.0).
    #[serde(default = "default_relevance_weight")]
    pub relevance_weight: f64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            mcp_url: default_mcp_url(),
            max_nodes: default_max_nodes(),
            max_facts: default_max_facts(),
            relevance_weight: default_relevance_weight(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_mcp_url() -> String {
    "http://localhost:8000/mcp".to_string()
}

fn default_max_nodes() -> usize {
    10
}

fn default_max_facts() -> usize {
    10
}

fn default_relevance_weight() -> f64 {
    0.7
}

fn default_request_timeout_ms() -> u64 {
    10_000
}
