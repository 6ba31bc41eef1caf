// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Memory backends for the Engram middleware.
//!
//! Three adapters implement [`engram_core::MemoryBackend`]:
//! - [`VectorMemory`]: embeds turns and ranks them by cosine similarity over
//!   a persistent SQLite collection.
//! - [`GraphMemory`]: writes turns as episodes into a temporal knowledge
//!   graph reached through a Graphiti MCP server, and reads back facts and
//!   entity summaries.
//! - [`HybridMemory`]: queries both and fuses the rankings with Reciprocal
//!   Rank Fusion.
//!
//! The vector backend embeds locally with an ONNX MiniLM model by default
//! and reranks its candidates with an ONNX cross-encoder; [`ModelManager`]
//! fetches both on first use. Shared network and storage resources live in
//! the [`ConnectionPool`].

pub mod embedder;
pub mod graph;
pub mod hybrid;
pub mod mcp;
pub mod model_manager;
mod onnx;
pub mod pool;
pub mod rerank;
pub mod retry;
pub mod store;
pub mod types;
pub mod vector;

pub use embedder::{EMBEDDING_DIM, OnnxEmbedder, OpenAiEmbedder};
pub use graph::GraphMemory;
pub use hybrid::HybridMemory;
pub use mcp::{GraphClient, McpGraphClient};
pub use model_manager::{EMBEDDING_MODEL, ModelManager, ModelSpec, RERANK_MODEL};
pub use pool::ConnectionPool;
pub use rerank::OnnxReranker;
pub use store::{SqliteVectorStore, VectorStore};
pub use vector::{ModelOverrides, VectorMemory};
