// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait definitions at the seams of the memory pipeline.
//!
//! Backend adapters extend the [`MemoryAdapter`] base trait and use
//! `#[async_trait]` so they can be held as `Arc<dyn MemoryBackend>`.

pub mod adapter;
pub mod backend;
pub mod clearable;
pub mod embedding;
pub mod provider;
pub mod rerank;

pub use adapter::MemoryAdapter;
pub use backend::MemoryBackend;
pub use clearable::{Clearable, reset_all};
pub use embedding::EmbeddingAdapter;
pub use provider::CompletionProvider;
pub use rerank::Reranker;
