// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding adapter trait for vector embedding generation.

use async_trait::async_trait;

use crate::error::EngramError;
use crate::types::{EmbeddingInput, EmbeddingOutput};

/// Converts text into fixed-width vectors for similarity search.
#[async_trait]
pub trait EmbeddingAdapter: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Width of every vector this adapter produces.
    fn dimensions(&self) -> usize;

    /// Generates one embedding per input text, in input order.
    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, EngramError>;
}
