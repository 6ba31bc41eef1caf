// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Second-stage relevance scoring for retrieved candidates.

use async_trait::async_trait;

use crate::error::EngramError;

/// Scores how well each document answers a query.
///
/// Used after a cheap first-stage search has over-fetched candidates.
#[async_trait]
pub trait Reranker: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// One score per document, in input order. Higher is more relevant.
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, EngramError>;
}
