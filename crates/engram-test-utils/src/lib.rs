// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Engram integration tests.
//!
//! Provides mock adapters and test harness infrastructure for fast,
//! deterministic, CI-runnable tests without external services.
//!
//! # Components
//!
//! - [`MockProvider`] - Completion provider with queued responses that records every context
//! - [`MockBackend`] - In-memory memory backend with scriptable failures
//! - [`InMemoryGraph`] - Knowledge-graph service double for [`engram_memory::GraphMemory`]
//! - [`HashingEmbedder`] and [`KeywordReranker`] - Model-free stand-ins for the ONNX models
//! - [`TestHarness`] - A complete agent wired to the mocks

pub mod harness;
pub mod hashing_embedder;
pub mod in_memory_graph;
pub mod mock_backend;
pub mod mock_provider;

pub use harness::{TestHarness, TestHarnessBuilder};
pub use hashing_embedder::{HashingEmbedder, KeywordReranker};
pub use in_memory_graph::InMemoryGraph;
pub use mock_backend::MockBackend;
pub use mock_provider::MockProvider;

/// Lowercase words of at least three characters, minus a few stop words.
pub(crate) fn keywords(text: &str) -> Vec<String> {
    const STOP_WORDS: &[&str] = &[
        "the", "and", "what", "you", "your", "for", "are", "with", "that", "this", "was", "have",
        "who", "how",
    ];
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= 3 && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Number of distinct query keywords that appear in `content`.
pub(crate) fn keyword_overlap(query: &str, content: &str) -> usize {
    let content = keywords(content);
    let mut query = keywords(query);
    query.sort();
    query.dedup();
    query.iter().filter(|w| content.contains(w)).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_ignores_case_and_stop_words() {
        assert_eq!(keyword_overlap("What is my dog's name?", "My DOG is named Rex"), 1);
        assert_eq!(keyword_overlap("what the", "what the"), 0);
    }
}
