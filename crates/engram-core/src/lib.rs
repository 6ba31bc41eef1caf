// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Engram memory-augmentation middleware.
//!
//! This crate provides the error taxonomy, the canonical data model, the
//! message normalizer, the conversation state manager, and the trait seams
//! (backends, embedders, completion providers, and the reset contract) used
//! throughout the workspace.

pub mod error;
pub mod message;
pub mod metrics;
pub mod state;
pub mod traits;
pub mod types;

pub use error::EngramError;
pub use state::{ConversationStateManager, HistoryOrder};
pub use message::{from_turn, message_text, to_turn, to_turn_at, turn_text};
pub use types::{
    AgentContext, BackendKind, ContentBlock, ConversationState, EmbeddingInput, EmbeddingOutput,
    HealthStatus, MemoryRecord, ProviderMessage, RecordKind, RetrievalResult, Role, SourceRef,
    ThreadId, Turn, TurnRef,
};

pub use traits::{
    Clearable, CompletionProvider, EmbeddingAdapter, MemoryAdapter, MemoryBackend, Reranker,
    reset_all,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_round_trips_through_strings() {
        use std::str::FromStr;

        for kind in [
            BackendKind::Vector,
            BackendKind::Graph,
            BackendKind::Hybrid,
            BackendKind::Custom,
        ] {
            let parsed = BackendKind::from_str(&kind.to_string()).expect("should parse back");
            assert_eq!(kind, parsed);
        }
    }

    #[test]
    fn record_kind_serialization() {
        let json = serde_json::to_string(&RecordKind::Fact).expect("should serialize");
        assert_eq!(json, "\"fact\"");
    }

    #[test]
    fn all_traits_are_exported() {
        fn _assert_memory_adapter<T: MemoryAdapter>() {}
        fn _assert_memory_backend<T: MemoryBackend>() {}
        fn _assert_embedding<T: EmbeddingAdapter>() {}
        fn _assert_completion<T: CompletionProvider>() {}
        fn _assert_clearable<T: Clearable>() {}
        fn _assert_reranker<T: Reranker>() {}
    }
}
