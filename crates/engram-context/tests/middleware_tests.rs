// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retrieval and augmentation against an in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use engram_bridge::ExecutionBridge;
use engram_context::{AugmentationMiddleware, RetrievalMiddleware};
use engram_core::{
    AgentContext, ConversationState, ConversationStateManager, MemoryBackend, ProviderMessage,
    Role, ThreadId, Turn, message_text,
};
use engram_test_utils::MockBackend;

fn state_with(thread: &str, turns: &[(Role, &str)]) -> ConversationState {
    let thread_id = ThreadId::new(thread);
    let mut manager = ConversationStateManager::default();
    for (i, (role, text)) in turns.iter().enumerate() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, i as u32).unwrap();
        manager
            .append_turn(&thread_id, Turn::new(thread_id.clone(), *role, *text, ts))
            .unwrap();
    }
    manager.state(&thread_id)
}

fn base_context(state: &ConversationState) -> AgentContext {
    AgentContext {
        system_prompt: Some("You are a test assistant.".into()),
        messages: state
            .history()
            .iter()
            .map(|t| engram_core::from_turn(t).unwrap())
            .collect(),
        checkpoint_version: state.checkpoint_version(),
    }
}

fn middleware(backend: Arc<MockBackend>) -> RetrievalMiddleware {
    let bridge = Arc::new(ExecutionBridge::new(2).unwrap());
    RetrievalMiddleware::new(Some(backend as Arc<dyn MemoryBackend>), bridge)
}

#[test]
fn test_dog_name_is_retrieved_and_prepended_to_the_question() {
    let backend = Arc::new(MockBackend::new());
    backend.seed(&ThreadId::new("t1"), Role::User, "My dog is named Rex");
    backend.seed(&ThreadId::new("t1"), Role::User, "I prefer tea over coffee");
    let retrieval = middleware(backend).with_top_k(1);

    let state = state_with("t1", &[(Role::User, "What is my dog's name?")]);
    let result = retrieval.retrieve(&state);
    assert_eq!(result.len(), 1);
    assert_eq!(result.records[0].content, "My dog is named Rex");
    assert_eq!(result.checkpoint_version, Some(1));

    let augmented = AugmentationMiddleware::default().augment(base_context(&state), &result);
    assert_eq!(augmented.messages.len(), 2);
    assert_eq!(augmented.messages[0].role, "system");
    assert!(message_text(&augmented.messages[0]).contains("Rex"));
    assert_eq!(
        augmented.messages[1],
        ProviderMessage::user("What is my dog's name?")
    );
}

#[test]
fn test_unavailable_backend_leaves_the_context_unchanged() {
    let backend = Arc::new(MockBackend::new());
    backend.seed(&ThreadId::new("t1"), Role::User, "My dog is named Rex");
    backend.set_unavailable(true);
    let retrieval = middleware(Arc::clone(&backend));

    let state = state_with("t1", &[(Role::User, "What is my dog's name?")]);
    let result = retrieval.retrieve(&state);
    assert!(result.degraded);
    assert!(result.is_empty());

    let base = base_context(&state);
    let augmented = AugmentationMiddleware::default().augment(base.clone(), &result);
    assert_eq!(augmented, base);
}

#[test]
fn test_timeout_degrades_and_the_next_query_recovers() {
    let backend = Arc::new(MockBackend::new());
    backend.seed(&ThreadId::new("t1"), Role::User, "My dog is named Rex");
    backend.set_query_delay(Some(Duration::from_millis(300)));
    let retrieval = middleware(Arc::clone(&backend)).with_timeout(Duration::from_millis(30));

    let state = state_with("t1", &[(Role::User, "What is my dog's name?")]);
    assert!(retrieval.retrieve(&state).degraded);

    backend.set_query_delay(None);
    let result = retrieval.retrieve(&state);
    assert!(!result.degraded);
    assert_eq!(result.len(), 1);
}

#[test]
fn test_query_window_limits_the_turns_sent() {
    let backend = Arc::new(MockBackend::new());
    backend.seed(&ThreadId::new("t1"), Role::User, "Remember the cabin in Norway");
    let retrieval = middleware(backend).with_query_window(1);

    // "Norway" only appears outside the one-turn window.
    let state = state_with(
        "t1",
        &[
            (Role::User, "Tell me about Norway"),
            (Role::Assistant, "Sure"),
            (Role::User, "Thanks, goodbye"),
        ],
    );
    assert!(retrieval.retrieve(&state).is_empty());
    assert_eq!(retrieval.retrieve_window(&state, 3).len(), 1);
}

#[test]
fn test_budget_drops_lowest_scoring_memories_first() {
    let backend = Arc::new(MockBackend::new());
    let t1 = ThreadId::new("t1");
    backend.seed(&t1, Role::User, "garden tomatoes basil");
    backend.seed(&t1, Role::User, &format!("garden {}", "filler ".repeat(150)));
    let retrieval = middleware(backend);

    let state = state_with("t1", &[(Role::User, "garden tomatoes basil")]);
    let result = retrieval.retrieve(&state);
    assert_eq!(result.len(), 2);

    let augmentation = AugmentationMiddleware::new(150, 5);
    let augmented = augmentation.augment(base_context(&state), &result);
    let block = message_text(&augmented.messages[0]);
    assert!(block.contains("garden tomatoes basil"));
    assert!(!block.contains("filler"));
    assert_eq!(
        message_text(augmented.messages.last().unwrap()),
        "garden tomatoes basil"
    );
}
