// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Augmentation middleware: injects retrieved memories into the prompt.
//!
//! The memory block is a single `system` message placed immediately before
//! the current user message. Records are ordered by relevance (stable for
//! equal scores), capped by count, then the lowest-relevance records are
//! dropped until the rendered block fits the token budget. The user's
//! message is never touched.

use chrono::SecondsFormat;
use tracing::debug;

use engram_config::model::EngramConfig;
use engram_core::{AgentContext, MemoryRecord, ProviderMessage, RetrievalResult};

const BLOCK_OPEN: &str = "<retrieved_context>";
const BLOCK_CLOSE: &str = "</retrieved_context>";
const RELEVANCE_INSTRUCTION: &str = "IMPORTANT: Only use information from <retrieved_context> if it is clearly relevant to the user's query. If it is not relevant, IGNORE it entirely.";

/// Token estimate used for budgeting: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Formats retrieval results into the agent context under a token budget.
#[derive(Debug, Clone)]
pub struct AugmentationMiddleware {
    budget_tokens: usize,
    max_records: usize,
}

impl AugmentationMiddleware {
    pub fn new(budget_tokens: usize, max_records: usize) -> Self {
        Self {
            budget_tokens,
            max_records,
        }
    }

    pub fn from_config(config: &EngramConfig) -> Self {
        Self::new(
            config.augmentation.budget_tokens,
            config.augmentation.max_records,
        )
    }

    pub fn budget_tokens(&self) -> usize {
        self.budget_tokens
    }

    /// Returns `base` with the memory block inserted, or `base` unchanged when
    /// the result is degraded, empty, stale, or nothing fits the budget.
    pub fn augment(&self, base: AgentContext, result: &RetrievalResult) -> AgentContext {
        if result.degraded || result.is_empty() {
            return base;
        }
        if let Some(version) = result.checkpoint_version {
            if version != base.checkpoint_version {
                debug!(
                    result_version = version,
                    context_version = base.checkpoint_version,
                    "ignoring stale retrieval result"
                );
                return base;
            }
        }

        let Some(block) = self.render(result) else {
            return base;
        };

        let mut context = base;
        let position = context
            .messages
            .iter()
            .rposition(|m| m.role == "user")
            .unwrap_or(context.messages.len());
        context
            .messages
            .insert(position, ProviderMessage::system(block));
        context
    }

    /// Renders the memory block for `result`, or `None` if no record fits.
    pub fn render(&self, result: &RetrievalResult) -> Option<String> {
        let mut ranked: Vec<(&MemoryRecord, f32)> = result.scored().collect();
        ranked.sort_by(|(_, a), (_, b)| b.total_cmp(a));
        ranked.truncate(self.max_records);

        while !ranked.is_empty() {
            let records: Vec<&MemoryRecord> = ranked.iter().map(|(r, _)| *r).collect();
            let block = format_block(&records);
            let tokens = estimate_tokens(&block);
            if tokens <= self.budget_tokens {
                debug!(records = records.len(), tokens, "memory block rendered");
                return Some(block);
            }
            ranked.pop();
        }
        debug!(budget = self.budget_tokens, "no memory record fits the budget");
        None
    }
}

impl Default for AugmentationMiddleware {
    fn default() -> Self {
        Self::new(1000, 5)
    }
}

fn format_block(records: &[&MemoryRecord]) -> String {
    let mut block = String::from(BLOCK_OPEN);
    block.push('\n');
    for (i, record) in records.iter().enumerate() {
        block.push_str(&format!(
            "[Memory {}] ({}, {}): {}\n",
            i + 1,
            record.kind,
            record.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            record.content.trim()
        ));
    }
    block.push_str(BLOCK_CLOSE);
    block.push_str("\n\n");
    block.push_str(RELEVANCE_INSTRUCTION);
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use engram_core::{RecordKind, SourceRef};
    use proptest::prelude::*;
    use std::time::Duration;

    fn record(id: &str, content: &str) -> MemoryRecord {
        MemoryRecord {
            id: id.into(),
            thread_id: "t1".into(),
            source: SourceRef::Graph(id.into()),
            kind: RecordKind::Fact,
            role: None,
            content: content.into(),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            metadata: serde_json::Value::Null,
        }
    }

    fn result(pairs: Vec<(&str, &str, f32)>) -> RetrievalResult {
        RetrievalResult::from_scored(
            "test",
            pairs
                .into_iter()
                .map(|(id, content, score)| (record(id, content), score))
                .collect(),
            Duration::ZERO,
        )
        .with_checkpoint(1)
    }

    fn base() -> AgentContext {
        AgentContext {
            system_prompt: Some("You are helpful.".into()),
            messages: vec![
                ProviderMessage::user("hello"),
                ProviderMessage::assistant("hi"),
                ProviderMessage::user("What is my dog's name?"),
            ],
            checkpoint_version: 1,
        }
    }

    #[test]
    fn block_is_inserted_before_last_user_message() {
        let mw = AugmentationMiddleware::default();
        let out = mw.augment(base(), &result(vec![("f1", "User's dog is named Rex", 0.9)]));
        assert_eq!(out.messages.len(), 4);
        assert_eq!(out.messages[2].role, "system");
        let text = engram_core::message_text(&out.messages[2]);
        assert!(text.starts_with("<retrieved_context>"));
        assert!(text.contains("[Memory 1] (fact, 2023-11-14T22:13:20Z): User's dog is named Rex"));
        assert!(text.contains("IGNORE it entirely"));
        assert_eq!(out.messages[3], ProviderMessage::user("What is my dog's name?"));
    }

    #[test]
    fn degraded_empty_or_stale_results_leave_context_unchanged() {
        let mw = AugmentationMiddleware::default();
        let degraded = RetrievalResult::degraded("test", Duration::ZERO);
        assert_eq!(mw.augment(base(), &degraded), base());

        let empty = RetrievalResult::empty("test").with_checkpoint(1);
        assert_eq!(mw.augment(base(), &empty), base());

        let stale = result(vec![("f1", "Rex", 0.9)]).with_checkpoint(7);
        assert_eq!(mw.augment(base(), &stale), base());
    }

    #[test]
    fn budget_drops_lowest_relevance_first() {
        let long = "x".repeat(200);
        let pairs = vec![
            ("low", long.as_str(), 0.1),
            ("high", "Rex is the dog", 0.9),
            ("mid", "Lisbon trip", 0.5),
        ];
        let mw = AugmentationMiddleware::new(80, 5);
        let block = mw.render(&result(pairs)).unwrap();
        assert!(block.contains("Rex is the dog"));
        assert!(block.contains("Lisbon trip"));
        assert!(!block.contains(&long));
        assert!(estimate_tokens(&block) <= 80);
    }

    #[test]
    fn max_records_caps_count() {
        let mw = AugmentationMiddleware::new(10_000, 1);
        let block = mw
            .render(&result(vec![("a", "first", 0.2), ("b", "second", 0.8)]))
            .unwrap();
        assert!(block.contains("second"));
        assert!(!block.contains("first"));
    }

    #[test]
    fn nothing_fits_returns_base() {
        let mw = AugmentationMiddleware::new(5, 5);
        let out = mw.augment(base(), &result(vec![("a", "Rex", 0.9)]));
        assert_eq!(out, base());
    }

    #[test]
    fn equal_scores_keep_original_order() {
        let mw = AugmentationMiddleware::default();
        let block = mw
            .render(&result(vec![("a", "alpha", 0.5), ("b", "beta", 0.5)]))
            .unwrap();
        let alpha = block.find("alpha").unwrap();
        let beta = block.find("beta").unwrap();
        assert!(alpha < beta);
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    proptest! {
        #[test]
        fn augment_is_deterministic_and_keeps_user_turn(
            contents in proptest::collection::vec("[a-z ]{1,40}", 0..8),
            budget in 0usize..400,
        ) {
            let pairs: Vec<(MemoryRecord, f32)> = contents
                .iter()
                .enumerate()
                .map(|(i, c)| (record(&format!("r{i}"), c), 1.0 / (i as f32 + 1.0)))
                .collect();
            let retrieved = RetrievalResult::from_scored("p", pairs, Duration::ZERO).with_checkpoint(1);
            let mw = AugmentationMiddleware::new(budget, 5);
            let first = mw.augment(base(), &retrieved);
            let second = mw.augment(base(), &retrieved);
            let expected = base();
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.messages.last(), expected.messages.last());
            if let Some(block) = first.messages.iter().find(|m| m.role == "system") {
                prop_assert!(estimate_tokens(&engram_core::message_text(block)) <= budget);
            }
        }
    }
}
