// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Checks semantic constraints serde cannot express. All errors are
//! collected; validation never stops at the first one.

use crate::diagnostic::ConfigError;
use crate::model::{EmbeddingKind, EngramConfig};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Output width of the bundled all-MiniLM-L6-v2 model.
const ONNX_DIMENSIONS: usize = 384;

/// Validate a deserialized configuration for semantic correctness.
pub fn validate_config(config: &EngramConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.agent.name.trim().is_empty() {
        errors.push(ConfigError::validation("agent.name", "must not be empty"));
    }

    if !LOG_LEVELS.contains(&config.agent.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ConfigError::validation(
            "agent.log_level",
            format!(
                "`{}` is not one of: {}",
                config.agent.log_level,
                LOG_LEVELS.join(", ")
            ),
        ));
    }

    if config.agent.model.trim().is_empty() {
        errors.push(ConfigError::validation("agent.model", "must not be empty"));
    }

    positive(&mut errors, "retrieval.query_window", config.retrieval.query_window as u64);
    positive(&mut errors, "retrieval.top_k", config.retrieval.top_k as u64);
    positive(
        &mut errors,
        "augmentation.budget_tokens",
        config.augmentation.budget_tokens as u64,
    );
    positive(
        &mut errors,
        "augmentation.max_records",
        config.augmentation.max_records as u64,
    );

    let bridge = &config.bridge;
    positive(&mut errors, "bridge.worker_threads", bridge.worker_threads as u64);
    positive(&mut errors, "bridge.query_timeout_ms", bridge.query_timeout_ms);
    positive(&mut errors, "bridge.write_timeout_ms", bridge.write_timeout_ms);
    positive(&mut errors, "bridge.clear_timeout_ms", bridge.clear_timeout_ms);
    positive(
        &mut errors,
        "bridge.completion_timeout_ms",
        bridge.completion_timeout_ms,
    );
    positive(&mut errors, "bridge.connect_timeout_ms", bridge.connect_timeout_ms);

    let variant = config.agent.variant;
    if variant.uses_vector() {
        let vector = &config.vector;
        if vector.database_path.trim().is_empty() {
            errors.push(ConfigError::validation(
                "vector.database_path",
                "must not be empty",
            ));
        }
        positive(
            &mut errors,
            "vector.embedding_dimensions",
            vector.embedding_dimensions as u64,
        );
        if !(-1.0..=1.0).contains(&vector.min_similarity) {
            errors.push(ConfigError::validation(
                "vector.min_similarity",
                format!("must be within [-1, 1], got {}", vector.min_similarity),
            ));
        }
        if vector.embedding == EmbeddingKind::Onnx && vector.embedding_dimensions != ONNX_DIMENSIONS {
            errors.push(ConfigError::validation(
                "vector.embedding_dimensions",
                format!(
                    "must be {ONNX_DIMENSIONS} when embedding = \"onnx\", got {}",
                    vector.embedding_dimensions
                ),
            ));
        }
        if vector.rerank {
            positive(
                &mut errors,
                "vector.rerank_candidates",
                vector.rerank_candidates as u64,
            );
        }
        if vector.embedding == EmbeddingKind::OpenAi {
            http_url(&mut errors, "vector.embedding_endpoint", &vector.embedding_endpoint);
            if vector.embedding_model.trim().is_empty() {
                errors.push(ConfigError::validation(
                    "vector.embedding_model",
                    "must not be empty when embedding = \"openai\"",
                ));
            }
        }
    }

    if variant.uses_graph() {
        let graph = &config.graph;
        http_url(&mut errors, "graph.mcp_url", &graph.mcp_url);
        if graph.max_nodes == 0 && graph.max_facts == 0 {
            errors.push(ConfigError::validation(
                "graph.max_nodes",
                "max_nodes and max_facts cannot both be 0",
            ));
        }
        if !(0.0..=1.0).contains(&graph.relevance_weight) {
            errors.push(ConfigError::validation(
                "graph.relevance_weight",
                format!("must be within [0, 1], got {}", graph.relevance_weight),
            ));
        }
        positive(&mut errors, "graph.request_timeout_ms", graph.request_timeout_ms);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn positive(errors: &mut Vec<ConfigError>, key: &str, value: u64) {
    if value == 0 {
        errors.push(ConfigError::validation(key, "must be greater than 0"));
    }
}

fn http_url(errors: &mut Vec<ConfigError>, key: &str, value: &str) {
    let value = value.trim();
    if value.is_empty() {
        errors.push(ConfigError::validation(key, "must not be empty"));
    } else if !(value.starts_with("http://") || value.starts_with("https://")) {
        errors.push(ConfigError::validation(
            key,
            format!("`{value}` must start with http:// or https://"),
        ));
    }
}
